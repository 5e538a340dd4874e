pub mod model;
pub mod predictor;
pub mod preprocess;
pub mod service;

pub use model::{FashionClassifier, FashionClassifierConfig, WeightSource};
pub use predictor::{arg_max, BurnClassifier, Classifier, PredictError};
pub use preprocess::{Normalization, PreprocessError, Preprocessor};
pub use service::{create_router, AppState, Prediction, PredictionService, ServiceError, Upload};
