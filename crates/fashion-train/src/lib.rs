//! Offline Fashion-MNIST training: data loading, the MLP, the trainer and run tracking.

pub mod data;
pub mod model;
pub mod renderer;
pub mod tracking;
pub mod train;

pub use data::{DataError, DatasetSource, DatasetSplit, FashionMnistItem, FashionMnistSource, InMemorySource, RawPartition};
pub use model::{FashionMlp, FashionMlpConfig};
pub use tracking::{ExperimentTracker, FileTracker, RunId, RunMeta, RunStatus, TrackingError};
pub use train::{EpochMetrics, Evaluation, TrainError, Trainer, TrainerConfig, TrainerState, TrainingHistory};
