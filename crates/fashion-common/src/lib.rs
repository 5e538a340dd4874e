//! Settings, logging and the class label table shared by the server and the trainer.

pub mod config;
pub mod labels;
pub mod logging;

pub use config::{load_config, ConfigError, Settings};
pub use labels::{ClassLabels, CLASS_NAMES, NUM_CLASSES};
pub use logging::{LogHandle, LoggingError};
