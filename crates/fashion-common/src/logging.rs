use crate::config::{ConfigError, Settings};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config as LogConfig, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `timestamp - name - level - message`, shared by the console and the file.
pub const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S,%3f)} - {t} - {l} - {m}{n}";
pub const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;
pub const LOG_BACKUPS: u32 = 5;

// Targets that log at INFO. Everything else only reaches the sinks at WARN.
const LOGGED_TARGETS: [&str; 4] = ["fashion_common", "fashion_serve", "fashion_train", "resnet"];

#[derive(Debug, Error)]
pub enum LoggingError {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error("Could not create log directory {path}: {source}")]
	CreateDir { path: PathBuf, source: std::io::Error },
	#[error("Could not open log file {path}: {source}")]
	File { path: PathBuf, source: std::io::Error },
	#[error("Invalid log rotation: {0}")]
	Rotation(String),
	#[error("Invalid logger configuration: {0}")]
	Logger(String),
	#[error("A logger is already installed for this process")]
	AlreadyInitialized,
}

/// Keeps the installed logger alive and remembers where the file sink writes.
pub struct LogHandle {
	_handle: log4rs::Handle,
	path: PathBuf,
}

impl LogHandle {
	pub fn path(&self) -> &Path {
		&self.path
	}
}

/// Install the process-wide logger using `[paths] logs_path`.
pub fn init(settings: &Settings) -> Result<LogHandle, LoggingError> {
	let path = settings.get("paths", "logs_path")?;
	init_with_path(path)
}

pub fn init_with_path<P: AsRef<Path>>(path: P) -> Result<LogHandle, LoggingError> {
	let path = path.as_ref();
	let config = build_config(path)?;

	let handle = log4rs::init_config(config).map_err(|_| LoggingError::AlreadyInitialized)?;
	log::info!("Logging to console and {}", path.display());

	Ok(LogHandle { _handle: handle, path: path.to_path_buf() })
}

pub fn build_config(path: &Path) -> Result<LogConfig, LoggingError> {
	if let Some(directory) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
		if !directory.exists() {
			std::fs::create_dir_all(directory).map_err(|source| LoggingError::CreateDir {
				path: directory.to_path_buf(),
				source,
			})?;
		}
	}

	let console = ConsoleAppender::builder()
		.encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
		.build();

	let roller = FixedWindowRoller::builder()
		.base(1)
		.build(&format!("{}.{{}}", path.display()), LOG_BACKUPS)
		.map_err(|err| LoggingError::Rotation(err.to_string()))?;
	let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(MAX_LOG_BYTES)), Box::new(roller));

	let file = RollingFileAppender::builder()
		.encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
		.build(path, Box::new(policy))
		.map_err(|source| LoggingError::File { path: path.to_path_buf(), source })?;

	let loggers = LOGGED_TARGETS.iter().map(|target| {
		Logger::builder()
			.appender("console")
			.appender("file")
			.additive(false)
			.build(*target, LevelFilter::Info)
	});

	LogConfig::builder()
		.appender(Appender::builder().build("console", Box::new(console)))
		.appender(Appender::builder().build("file", Box::new(file)))
		.loggers(loggers)
		.build(Root::builder().appender("console").appender("file").build(LevelFilter::Warn))
		.map_err(|err| LoggingError::Logger(err.to_string()))
}
