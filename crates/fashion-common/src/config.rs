use ini::Ini;
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.ini";
pub const CONFIG_ENV: &str = "FASHION_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("Configuration file not found at path: {0}")]
	NotFound(PathBuf),
	#[error("Could not parse configuration file {path}: {message}")]
	Parse { path: PathBuf, message: String },
	#[error("Section {0} not found in configuration file.")]
	SectionNotFound(String),
	#[error("Key {key} not found in section {section}.")]
	KeyNotFound { section: String, key: String },
	#[error("Invalid value {value:?} for key {key} in section {section}.")]
	InvalidValue { section: String, key: String, value: String },
}

/// Sectioned key/value settings, loaded once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
	source: PathBuf,
	ini: Ini,
}

/// Resolve the config path from `FASHION_CONFIG` (or the default) and load it.
pub fn load_config() -> Result<Settings, ConfigError> {
	let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
	Settings::load(path)
}

impl Settings {
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		if !path.is_file() {
			error!("Configuration file not found at path: {}", path.display());
			return Err(ConfigError::NotFound(path.to_path_buf()));
		}
		info!("Found configuration file at path: {}", path.display());

		let ini = Ini::load_from_file(path).map_err(|err| ConfigError::Parse {
			path: path.to_path_buf(),
			message: err.to_string(),
		})?;

		Ok(Self { source: path.to_path_buf(), ini })
	}

	pub fn from_ini_str(contents: &str) -> Result<Self, ConfigError> {
		let ini = Ini::load_from_str(contents).map_err(|err| ConfigError::Parse {
			path: PathBuf::from("<memory>"),
			message: err.to_string(),
		})?;

		Ok(Self { source: PathBuf::from("<memory>"), ini })
	}

	pub fn source(&self) -> &Path {
		&self.source
	}

	pub fn get(&self, section: &str, key: &str) -> Result<&str, ConfigError> {
		let properties = self.ini.section(Some(section)).ok_or_else(|| {
			error!("Section [{section}] not found in configuration file.");
			ConfigError::SectionNotFound(section.to_string())
		})?;

		let value = properties.get(key).ok_or_else(|| {
			error!("Key {key} not found in section [{section}].");
			ConfigError::KeyNotFound { section: section.to_string(), key: key.to_string() }
		})?;

		debug!("Configuration for [{section}] - {key}: {value}");
		Ok(value)
	}

	/// Like [`get`](Self::get), but a missing section or key yields `default`.
	pub fn get_or<'a>(&'a self, section: &str, key: &str, default: &'a str) -> &'a str {
		self.ini
			.section(Some(section))
			.and_then(|properties| properties.get(key))
			.unwrap_or(default)
	}

	pub fn parse<T: FromStr>(&self, section: &str, key: &str) -> Result<T, ConfigError> {
		let value = self.get(section, key)?;
		parse_value(section, key, value)
	}

	pub fn parse_or<T: FromStr>(&self, section: &str, key: &str, default: T) -> Result<T, ConfigError> {
		match self.ini.section(Some(section)).and_then(|properties| properties.get(key)) {
			Some(value) => parse_value(section, key, value),
			None => Ok(default),
		}
	}
}

fn parse_value<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigError> {
	value.trim().parse().map_err(|_| ConfigError::InvalidValue {
		section: section.to_string(),
		key: key.to_string(),
		value: value.to_string(),
	})
}
