//! Experiment tracking: runs with params, step-indexed metrics and artifacts.
//!
//! [`FileTracker`] lays runs out on disk as
//!
//! ```text
//! <root>/<experiment>/<run_id>/meta.json
//!                             /params/<key>
//!                             /metrics/<key>      "<timestamp_ms> <value> <step>" per line
//!                             /artifacts/<name>/<file>
//! ```

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TrackingError {
	#[error("No active run")]
	NoActiveRun,
	#[error("Run {0} is still active")]
	RunActive(RunId),
	#[error("Invalid tracking key {0:?}")]
	InvalidKey(String),
	#[error("Tracking I/O failed for {path}: {source}")]
	Io { path: PathBuf, source: std::io::Error },
	#[error("Could not write run metadata: {0}")]
	Meta(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
	pub fn generate() -> Self {
		Self(Uuid::new_v4().simple().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RunId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
	Running,
	Finished,
	Failed,
}

pub trait ExperimentTracker: Send {
	fn start_run(&mut self) -> Result<RunId, TrackingError>;

	fn log_param(&mut self, key: &str, value: &str) -> Result<(), TrackingError>;

	fn log_metric(&mut self, key: &str, value: f64, step: usize) -> Result<(), TrackingError>;

	/// Copy the file at `artifact` into the run under `name`.
	fn log_model(&mut self, name: &str, artifact: &Path) -> Result<(), TrackingError>;

	fn end_run(&mut self, status: RunStatus) -> Result<(), TrackingError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
	pub run_id: RunId,
	pub experiment: String,
	pub status: RunStatus,
	pub start_time: i64,
	pub end_time: Option<i64>,
}

impl RunMeta {
	pub fn read(run_dir: &Path) -> Result<Self, TrackingError> {
		let path = run_dir.join("meta.json");
		let contents = fs::read_to_string(&path).map_err(|source| TrackingError::Io { path, source })?;
		Ok(serde_json::from_str(&contents)?)
	}
}

#[derive(Debug)]
struct ActiveRun {
	dir: PathBuf,
	meta: RunMeta,
}

#[derive(Debug)]
pub struct FileTracker {
	root: PathBuf,
	experiment: String,
	active: Option<ActiveRun>,
}

impl FileTracker {
	pub fn new<P: Into<PathBuf>, S: Into<String>>(root: P, experiment: S) -> Self {
		Self { root: root.into(), experiment: experiment.into(), active: None }
	}

	pub fn experiment_dir(&self) -> PathBuf {
		self.root.join(&self.experiment)
	}

	pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
		self.experiment_dir().join(run_id.as_str())
	}

	fn active(&self) -> Result<&ActiveRun, TrackingError> {
		self.active.as_ref().ok_or(TrackingError::NoActiveRun)
	}

	fn write_meta(run: &ActiveRun) -> Result<(), TrackingError> {
		let path = run.dir.join("meta.json");
		let contents = serde_json::to_string_pretty(&run.meta)?;
		fs::write(&path, contents).map_err(|source| TrackingError::Io { path, source })
	}
}

fn check_key(key: &str) -> Result<(), TrackingError> {
	let bad = key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']);
	if bad {
		return Err(TrackingError::InvalidKey(key.to_string()));
	}
	Ok(())
}

fn create_dir(path: &Path) -> Result<(), TrackingError> {
	fs::create_dir_all(path).map_err(|source| TrackingError::Io { path: path.to_path_buf(), source })
}

impl ExperimentTracker for FileTracker {
	fn start_run(&mut self) -> Result<RunId, TrackingError> {
		if let Some(run) = &self.active {
			return Err(TrackingError::RunActive(run.meta.run_id.clone()));
		}

		let run_id = RunId::generate();
		let dir = self.run_dir(&run_id);
		for sub in ["params", "metrics", "artifacts"] {
			create_dir(&dir.join(sub))?;
		}

		let run = ActiveRun {
			dir,
			meta: RunMeta {
				run_id: run_id.clone(),
				experiment: self.experiment.clone(),
				status: RunStatus::Running,
				start_time: Utc::now().timestamp_millis(),
				end_time: None,
			},
		};
		Self::write_meta(&run)?;

		info!("Started run {run_id} in experiment {}", self.experiment);
		self.active = Some(run);
		Ok(run_id)
	}

	fn log_param(&mut self, key: &str, value: &str) -> Result<(), TrackingError> {
		check_key(key)?;
		let path = self.active()?.dir.join("params").join(key);

		debug!("param {key} = {value}");
		fs::write(&path, value).map_err(|source| TrackingError::Io { path, source })
	}

	fn log_metric(&mut self, key: &str, value: f64, step: usize) -> Result<(), TrackingError> {
		check_key(key)?;
		let path = self.active()?.dir.join("metrics").join(key);
		let io = |source| TrackingError::Io { path: path.clone(), source };

		debug!("metric {key} = {value} at step {step}");
		let mut file = OpenOptions::new().create(true).append(true).open(&path).map_err(io)?;
		writeln!(file, "{} {value} {step}", Utc::now().timestamp_millis()).map_err(io)
	}

	fn log_model(&mut self, name: &str, artifact: &Path) -> Result<(), TrackingError> {
		check_key(name)?;
		let dir = self.active()?.dir.join("artifacts").join(name);
		create_dir(&dir)?;

		let file_name = artifact.file_name().ok_or_else(|| TrackingError::Io {
			path: artifact.to_path_buf(),
			source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "artifact has no file name"),
		})?;
		let target = dir.join(file_name);

		fs::copy(artifact, &target).map_err(|source| TrackingError::Io { path: artifact.to_path_buf(), source })?;
		info!("Logged artifact {name} from {}", artifact.display());
		Ok(())
	}

	fn end_run(&mut self, status: RunStatus) -> Result<(), TrackingError> {
		let mut run = self.active.take().ok_or(TrackingError::NoActiveRun)?;
		run.meta.status = status;
		run.meta.end_time = Some(Utc::now().timestamp_millis());
		Self::write_meta(&run)?;

		info!("Ended run {} with status {status:?}", run.meta.run_id);
		Ok(())
	}
}
