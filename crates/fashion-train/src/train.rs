use crate::data::{DataError, DatasetSource, DatasetSplit, FashionBatcher, SplitProportions};
use crate::model::{FashionMlp, FashionMlpConfig};
use crate::renderer::{EpochMeans, LogRenderer, Split, ACCURACY, LOSS};
use crate::tracking::{ExperimentTracker, RunId, RunStatus, TrackingError};
use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::InMemDataset;
use burn::module::{AutodiffModule, Module};
use burn::optim::AdamConfig;
use burn::record::{CompactRecorder, RecorderError};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use burn::train::metric::{AccuracyMetric, CpuUse, LossMetric};
use burn::train::LearnerBuilder;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
	#[error("Error loading data: {0}")]
	Data(#[from] DataError),
	#[error("Experiment tracking failed: {0}")]
	Tracking(#[from] TrackingError),
	#[error("Could not save the trained model: {0}")]
	Recorder(#[from] RecorderError),
	#[error("Could not prepare artifact directory {path}: {source}")]
	ArtifactDir { path: PathBuf, source: std::io::Error },
	#[error("Epoch {epoch} has no {metric} value")]
	MissingMetric { epoch: usize, metric: &'static str },
	#[error("Training needs at least one epoch")]
	NoEpochs,
}

#[derive(Config)]
pub struct TrainerConfig {
	pub optimizer: AdamConfig,
	#[config(default = "FashionMlpConfig::new()")]
	pub model: FashionMlpConfig,
	#[config(default = 32)]
	pub batch_size: usize,
	#[config(default = 1e-3)]
	pub learning_rate: f64,
	#[config(default = 42)]
	pub seed: u64,
	#[config(default = 2)]
	pub num_workers: usize,
	#[config(default = 0.1)]
	pub validation_split: f64,
	#[config(default = 0.2)]
	pub test_split: f64,
	#[config(default = true)]
	pub holdout: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
	Uninitialized,
	DataLoaded,
	ModelBuilt,
	Training,
	Trained,
	Evaluated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
	pub epoch: usize,
	pub loss: f64,
	pub accuracy: f64,
	pub val_loss: Option<f64>,
	pub val_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
	pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
	/// burn reports accuracy as a percentage; history keeps fractions.
	fn from_means(means: &EpochMeans) -> Result<Self, TrainError> {
		let epochs = means
			.epochs()
			.into_iter()
			.map(|epoch| {
				let train = |metric: &'static str| {
					means.mean(epoch, Split::Train, metric).ok_or(TrainError::MissingMetric { epoch, metric })
				};

				Ok(EpochMetrics {
					epoch,
					loss: train(LOSS)?,
					accuracy: train(ACCURACY)? / 100.0,
					val_loss: means.mean(epoch, Split::Valid, LOSS),
					val_accuracy: means.mean(epoch, Split::Valid, ACCURACY).map(|value| value / 100.0),
				})
			})
			.collect::<Result<Vec<_>, TrainError>>()?;

		Ok(Self { epochs })
	}

	pub fn last(&self) -> Option<&EpochMetrics> {
		self.epochs.last()
	}
}

/// Test-set loss and accuracy in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
	pub loss: f64,
	pub accuracy: f64,
}

fn create_artifact_dir(artifact_dir: &Path) -> Result<(), TrainError> {
	// Stale metric logs would leak into the epoch summary.
	if artifact_dir.exists() {
		std::fs::remove_dir_all(artifact_dir).map_err(|source| TrainError::ArtifactDir {
			path: artifact_dir.to_path_buf(),
			source,
		})?;
	}
	std::fs::create_dir_all(artifact_dir).map_err(|source| TrainError::ArtifactDir {
		path: artifact_dir.to_path_buf(),
		source,
	})
}

pub struct Trainer<B: AutodiffBackend> {
	config: TrainerConfig,
	device: B::Device,
	source: Box<dyn DatasetSource>,
	tracker: Box<dyn ExperimentTracker>,
	artifact_dir: PathBuf,
	state: TrainerState,
	data: Option<DatasetSplit>,
	model: Option<FashionMlp<B>>,
	history: Option<TrainingHistory>,
	run: Option<RunId>,
}

impl<B: AutodiffBackend> Trainer<B> {
	pub fn new<P: Into<PathBuf>>(
		config: TrainerConfig,
		device: B::Device,
		source: Box<dyn DatasetSource>,
		tracker: Box<dyn ExperimentTracker>,
		artifact_dir: P,
	) -> Self {
		Self {
			config,
			device,
			source,
			tracker,
			artifact_dir: artifact_dir.into(),
			state: TrainerState::Uninitialized,
			data: None,
			model: None,
			history: None,
			run: None,
		}
	}

	pub fn config(&self) -> &TrainerConfig {
		&self.config
	}

	pub fn state(&self) -> TrainerState {
		self.state
	}

	pub fn data(&self) -> Option<&DatasetSplit> {
		self.data.as_ref()
	}

	pub fn history(&self) -> Option<&TrainingHistory> {
		self.history.as_ref()
	}

	/// Run id of the latest tracked training run.
	pub fn last_run(&self) -> Option<&RunId> {
		self.run.as_ref()
	}

	pub fn model_path(&self) -> PathBuf {
		self.artifact_dir.join("model.mpk")
	}

	fn transition(&mut self, state: TrainerState) {
		info!("Trainer state: {:?} -> {state:?}", self.state);
		self.state = state;
	}

	pub fn load_data(&mut self) -> Result<&DatasetSplit, TrainError> {
		self.try_load_data().inspect_err(|err| error!("{err}"))?;
		self.transition(TrainerState::DataLoaded);

		self.data.as_ref().ok_or(TrainError::Data(DataError::EmptyPartition("train")))
	}

	fn try_load_data(&mut self) -> Result<(), TrainError> {
		let proportions = self
			.config
			.holdout
			.then(|| SplitProportions::new(self.config.validation_split, self.config.test_split))
			.transpose()?;

		let (train, test) = self.source.load()?;
		let split = DatasetSplit::new(train.into_items()?, test.into_items()?, proportions)?;

		info!(
			"Dataset split - train: {}, validation: {}, test: {}",
			split.train.len(),
			split.valid.len(),
			split.test.len()
		);
		self.data = Some(split);
		Ok(())
	}

	/// Builds the network once; later calls keep the existing model.
	pub fn build_model(&mut self) {
		if self.model.is_some() {
			return;
		}

		self.model = Some(self.config.model.init(&self.device));
		info!("Model built: {:?}", self.config.model);
		self.transition(TrainerState::ModelBuilt);
	}

	pub fn train(&mut self, epochs: usize) -> Result<&TrainingHistory, TrainError> {
		if epochs == 0 {
			return Err(TrainError::NoEpochs);
		}

		self.build_model();
		self.load_data()?;

		let run = self.tracker.start_run()?;
		self.run = Some(run);

		match self.fit(epochs) {
			Ok(history) => {
				self.history = Some(history);
				self.tracker.end_run(RunStatus::Finished)?;
				self.transition(TrainerState::Trained);
				self.history.as_ref().ok_or(TrainError::NoEpochs)
			}
			Err(err) => {
				error!("Error during training: {err}");
				if let Err(end) = self.tracker.end_run(RunStatus::Failed) {
					warn!("Could not close the failed run: {end}");
				}
				Err(err)
			}
		}
	}

	fn fit(&mut self, epochs: usize) -> Result<TrainingHistory, TrainError> {
		let config = &self.config;
		for (key, value) in [
			("epochs", epochs.to_string()),
			("batch_size", config.batch_size.to_string()),
			("learning_rate", config.learning_rate.to_string()),
			("holdout", config.holdout.to_string()),
			("seed", config.seed.to_string()),
		] {
			self.tracker.log_param(key, &value)?;
		}

		let (Some(model), Some(data)) = (self.model.clone(), self.data.as_ref()) else {
			return Err(TrainError::Data(DataError::EmptyPartition("train")));
		};
		let has_validation = !data.valid.is_empty();

		create_artifact_dir(&self.artifact_dir)?;
		let checkpoints = self.artifact_dir.join("training").to_string_lossy().into_owned();
		B::seed(config.seed);

		let batcher_train = FashionBatcher::<B>::new(self.device.clone());
		let batcher_valid = FashionBatcher::<B::InnerBackend>::new(self.device.clone());

		let dataloader_train = DataLoaderBuilder::new(batcher_train)
			.batch_size(config.batch_size)
			.shuffle(config.seed)
			.num_workers(config.num_workers)
			.build(InMemDataset::new(data.train.clone()));

		let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
			.batch_size(config.batch_size)
			.num_workers(config.num_workers)
			.build(InMemDataset::new(data.valid.clone()));

		let renderer = LogRenderer::new();
		let means = renderer.means();

		let learner = LearnerBuilder::new(checkpoints.as_str())
			.metric_train_numeric(AccuracyMetric::new())
			.metric_valid_numeric(AccuracyMetric::new())
			.metric_train_numeric(LossMetric::new())
			.metric_valid_numeric(LossMetric::new())
			.metric_train(CpuUse::new())
			.with_file_checkpointer(CompactRecorder::new())
			.with_application_logger(None)
			.renderer(renderer)
			.devices(vec![self.device.clone()])
			.num_epochs(epochs)
			.build(model, config.optimizer.init(), config.learning_rate);

		self.transition(TrainerState::Training);
		let now = Instant::now();
		let trained = learner.fit(dataloader_train, dataloader_valid);
		let elapsed = now.elapsed().as_secs();
		info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

		let history = {
			let means = means.lock().map_err(|_| TrainError::MissingMetric { epoch: 0, metric: LOSS })?;
			TrainingHistory::from_means(&means)?
		};

		for (step, epoch) in history.epochs.iter().enumerate() {
			self.tracker.log_metric("loss", epoch.loss, step)?;
			self.tracker.log_metric("accuracy", epoch.accuracy, step)?;
			if has_validation {
				if let (Some(val_loss), Some(val_accuracy)) = (epoch.val_loss, epoch.val_accuracy) {
					self.tracker.log_metric("val_loss", val_loss, step)?;
					self.tracker.log_metric("val_accuracy", val_accuracy, step)?;
				}
			}
		}

		self.config
			.save(self.artifact_dir.join("config.json"))
			.map_err(|source| TrainError::ArtifactDir { path: self.artifact_dir.join("config.json"), source })?;

		trained.clone().save_file(self.model_path(), &CompactRecorder::new())?;
		self.tracker.log_model("model", &self.model_path())?;
		info!("Model saved to {}", self.model_path().display());

		self.model = Some(trained);
		Ok(history)
	}

	/// Loss and accuracy on the test partition, or `None` before a successful [`train`](Self::train).
	pub fn evaluate(&mut self) -> Result<Option<Evaluation>, TrainError> {
		let (Some(model), Some(_), Some(data)) = (self.model.as_ref(), self.history.as_ref(), self.data.as_ref()) else {
			error!("Model not trained yet. Please call train() first.");
			return Ok(None);
		};

		if data.test.is_empty() {
			let err = TrainError::Data(DataError::EmptyPartition("test"));
			error!("Error during evaluation: {err}");
			return Err(err);
		}

		let model = model.valid();
		let batcher = FashionBatcher::<B::InnerBackend>::new(self.device.clone());

		let mut loss_sum = 0.0;
		let mut correct = 0usize;
		for chunk in data.test.chunks(self.config.batch_size.max(1)) {
			let batch = batcher.batch(chunk.to_vec());
			let output = model.forward_classification(batch.images, batch.targets);

			loss_sum += output.loss.into_scalar().elem::<f64>() * chunk.len() as f64;

			let predicted = output.output.argmax(1).flatten::<1>(0, 1);
			let hits = predicted.equal(output.targets).int().sum().into_scalar().elem::<i64>();
			correct += hits as usize;
		}

		let total = data.test.len() as f64;
		let evaluation = Evaluation { loss: loss_sum / total, accuracy: correct as f64 / total };
		info!("Test loss: {:.4}, test accuracy: {:.4}", evaluation.loss, evaluation.accuracy);

		self.transition(TrainerState::Evaluated);
		Ok(Some(evaluation))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::renderer::LogRenderer;
	use burn::data::dataloader::Progress;
	use burn::train::metric::MetricEntry;
	use burn::train::renderer::{MetricState, MetricsRenderer, TrainingProgress};

	fn feed(renderer: &mut LogRenderer, epoch: usize, valid: bool) {
		let entry = |name: &str, value: f64| {
			MetricState::Numeric(
				MetricEntry { name: name.to_string(), formatted: String::new(), serialize: String::new() },
				value,
			)
		};
		let progress = || TrainingProgress {
			progress: Progress { items_processed: 8, items_total: 8 },
			epoch,
			epoch_total: 2,
			iteration: 1,
		};

		renderer.update_train(entry(LOSS, 1.0 / epoch as f64));
		renderer.update_train(entry(ACCURACY, 50.0));
		renderer.render_train(progress());

		if valid {
			renderer.update_valid(entry(LOSS, 2.0));
			renderer.update_valid(entry(ACCURACY, 25.0));
			renderer.render_valid(progress());
		}
	}

	#[test]
	fn history_converts_accuracy_to_fractions() {
		let mut renderer = LogRenderer::new();
		feed(&mut renderer, 1, true);
		feed(&mut renderer, 2, true);

		let means = renderer.means();
		let history = TrainingHistory::from_means(&means.lock().unwrap()).unwrap();

		assert_eq!(history.epochs.len(), 2);
		assert_eq!(history.epochs[0].accuracy, 0.5);
		assert_eq!(history.epochs[1].loss, 0.5);
		assert_eq!(history.epochs[1].val_loss, Some(2.0));
		assert_eq!(history.epochs[1].val_accuracy, Some(0.25));
	}

	#[test]
	fn history_without_validation_has_no_val_metrics() {
		let mut renderer = LogRenderer::new();
		feed(&mut renderer, 1, false);

		let means = renderer.means();
		let history = TrainingHistory::from_means(&means.lock().unwrap()).unwrap();
		assert_eq!(history.last().unwrap().val_loss, None);
		assert_eq!(history.last().unwrap().val_accuracy, None);
	}

	#[test]
	fn config_defaults() {
		let config = TrainerConfig::new(AdamConfig::new());
		assert_eq!(config.batch_size, 32);
		assert_eq!(config.validation_split, 0.1);
		assert_eq!(config.test_split, 0.2);
		assert!(config.holdout);
		assert_eq!(config.model.hidden_size, 128);
	}
}
