//! Integration test: full training runs on a synthetic in-memory dataset

use burn::backend::{Autodiff, NdArray};
use burn::optim::AdamConfig;
use fashion_train::data::PIXELS;
use fashion_train::{
	DataError, FileTracker, InMemorySource, RawPartition, RunMeta, RunStatus, TrainError, Trainer, TrainerConfig,
	TrainerState,
};
use std::fs;
use std::path::{Path, PathBuf};

type TestBackend = Autodiff<NdArray<f32>>;

/// Class `k` lights up rows `2k..2k+3`, classes interleaved.
fn partition(per_class: usize) -> RawPartition {
	let mut partition = RawPartition::default();
	for i in 0..per_class {
		for label in 0..10u8 {
			let mut pixels = [0u8; PIXELS];
			let start = label as usize * 2 * 28;
			for pixel in &mut pixels[start..start + 3 * 28] {
				*pixel = 200 + (i % 50) as u8;
			}
			partition.images.push(pixels);
			partition.labels.push(label);
		}
	}
	partition
}

fn config() -> TrainerConfig {
	TrainerConfig::new(AdamConfig::new()).with_batch_size(16).with_num_workers(1)
}

fn trainer(config: TrainerConfig, root: &Path) -> Trainer<TestBackend> {
	Trainer::new(
		config,
		Default::default(),
		Box::new(InMemorySource::new(partition(12), partition(3))),
		Box::new(FileTracker::new(root.join("mlruns"), "synthetic")),
		root.join("artifacts"),
	)
}

fn run_dir(root: &Path, trainer: &Trainer<TestBackend>) -> PathBuf {
	root.join("mlruns").join("synthetic").join(trainer.last_run().unwrap().as_str())
}

fn metric_lines(run: &Path, key: &str) -> Vec<String> {
	fs::read_to_string(run.join("metrics").join(key)).unwrap().lines().map(str::to_string).collect()
}

#[test]
fn test_train_then_evaluate() {
	let root = tempfile::tempdir().unwrap();
	let mut trainer = trainer(config(), root.path());

	let history = trainer.train(2).unwrap().clone();
	assert_eq!(trainer.state(), TrainerState::Trained);
	assert_eq!(history.epochs.len(), 2);
	for epoch in &history.epochs {
		assert!(epoch.loss.is_finite() && epoch.loss > 0.0);
		assert!((0.0..=1.0).contains(&epoch.accuracy));
		assert!((0.0..=1.0).contains(&epoch.val_accuracy.unwrap()));
		assert!(epoch.val_loss.unwrap().is_finite());
	}

	let split = trainer.data().unwrap();
	assert_eq!((split.train.len(), split.valid.len(), split.test.len()), (84, 36, 30));

	let run = run_dir(root.path(), &trainer);
	for key in ["loss", "accuracy", "val_loss", "val_accuracy"] {
		let lines = metric_lines(&run, key);
		assert_eq!(lines.len(), 2, "{key}");
		assert!(lines[0].ends_with(" 0"));
		assert!(lines[1].ends_with(" 1"));
	}
	assert_eq!(fs::read_to_string(run.join("params/epochs")).unwrap(), "2");
	assert_eq!(fs::read_to_string(run.join("params/holdout")).unwrap(), "true");
	assert!(run.join("artifacts/model/model.mpk").is_file());
	assert!(trainer.model_path().is_file());
	assert_eq!(RunMeta::read(&run).unwrap().status, RunStatus::Finished);

	let evaluation = trainer.evaluate().unwrap().unwrap();
	assert!(evaluation.loss.is_finite());
	assert!((0.0..=1.0).contains(&evaluation.accuracy));
	assert_eq!(trainer.state(), TrainerState::Evaluated);
}

#[test]
fn test_evaluate_before_train_is_a_no_op() {
	let root = tempfile::tempdir().unwrap();
	let mut trainer = trainer(config(), root.path());

	assert!(trainer.evaluate().unwrap().is_none());

	trainer.build_model();
	assert_eq!(trainer.state(), TrainerState::ModelBuilt);
	assert!(trainer.evaluate().unwrap().is_none());
}

#[test]
fn test_train_without_holdout() {
	let root = tempfile::tempdir().unwrap();
	let mut trainer = trainer(config().with_holdout(false), root.path());

	let history = trainer.train(1).unwrap();
	assert_eq!(history.epochs.len(), 1);
	assert_eq!(history.epochs[0].val_loss, None);
	assert_eq!(history.epochs[0].val_accuracy, None);

	assert_eq!(trainer.data().unwrap().train.len(), 120);
	assert!(trainer.data().unwrap().valid.is_empty());

	let run = run_dir(root.path(), &trainer);
	assert_eq!(metric_lines(&run, "loss").len(), 1);
	assert!(!run.join("metrics/val_loss").exists());
}

#[test]
fn test_invalid_split_fails_before_tracking() {
	let root = tempfile::tempdir().unwrap();
	let mut trainer = trainer(config().with_validation_split(0.6).with_test_split(0.5), root.path());

	let err = trainer.train(1).unwrap_err();
	assert!(matches!(err, TrainError::Data(DataError::InvalidSplit { .. })));
	assert!(err.to_string().starts_with("Error loading data"));
	assert!(trainer.last_run().is_none());
	assert!(!root.path().join("mlruns").exists());
}

#[test]
fn test_zero_epochs_is_rejected() {
	let root = tempfile::tempdir().unwrap();
	let mut trainer = trainer(config(), root.path());

	assert!(matches!(trainer.train(0), Err(TrainError::NoEpochs)));
	assert_eq!(trainer.state(), TrainerState::Uninitialized);
}
