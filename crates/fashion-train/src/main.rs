use burn::optim::AdamConfig;
use clap::Parser;
use fashion_common::{logging, Settings};
use fashion_train::{FashionMnistSource, FileTracker, Trainer, TrainerConfig};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;

#[cfg(not(feature = "tch"))]
mod backend {
	use burn::backend::ndarray::NdArrayDevice;
	use burn::backend::{Autodiff, NdArray};

	pub type Backend = Autodiff<NdArray<f32>>;

	pub fn device() -> NdArrayDevice {
		NdArrayDevice::Cpu
	}
}

#[cfg(feature = "tch")]
mod backend {
	use burn::backend::Autodiff;
	use burn_tch::{LibTorch, LibTorchDevice};

	pub type Backend = Autodiff<LibTorch>;

	pub fn device() -> LibTorchDevice {
		if tch::utils::has_cuda() {
			LibTorchDevice::Cuda(0)
		} else {
			LibTorchDevice::Cpu
		}
	}
}

/// Train the Fashion-MNIST MLP and record the run.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
	/// INI configuration file. Falls back to `FASHION_CONFIG`, then `config/config.ini`.
	#[arg(long)]
	config: Option<PathBuf>,
	#[arg(long, default_value_t = 2)]
	epochs: usize,
	/// Train on the whole training partition without a validation split.
	#[arg(long)]
	no_holdout: bool,
	#[arg(long, default_value_t = 0.1)]
	validation_split: f64,
	#[arg(long, default_value_t = 0.2)]
	test_split: f64,
	#[arg(long, default_value_t = 32)]
	batch_size: usize,
}

fn run(args: Args, settings: &Settings) -> anyhow::Result<()> {
	let artifacts = settings.get_or("paths", "artifacts_path", "artifacts");
	let tracking = settings.get_or("paths", "tracking_path", "mlruns");
	let experiment = settings.get_or("training", "experiment", "fashion-mnist");

	let config = TrainerConfig::new(AdamConfig::new())
		.with_batch_size(args.batch_size)
		.with_validation_split(args.validation_split)
		.with_test_split(args.test_split)
		.with_holdout(!args.no_holdout);

	let mut trainer = Trainer::<backend::Backend>::new(
		config,
		backend::device(),
		Box::new(FashionMnistSource::new()),
		Box::new(FileTracker::new(tracking, experiment)),
		artifacts,
	);

	let time = SystemTime::now();
	let history = trainer.train(args.epochs)?;
	if let Some(last) = history.last() {
		info!("Final epoch - loss: {:.4}, accuracy: {:.4}", last.loss, last.accuracy);
	}

	if let Some(evaluation) = trainer.evaluate()? {
		info!("Test accuracy: {:.4}", evaluation.accuracy);
	}

	info!("Time to train: {:.3}s", time.elapsed()?.as_secs_f64());
	Ok(())
}

fn main() -> ExitCode {
	let args = Args::parse();

	let settings = match &args.config {
		Some(path) => Settings::load(path),
		None => fashion_common::load_config(),
	};
	let settings = match settings {
		Ok(settings) => settings,
		Err(err) => {
			eprintln!("{err}");
			return ExitCode::FAILURE;
		}
	};

	let _logger = match logging::init(&settings) {
		Ok(handle) => handle,
		Err(err) => {
			eprintln!("{err}");
			return ExitCode::FAILURE;
		}
	};

	match run(args, &settings) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!("An error occurred in the main process: {err}");
			ExitCode::FAILURE
		}
	}
}
