use anyhow::Context;
use clap::Parser;
use fashion_common::{logging, ClassLabels, Settings};
use fashion_serve::service::DEFAULT_BODY_LIMIT;
use fashion_serve::{create_router, AppState, BurnClassifier, FashionClassifierConfig, PredictionService, Preprocessor, WeightSource};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[cfg(not(feature = "tch"))]
mod backend {
	pub type Backend = burn::backend::NdArray<f32>;

	pub fn device() -> burn::backend::ndarray::NdArrayDevice {
		burn::backend::ndarray::NdArrayDevice::Cpu
	}
}

#[cfg(feature = "tch")]
mod backend {
	use burn_tch::{LibTorch, LibTorchDevice};

	pub type Backend = LibTorch;

	pub fn device() -> LibTorchDevice {
		if tch::utils::has_cuda() {
			LibTorchDevice::Cuda(0)
		} else {
			LibTorchDevice::Cpu
		}
	}
}

/// Serve Fashion-MNIST predictions over HTTP.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
	/// INI configuration file. Falls back to `FASHION_CONFIG`, then `config/config.ini`.
	#[arg(long)]
	config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let settings = match args.config {
		Some(path) => Settings::load(path)?,
		None => fashion_common::load_config()?,
	};
	let _logger = logging::init(&settings)?;

	let host = settings.get_or("server", "host", "0.0.0.0").to_string();
	let port = settings.parse_or::<u16>("server", "port", 8000)?;
	let body_limit = settings.parse_or::<usize>("server", "max_upload_bytes", DEFAULT_BODY_LIMIT)?;
	let source = WeightSource::parse(settings.get_or("model", "weights", "pretrained"));

	let preprocessor = Preprocessor::default();
	let input_shape = preprocessor.output_shape();

	info!("Loading classifier from {source:?}");
	let classifier = tokio::task::spawn_blocking(move || {
		BurnClassifier::<backend::Backend>::load(&source, &FashionClassifierConfig::default(), backend::device(), input_shape)
	})
	.await
	.context("Model loading task failed")?
	.context("Could not load classifier weights")?;

	let service = PredictionService::new(preprocessor, Arc::new(classifier), ClassLabels::fashion());
	let app = create_router(AppState::new(service), body_limit);

	let address = format!("{host}:{port}");
	let listener = TcpListener::bind(&address)
		.await
		.with_context(|| format!("Could not bind to {address}"))?;
	info!("Listening on http://{address}");

	axum::serve(listener, app).await?;
	Ok(())
}
