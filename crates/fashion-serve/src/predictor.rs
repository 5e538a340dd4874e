use crate::model::{FashionClassifier, FashionClassifierConfig, WeightSource};
use burn::prelude::{Backend, Device, Tensor};
use burn::record::RecorderError;
use burn::tensor::TensorData;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
	#[error("Input shape {actual:?} does not match the model input shape {expected:?}")]
	ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },
	#[error("Inference failed: {0}")]
	Inference(String),
	#[error("Model lock poisoned by an earlier panic")]
	Poisoned,
}

/// Anything that maps one preprocessed `[1, H, W, 3]` image to class probabilities.
pub trait Classifier: Send + Sync {
	fn input_shape(&self) -> [usize; 4];

	fn predict(&self, input: TensorData) -> Result<Vec<f32>, PredictError>;
}

pub fn check_shape(expected: [usize; 4], input: &TensorData) -> Result<(), PredictError> {
	if input.shape.as_slice() != expected.as_slice() {
		return Err(PredictError::ShapeMismatch {
			expected: expected.to_vec(),
			actual: input.shape.clone(),
		});
	}
	Ok(())
}

/// Index of the largest score. Ties keep the lowest index; NaN never wins.
pub fn arg_max(scores: &[f32]) -> Option<usize> {
	scores
		.iter()
		.copied()
		.enumerate()
		.filter(|(_, score)| !score.is_nan())
		.fold(None, |best: Option<(usize, f32)>, (index, score)| match best {
			Some((_, top)) if score <= top => best,
			_ => Some((index, score)),
		})
		.map(|(index, _)| index)
}

/// [`Classifier`] backed by a burn [`FashionClassifier`].
pub struct BurnClassifier<B: Backend> {
	// burn modules are Send but not Sync.
	model: Mutex<FashionClassifier<B>>,
	device: Device<B>,
	input_shape: [usize; 4],
}

impl<B: Backend> BurnClassifier<B> {
	pub fn new(model: FashionClassifier<B>, device: Device<B>, input_shape: [usize; 4]) -> Self {
		Self { model: Mutex::new(model), device, input_shape }
	}

	pub fn load(
		source: &WeightSource,
		config: &FashionClassifierConfig,
		device: Device<B>,
		input_shape: [usize; 4],
	) -> Result<Self, RecorderError> {
		let model = source.load(config, &device)?;
		Ok(Self::new(model, device, input_shape))
	}
}

impl<B: Backend> Classifier for BurnClassifier<B> {
	fn input_shape(&self) -> [usize; 4] {
		self.input_shape
	}

	fn predict(&self, input: TensorData) -> Result<Vec<f32>, PredictError> {
		check_shape(self.input_shape, &input)?;

		// NHWC -> NCHW
		let images = Tensor::<B, 4>::from_data(input.convert::<B::FloatElem>(), &self.device).permute([0, 3, 1, 2]);

		let probabilities = {
			let model = self.model.lock().map_err(|_| PredictError::Poisoned)?;
			model.probabilities(images)
		};

		probabilities
			.into_data()
			.convert::<f32>()
			.to_vec::<f32>()
			.map_err(|err| PredictError::Inference(format!("{err:?}")))
	}
}
