use crate::data::FashionBatch;
use burn::config::Config;
use burn::module::Module;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;
use burn::train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep};

/// Flatten, one hidden ReLU layer, class logits.
#[derive(Debug, Module)]
pub struct FashionMlp<B: Backend> {
	hidden: Linear<B>,
	activation: Relu,
	output: Linear<B>,
}

impl<B: Backend> FashionMlp<B> {
	pub fn forward(&self, images: Tensor<B, 3>) -> Tensor<B, 2> {
		let x = images.flatten::<2>(1, 2);

		let x = self.hidden.forward(x);
		let x = self.activation.forward(x);

		self.output.forward(x)
	}

	pub fn probabilities(&self, images: Tensor<B, 3>) -> Tensor<B, 2> {
		softmax(self.forward(images), 1)
	}

	/// Softmax is folded into the cross-entropy loss.
	pub fn forward_classification(&self, images: Tensor<B, 3>, targets: Tensor<B, 1, Int>) -> ClassificationOutput<B> {
		let output = self.forward(images);

		let loss = CrossEntropyLossConfig::new()
			.init(&output.device())
			.forward(output.clone(), targets.clone());

		ClassificationOutput::new(loss, output, targets)
	}
}

impl<B: AutodiffBackend> TrainStep<FashionBatch<B>, ClassificationOutput<B>> for FashionMlp<B> {
	fn step(&self, batch: FashionBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
		let item = self.forward_classification(batch.images, batch.targets);

		TrainOutput::new(self, item.loss.backward(), item)
	}
}

impl<B: Backend> ValidStep<FashionBatch<B>, ClassificationOutput<B>> for FashionMlp<B> {
	fn step(&self, batch: FashionBatch<B>) -> ClassificationOutput<B> {
		self.forward_classification(batch.images, batch.targets)
	}
}

#[derive(Debug, Config)]
pub struct FashionMlpConfig {
	#[config(default = 784)]
	pub input_size: usize,
	#[config(default = 128)]
	pub hidden_size: usize,
	#[config(default = 10)]
	pub num_classes: usize,
}

impl FashionMlpConfig {
	pub fn init<B: Backend>(&self, device: &B::Device) -> FashionMlp<B> {
		FashionMlp {
			hidden: LinearConfig::new(self.input_size, self.hidden_size).init(device),
			activation: Relu::new(),
			output: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
		}
	}
}
