use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, Relu};
use burn::prelude::{Backend, Module, Tensor};

/// Two 3x3 convolutions. Used by ResNet-18/34.
#[derive(Debug, Module)]
pub struct BasicBlock<B: Backend> {
	pub(crate) conv1: Conv2d<B>,
	pub(crate) bn1: BatchNorm<B, 2>,
	pub(crate) conv2: Conv2d<B>,
	pub(crate) bn2: BatchNorm<B, 2>,
	pub(crate) relu: Relu,
	pub(crate) downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
	pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		let shortcut = shortcut(&self.downsample, &input);

		let x = self.relu.forward(self.bn1.forward(self.conv1.forward(input)));
		let x = self.bn2.forward(self.conv2.forward(x));

		self.relu.forward(x + shortcut)
	}
}

/// 1x1 reduce, 3x3, 1x1 expand (x4). Used by ResNet-50 and deeper.
#[derive(Debug, Module)]
pub struct Bottleneck<B: Backend> {
	pub(crate) conv1: Conv2d<B>,
	pub(crate) bn1: BatchNorm<B, 2>,
	pub(crate) conv2: Conv2d<B>,
	pub(crate) bn2: BatchNorm<B, 2>,
	pub(crate) conv3: Conv2d<B>,
	pub(crate) bn3: BatchNorm<B, 2>,
	pub(crate) relu: Relu,
	pub(crate) downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
	pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		let shortcut = shortcut(&self.downsample, &input);

		let x = self.relu.forward(self.bn1.forward(self.conv1.forward(input)));
		let x = self.relu.forward(self.bn2.forward(self.conv2.forward(x)));
		let x = self.bn3.forward(self.conv3.forward(x));

		self.relu.forward(x + shortcut)
	}
}

/// Projection used on the skip path when the block changes shape.
#[derive(Debug, Module)]
pub struct Downsample<B: Backend> {
	pub(crate) conv: Conv2d<B>,
	pub(crate) bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
	pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		self.bn.forward(self.conv.forward(input))
	}
}

fn shortcut<B: Backend>(downsample: &Option<Downsample<B>>, input: &Tensor<B, 4>) -> Tensor<B, 4> {
	match downsample {
		Some(downsample) => downsample.forward(input.clone()),
		None => input.clone(),
	}
}

/// A stage of residual blocks sharing one output width (`layer1`..`layer4`).
///
/// Exactly one of the two lists is set, picked by [`BlockKind`](crate::BlockKind).
/// Records keep the block type in the key (`layerN.basic.*` or
/// `layerN.bottleneck.*`), so a checkpoint can only fill the list it was saved from.
#[derive(Debug, Module)]
pub struct LayerBlock<B: Backend> {
	pub(crate) basic: Option<Vec<BasicBlock<B>>>,
	pub(crate) bottleneck: Option<Vec<Bottleneck<B>>>,
}

impl<B: Backend> LayerBlock<B> {
	pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		let x = self.basic.iter().flatten().fold(input, |x, block| block.forward(x));
		self.bottleneck.iter().flatten().fold(x, |x, block| block.forward(x))
	}
}
