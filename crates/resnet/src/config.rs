use crate::block::{BasicBlock, Bottleneck, Downsample, LayerBlock};
use crate::resnet::ResNet;
use crate::weights::{self, Weights, WeightsMeta};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::MaxPool2dConfig;
use burn::nn::{BatchNormConfig, Initializer, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Device};
use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;

// Stage widths relative to the stem, before block expansion.
const STAGE_MULTIPLIERS: [usize; 4] = [1, 2, 4, 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
	Basic,
	Bottleneck,
}

impl BlockKind {
	pub fn expansion(&self) -> usize {
		match self {
			BlockKind::Basic => 1,
			BlockKind::Bottleneck => 4,
		}
	}
}

/// Shape of a headless ResNet: blocks per stage and the residual block type.
#[derive(Debug, Config)]
pub struct BackboneConfig {
	pub blocks: [usize; 4],
	pub kind: BlockKind,
	/// Stem width. Stage `i` is `base_channels * 2^i` wide before expansion.
	#[config(default = 64)]
	pub base_channels: usize,
}

impl BackboneConfig {
	pub fn resnet18() -> Self {
		Self::new([2, 2, 2, 2], BlockKind::Basic)
	}

	pub fn resnet50() -> Self {
		Self::new([3, 4, 6, 3], BlockKind::Bottleneck)
	}

	/// Channels of the feature map produced by the last stage.
	pub fn out_channels(&self) -> usize {
		self.stage_widths()[3]
	}

	fn stage_widths(&self) -> [usize; 4] {
		STAGE_MULTIPLIERS.map(|m| self.base_channels * m * self.kind.expansion())
	}

	/// ImageNet checkpoint matching this architecture, if torchvision publishes one.
	pub fn pretrained_weights(&self) -> Option<Weights> {
		if self.base_channels != 64 {
			return None;
		}

		match (self.blocks, self.kind) {
			([2, 2, 2, 2], BlockKind::Basic) => Some(weights::ResNet18::ImageNet1kV1.weights()),
			([3, 4, 6, 3], BlockKind::Bottleneck) => Some(weights::ResNet50::ImageNet1kV1.weights()),
			_ => None,
		}
	}

	pub fn init<B: Backend>(&self, device: &Device<B>) -> ResNet<B> {
		let stem = self.base_channels;

		// 7x7 conv, stem width, /2
		let conv1 = Conv2dConfig::new([3, stem], [7, 7])
			.with_stride([2, 2])
			.with_padding(PaddingConfig2d::Explicit(3, 3))
			.with_bias(false)
			.with_initializer(kaiming());

		// 3x3 maxpool, /2
		let maxpool = MaxPool2dConfig::new([3, 3])
			.with_strides([2, 2])
			.with_padding(PaddingConfig2d::Explicit(1, 1));

		let widths = self.stage_widths();
		let stage = |index: usize, in_channels: usize, stride: usize| {
			StageConfig {
				num_blocks: self.blocks[index],
				in_channels,
				out_channels: widths[index],
				stride,
				kind: self.kind,
			}
			.init(device)
		};

		let layer1 = stage(0, stem, 1);
		let layer2 = stage(1, widths[0], 2);
		let layer3 = stage(2, widths[1], 2);
		let layer4 = stage(3, widths[2], 2);

		ResNet {
			conv1: conv1.init(device),
			bn1: BatchNormConfig::new(stem).init(device),
			relu: Relu::new(),
			maxpool: maxpool.init(),
			layer1,
			layer2,
			layer3,
			layer4,
		}
	}
}

// Recommended gain for ReLU networks.
fn kaiming() -> Initializer {
	Initializer::KaimingNormal {
		gain: SQRT_2,
		fan_out_only: true,
	}
}

fn conv<B: Backend>(channels: [usize; 2], kernel: usize, stride: usize, device: &Device<B>) -> Conv2d<B> {
	let padding = kernel / 2;
	Conv2dConfig::new(channels, [kernel, kernel])
		.with_stride([stride, stride])
		.with_padding(PaddingConfig2d::Explicit(padding, padding))
		.with_bias(false)
		.with_initializer(kaiming())
		.init(device)
}

struct StageConfig {
	num_blocks: usize,
	in_channels: usize,
	out_channels: usize,
	stride: usize,
	kind: BlockKind,
}

impl StageConfig {
	fn init<B: Backend>(&self, device: &Device<B>) -> LayerBlock<B> {
		// Only the first block changes resolution and width.
		let shapes = (0..self.num_blocks).map(|b| {
			if b == 0 {
				(self.in_channels, self.stride)
			} else {
				(self.out_channels, 1)
			}
		});

		match self.kind {
			BlockKind::Basic => LayerBlock {
				basic: Some(shapes.map(|(in_channels, stride)| self.basic(in_channels, stride, device)).collect()),
				bottleneck: None,
			},
			BlockKind::Bottleneck => LayerBlock {
				basic: None,
				bottleneck: Some(shapes.map(|(in_channels, stride)| self.bottleneck(in_channels, stride, device)).collect()),
			},
		}
	}

	fn basic<B: Backend>(&self, in_channels: usize, stride: usize, device: &Device<B>) -> BasicBlock<B> {
		let out_channels = self.out_channels;

		BasicBlock {
			conv1: conv([in_channels, out_channels], 3, stride, device),
			bn1: BatchNormConfig::new(out_channels).init(device),
			conv2: conv([out_channels, out_channels], 3, 1, device),
			bn2: BatchNormConfig::new(out_channels).init(device),
			relu: Relu::new(),
			downsample: downsample(in_channels, out_channels, stride, device),
		}
	}

	fn bottleneck<B: Backend>(&self, in_channels: usize, stride: usize, device: &Device<B>) -> Bottleneck<B> {
		let out_channels = self.out_channels;
		let inner = out_channels / self.kind.expansion();

		Bottleneck {
			conv1: conv([in_channels, inner], 1, 1, device),
			bn1: BatchNormConfig::new(inner).init(device),
			conv2: conv([inner, inner], 3, stride, device),
			bn2: BatchNormConfig::new(inner).init(device),
			conv3: conv([inner, out_channels], 1, 1, device),
			bn3: BatchNormConfig::new(out_channels).init(device),
			relu: Relu::new(),
			downsample: downsample(in_channels, out_channels, stride, device),
		}
	}
}

fn downsample<B: Backend>(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Option<Downsample<B>> {
	(in_channels != out_channels || stride != 1).then(|| Downsample {
		conv: conv([in_channels, out_channels], 1, stride, device),
		bn: BatchNormConfig::new(out_channels).init(device),
	})
}
