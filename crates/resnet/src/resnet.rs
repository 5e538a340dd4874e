use crate::block::LayerBlock;
use crate::config::{BackboneConfig, BlockKind};
use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::pool::MaxPool2d;
use burn::nn::{BatchNorm, Relu};
use burn::prelude::{Backend, Device};
use burn::record::{FullPrecisionSettings, Recorder, RecorderError};
use burn::tensor::Tensor;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use log::debug;
use std::path::PathBuf;

/// ResNet feature extractor with the pooling and fully connected head removed.
///
/// `forward` maps `[N, 3, H, W]` images to `[N, C, H/32, W/32]` feature maps, where
/// `C` is [`BackboneConfig::out_channels`].
#[derive(Debug, Module)]
pub struct ResNet<B: Backend> {
	pub(crate) conv1: Conv2d<B>,
	pub(crate) bn1: BatchNorm<B, 2>,
	pub(crate) relu: Relu,
	pub(crate) maxpool: MaxPool2d,
	pub(crate) layer1: LayerBlock<B>,
	pub(crate) layer2: LayerBlock<B>,
	pub(crate) layer3: LayerBlock<B>,
	pub(crate) layer4: LayerBlock<B>,
}

impl<B: Backend> ResNet<B> {
	pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		let x = self.conv1.forward(input);
		let x = self.bn1.forward(x);
		let x = self.relu.forward(x);
		let x = self.maxpool.forward(x);

		let x = self.layer1.forward(x);
		let x = self.layer2.forward(x);
		let x = self.layer3.forward(x);
		self.layer4.forward(x)
	}

	/// Build `config` and fill it from a torchvision state dict on disk. The
	/// checkpoint's `fc.*` tensors have no counterpart here and are left unused.
	pub fn from_torch_checkpoint(config: &BackboneConfig, path: impl Into<PathBuf>, device: &Device<B>) -> Result<Self, RecorderError> {
		let path = path.into();
		debug!("Loading {:?} backbone from {}", config.kind, path.display());

		let record = Self::load_torch_record(config.kind, path, device)?;
		Ok(config.init(device).load_record(record))
	}

	fn load_torch_record(kind: BlockKind, path: PathBuf, device: &Device<B>) -> Result<ResNetRecord<B>, RecorderError> {
		let blocks = match kind {
			BlockKind::Basic => "$1.basic.$2.$3",
			BlockKind::Bottleneck => "$1.bottleneck.$2.$3",
		};

		let load_args = LoadArgs::new(path)
			// *.downsample.0.* -> *.downsample.conv.*
			.with_key_remap("(.+)\\.downsample\\.0\\.(.+)", "$1.downsample.conv.$2")
			// *.downsample.1.* -> *.downsample.bn.*
			.with_key_remap("(.+)\\.downsample\\.1\\.(.+)", "$1.downsample.bn.$2")
			// layer[i].[j].* -> layer[i].{basic,bottleneck}.[j].*
			.with_key_remap("(layer[1-4])\\.([0-9]+)\\.(.+)", blocks);

		PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)
	}
}
