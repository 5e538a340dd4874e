use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::{Backend, Device, Tensor};
use burn::record::{CompactRecorder, RecorderError};
use burn::tensor::activation::softmax;
use log::{info, warn};
use resnet::{BackboneConfig, ResNet};
use std::path::{Path, PathBuf};

/// ResNet backbone followed by global average pooling and a two-layer dense head.
#[derive(Debug, Module)]
pub struct FashionClassifier<B: Backend> {
	backbone: ResNet<B>,
	pool: AdaptiveAvgPool2d,
	hidden: Linear<B>,
	activation: Relu,
	output: Linear<B>,
}

impl<B: Backend> FashionClassifier<B> {
	/// Class logits for NCHW images.
	pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
		let x = self.backbone.forward(images);
		let x = self.pool.forward(x);
		let x = x.flatten(1, 3);

		let x = self.hidden.forward(x);
		let x = self.activation.forward(x);

		self.output.forward(x)
	}

	/// Softmax over [`forward`](Self::forward); each row sums to 1.
	pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
		softmax(self.forward(images), 1)
	}
}

#[derive(Debug, Config)]
pub struct FashionClassifierConfig {
	pub backbone: BackboneConfig,
	#[config(default = 1024)]
	pub hidden_size: usize,
	#[config(default = 10)]
	pub num_classes: usize,
}

impl Default for FashionClassifierConfig {
	fn default() -> Self {
		Self::new(BackboneConfig::resnet50())
	}
}

impl FashionClassifierConfig {
	pub fn init<B: Backend>(&self, device: &Device<B>) -> FashionClassifier<B> {
		self.init_with_backbone(self.backbone.init(device), device)
	}

	/// Backbone filled from the torchvision state dict at `path`, fresh head.
	pub fn init_from_backbone_checkpoint<B: Backend>(&self, path: &Path, device: &Device<B>) -> Result<FashionClassifier<B>, RecorderError> {
		let backbone = ResNet::from_torch_checkpoint(&self.backbone, path, device)?;
		Ok(self.init_with_backbone(backbone, device))
	}

	/// Attach a freshly initialized head to an existing backbone.
	pub fn init_with_backbone<B: Backend>(&self, backbone: ResNet<B>, device: &Device<B>) -> FashionClassifier<B> {
		FashionClassifier {
			backbone,
			pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
			hidden: LinearConfig::new(self.backbone.out_channels(), self.hidden_size).init(device),
			activation: Relu::new(),
			output: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
		}
	}
}

/// Where the classifier's weights come from at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
	/// ImageNet backbone, randomly initialized head.
	Pretrained,
	/// Everything randomly initialized.
	Random,
	/// A full classifier record saved with [`CompactRecorder`].
	Artifact(PathBuf),
}

impl WeightSource {
	pub fn parse(value: &str) -> Self {
		match value.trim() {
			"pretrained" => WeightSource::Pretrained,
			"random" => WeightSource::Random,
			path => WeightSource::Artifact(PathBuf::from(path)),
		}
	}

	pub fn load<B: Backend>(&self, config: &FashionClassifierConfig, device: &Device<B>) -> Result<FashionClassifier<B>, RecorderError> {
		match self {
			WeightSource::Pretrained => {
				let weights = config.backbone.pretrained_weights().ok_or_else(|| {
					RecorderError::Unknown(format!("No pretrained weights for backbone {:?}", config.backbone))
				})?;
				let checkpoint = weights.download().map_err(|err| {
					RecorderError::Unknown(format!("Could not download weights.\nError: {err}"))
				})?;

				let model = config.init_from_backbone_checkpoint(&checkpoint, device)?;
				info!("Loaded {} backbone weights ({} ImageNet classes)", weights.file_name(), weights.num_classes);
				warn!("Classification head is randomly initialized; predictions are not meaningful until trained weights are loaded");
				Ok(model)
			}
			WeightSource::Random => {
				warn!("Serving a randomly initialized classifier");
				Ok(config.init(device))
			}
			WeightSource::Artifact(path) => {
				info!("Loading classifier weights from {}", path.display());
				config.init(device).load_file(path.clone(), &CompactRecorder::new(), device)
			}
		}
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use burn::backend::NdArray;
	use fashion_common::NUM_CLASSES;
	use resnet::BlockKind;

	type TestBackend = NdArray<f32>;

	/// Bottleneck blocks like the served ResNet-50, narrow enough for tests.
	pub(crate) fn small_config() -> FashionClassifierConfig {
		let backbone = BackboneConfig::new([1, 1, 1, 1], BlockKind::Bottleneck).with_base_channels(2);
		FashionClassifierConfig::new(backbone).with_hidden_size(32)
	}

	/// torchvision-layout state dict matching [`small_config`]'s backbone.
	pub(crate) fn small_checkpoint() -> PathBuf {
		Path::new(env!("CARGO_MANIFEST_DIR")).join("../resnet/fixtures/tiny_bottleneck.pth")
	}

	#[test]
	fn probabilities_form_a_distribution() {
		let device = Default::default();
		let model = small_config().init::<TestBackend>(&device);

		let images = Tensor::<TestBackend, 4>::random([2, 3, 64, 64], burn::tensor::Distribution::Default, &device);
		let probabilities = model.probabilities(images);
		assert_eq!(probabilities.dims(), [2, NUM_CLASSES]);

		let values = probabilities.into_data().to_vec::<f32>().unwrap();
		for row in values.chunks(NUM_CLASSES) {
			assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
			assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-3);
		}
	}

	#[test]
	fn weight_source_parsing() {
		assert_eq!(WeightSource::parse("pretrained"), WeightSource::Pretrained);
		assert_eq!(WeightSource::parse(" random "), WeightSource::Random);
		assert_eq!(WeightSource::parse("artifacts/model.mpk"), WeightSource::Artifact(PathBuf::from("artifacts/model.mpk")));
	}

	#[test]
	fn artifact_round_trip() {
		let device = Default::default();
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("classifier");

		let config = small_config();
		let model = config.init::<TestBackend>(&device);
		model.clone().save_file(path.clone(), &CompactRecorder::new()).unwrap();

		let loaded = WeightSource::Artifact(path.with_extension("mpk")).load::<TestBackend>(&config, &device).unwrap();

		let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
		let expected = model.probabilities(images.clone()).into_data().to_vec::<f32>().unwrap();
		let actual = loaded.probabilities(images).into_data().to_vec::<f32>().unwrap();
		for (a, b) in expected.iter().zip(actual.iter()) {
			assert!((a - b).abs() < 1e-2);
		}
	}

	#[test]
	fn default_config_is_a_resnet50_classifier() {
		let config = FashionClassifierConfig::default();
		assert_eq!(config.backbone.kind, BlockKind::Bottleneck);
		assert!(config.backbone.pretrained_weights().is_some());

		let device = Default::default();
		let model = WeightSource::Random.load::<TestBackend>(&config, &device).unwrap();

		let images = Tensor::<TestBackend, 4>::zeros([1, 3, 224, 224], &device);
		assert_eq!(model.forward(images).dims(), [1, NUM_CLASSES]);
	}

	#[test]
	fn bottleneck_backbone_loads_from_torch_checkpoint() {
		let device = Default::default();
		let model = small_config().init_from_backbone_checkpoint::<TestBackend>(&small_checkpoint(), &device).unwrap();

		let images = Tensor::<TestBackend, 4>::ones([1, 3, 64, 64], &device);
		let probabilities = model.probabilities(images).into_data().to_vec::<f32>().unwrap();
		assert_eq!(probabilities.len(), NUM_CLASSES);
		assert!((probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-3);
	}

	#[test]
	fn pretrained_needs_a_published_checkpoint() {
		let device = Default::default();
		let result = WeightSource::Pretrained.load::<TestBackend>(&small_config(), &device);
		assert!(matches!(result, Err(RecorderError::Unknown(message)) if message.contains("No pretrained weights")));
	}
}
