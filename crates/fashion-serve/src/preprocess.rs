use burn::tensor::TensorData;
use image::imageops::FilterType;
use log::{error, info};
use thiserror::Error;

pub const SIDE: u32 = 224;

// torchvision ImageNet statistics, RGB, on the [0, 1] scale.
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
// Caffe-style ResNet statistics, BGR, on the [0, 255] scale.
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

#[derive(Debug, Error)]
pub enum PreprocessError {
	#[error("Could not decode image: {0}")]
	Decode(String),
	#[error("Invalid image dimensions {width}x{height}")]
	Resize { width: u32, height: u32 },
}

/// Per-channel input normalization expected by the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
	/// `(x / 255 - mean) / std` on RGB, for torchvision-trained weights.
	#[default]
	ImageNet,
	/// RGB to BGR, then `x - mean` without scaling, for Caffe/Keras ResNet weights.
	Caffe,
}

impl Normalization {
	fn apply(&self, [r, g, b]: [u8; 3]) -> [f32; 3] {
		let rgb = [r as f32, g as f32, b as f32];
		match self {
			Normalization::ImageNet => {
				[0, 1, 2].map(|c| (rgb[c] / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c])
			}
			Normalization::Caffe => {
				let bgr = [rgb[2], rgb[1], rgb[0]];
				[0, 1, 2].map(|c| bgr[c] - CAFFE_MEAN_BGR[c])
			}
		}
	}
}

/// Turns encoded image bytes into a `[1, height, width, 3]` model input.
#[derive(Debug, Clone)]
pub struct Preprocessor {
	width: u32,
	height: u32,
	filter: FilterType,
	normalization: Normalization,
}

impl Default for Preprocessor {
	fn default() -> Self {
		Self {
			width: SIDE,
			height: SIDE,
			filter: FilterType::Nearest,
			normalization: Normalization::default(),
		}
	}
}

impl Preprocessor {
	pub fn new(width: u32, height: u32) -> Result<Self, PreprocessError> {
		if width == 0 || height == 0 {
			return Err(PreprocessError::Resize { width, height });
		}

		Ok(Self { width, height, ..Self::default() })
	}

	pub fn with_filter(mut self, filter: FilterType) -> Self {
		self.filter = filter;
		self
	}

	pub fn with_normalization(mut self, normalization: Normalization) -> Self {
		self.normalization = normalization;
		self
	}

	/// Shape of every tensor this preprocessor produces.
	pub fn output_shape(&self) -> [usize; 4] {
		[1, self.height as usize, self.width as usize, 3]
	}

	pub fn preprocess(&self, bytes: &[u8]) -> Result<TensorData, PreprocessError> {
		self.run(bytes)
			.inspect(|_| info!("Image preprocessing successful"))
			.inspect_err(|err| error!("An error occurred during image preprocessing: {err}"))
	}

	fn run(&self, bytes: &[u8]) -> Result<TensorData, PreprocessError> {
		let image = image::load_from_memory(bytes).map_err(|err| PreprocessError::Decode(err.to_string()))?;

		if image.width() == 0 || image.height() == 0 {
			return Err(PreprocessError::Resize { width: image.width(), height: image.height() });
		}

		let image = image.resize_exact(self.width, self.height, self.filter).into_rgb8();

		let values = image
			.pixels()
			.flat_map(|pixel| self.normalization.apply(pixel.0))
			.collect::<Vec<f32>>();

		Ok(TensorData::new(values, self.output_shape()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
	use std::io::Cursor;

	fn encoded(width: u32, height: u32, color: [u8; 3], format: ImageFormat) -> Vec<u8> {
		let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
		let mut bytes = Vec::new();
		image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
		bytes
	}

	#[test]
	fn output_shape_is_fixed_for_any_input_size() {
		let preprocessor = Preprocessor::default();

		for (w, h) in [(1, 1), (28, 28), (224, 224), (640, 480), (50, 300)] {
			let data = preprocessor.preprocess(&encoded(w, h, [120, 30, 200], ImageFormat::Png)).unwrap();
			assert_eq!(data.shape, vec![1, 224, 224, 3]);
			assert_eq!(data.num_elements(), 224 * 224 * 3);
		}
	}

	#[test]
	fn imagenet_values_are_normalized() {
		let preprocessor = Preprocessor::new(32, 16).unwrap();
		let data = preprocessor.preprocess(&encoded(64, 64, [255, 255, 255], ImageFormat::Png)).unwrap();
		assert_eq!(data.shape, vec![1, 16, 32, 3]);

		let values = data.to_vec::<f32>().unwrap();
		let expected = [0, 1, 2].map(|c| (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
		for pixel in values.chunks(3) {
			for c in 0..3 {
				assert!((pixel[c] - expected[c]).abs() < 1e-5);
			}
		}
		assert!(values.iter().all(|v| *v < 3.0 && *v > -3.0));
	}

	#[test]
	fn caffe_mode_swaps_channels_and_centers() {
		let preprocessor = Preprocessor::new(4, 4).unwrap().with_normalization(Normalization::Caffe);
		let data = preprocessor.preprocess(&encoded(8, 8, [10, 20, 30], ImageFormat::Png)).unwrap();

		let values = data.to_vec::<f32>().unwrap();
		assert!((values[0] - (30.0 - 103.939)).abs() < 1e-4);
		assert!((values[1] - (20.0 - 116.779)).abs() < 1e-4);
		assert!((values[2] - (10.0 - 123.68)).abs() < 1e-4);
	}

	#[test]
	fn decodes_other_formats() {
		let preprocessor = Preprocessor::new(8, 8).unwrap().with_filter(FilterType::Triangle);
		let data = preprocessor.preprocess(&encoded(20, 10, [0, 0, 0], ImageFormat::Jpeg)).unwrap();
		assert_eq!(data.shape, vec![1, 8, 8, 3]);
	}

	#[test]
	fn undecodable_bytes_fail() {
		let preprocessor = Preprocessor::default();
		let png = encoded(16, 16, [1, 2, 3], ImageFormat::Png);

		assert!(matches!(preprocessor.preprocess(&[]), Err(PreprocessError::Decode(_))));
		assert!(matches!(preprocessor.preprocess(b"definitely not an image"), Err(PreprocessError::Decode(_))));
		assert!(matches!(preprocessor.preprocess(&png[..png.len() / 2]), Err(PreprocessError::Decode(_))));
	}

	#[test]
	fn zero_target_size_is_rejected() {
		assert!(matches!(Preprocessor::new(0, 224), Err(PreprocessError::Resize { width: 0, height: 224 })));
		assert!(matches!(Preprocessor::new(224, 0), Err(PreprocessError::Resize { .. })));
	}
}
