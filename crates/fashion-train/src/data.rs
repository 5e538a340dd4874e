use burn::data::dataloader::batcher::Batcher;
use burn::data::network::downloader;
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::TensorData;
use fashion_common::NUM_CLASSES;
use flate2::read::GzDecoder;
use log::{debug, info};
use std::fs::{self, create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const PIXELS: usize = WIDTH * HEIGHT;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

const BASE_URL: &str = "https://raw.githubusercontent.com/zalandoresearch/fashion-mnist/master/data/fashion";
const CACHE_DIR: &str = "fashion-mnist-burn";

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

#[derive(Debug, Error)]
pub enum DataError {
	#[error("Could not read {path}: {source}")]
	Io { path: PathBuf, source: std::io::Error },
	#[error("Invalid IDX data: {0}")]
	InvalidIdx(String),
	#[error("Invalid split: validation {validation} and test {test} must be non-negative and leave a non-empty training share")]
	InvalidSplit { validation: f64, test: f64 },
	#[error("{images} images but {labels} labels")]
	LabelCount { images: usize, labels: usize },
	#[error("The {0} partition is empty")]
	EmptyPartition(&'static str),
}

/// One 28x28 grayscale image with pixels scaled to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FashionMnistItem {
	pub image: [[f32; WIDTH]; HEIGHT],
	pub label: u8,
}

impl FashionMnistItem {
	pub fn from_pixels(pixels: &[u8; PIXELS], label: u8) -> Self {
		let mut image = [[0.0; WIDTH]; HEIGHT];
		for (row, chunk) in image.iter_mut().zip(pixels.chunks_exact(WIDTH)) {
			for (value, pixel) in row.iter_mut().zip(chunk) {
				*value = *pixel as f32 / 255.0;
			}
		}

		Self { image, label }
	}
}

/// Unnormalized images and labels, as stored on disk.
#[derive(Debug, Clone, Default)]
pub struct RawPartition {
	pub images: Vec<[u8; PIXELS]>,
	pub labels: Vec<u8>,
}

impl RawPartition {
	pub fn len(&self) -> usize {
		self.images.len()
	}

	pub fn is_empty(&self) -> bool {
		self.images.is_empty()
	}

	pub fn into_items(self) -> Result<Vec<FashionMnistItem>, DataError> {
		if self.images.len() != self.labels.len() {
			return Err(DataError::LabelCount { images: self.images.len(), labels: self.labels.len() });
		}

		self.images
			.iter()
			.zip(self.labels)
			.map(|(pixels, label)| {
				if label as usize >= NUM_CLASSES {
					return Err(DataError::InvalidIdx(format!("label {label} out of range")));
				}
				Ok(FashionMnistItem::from_pixels(pixels, label))
			})
			.collect()
	}
}

/// The canonical train and test partitions of a dataset.
pub trait DatasetSource {
	fn load(&self) -> Result<(RawPartition, RawPartition), DataError>;
}

/// Fashion-MNIST from the Zalando mirror, cached in `~/.cache/fashion-mnist-burn`.
#[derive(Debug, Clone, Default)]
pub struct FashionMnistSource {
	cache_dir: Option<PathBuf>,
}

impl FashionMnistSource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_cache_dir<P: Into<PathBuf>>(cache_dir: P) -> Self {
		Self { cache_dir: Some(cache_dir.into()) }
	}

	fn cache_dir(&self) -> Result<PathBuf, DataError> {
		if let Some(dir) = &self.cache_dir {
			return Ok(dir.clone());
		}

		dirs::home_dir()
			.map(|home| home.join(".cache").join(CACHE_DIR))
			.ok_or_else(|| DataError::Io {
				path: PathBuf::from("~"),
				source: std::io::Error::new(std::io::ErrorKind::NotFound, "Could not locate the home directory"),
			})
	}

	fn partition(&self, dir: &Path, images: &str, labels: &str) -> Result<RawPartition, DataError> {
		let images = parse_idx_images(&download(dir, images)?)?;
		let labels = parse_idx_labels(&download(dir, labels)?)?;

		if images.len() != labels.len() {
			return Err(DataError::LabelCount { images: images.len(), labels: labels.len() });
		}

		Ok(RawPartition { images, labels })
	}
}

impl DatasetSource for FashionMnistSource {
	fn load(&self) -> Result<(RawPartition, RawPartition), DataError> {
		let dir = self.cache_dir()?;
		if !dir.exists() {
			create_dir_all(&dir).map_err(|source| DataError::Io { path: dir.clone(), source })?;
		}

		let train = self.partition(&dir, TRAIN_IMAGES, TRAIN_LABELS)?;
		let test = self.partition(&dir, TEST_IMAGES, TEST_LABELS)?;
		info!("Loaded Fashion-MNIST: {} train and {} test images", train.len(), test.len());

		Ok((train, test))
	}
}

/// Fetch `<name>.gz` into `dir` unless cached, and return the decompressed bytes.
fn download(dir: &Path, name: &str) -> Result<Vec<u8>, DataError> {
	let file_name = format!("{name}.gz");
	let path = dir.join(&file_name);
	let io = |source| DataError::Io { path: path.clone(), source };

	if !path.exists() {
		let url = format!("{BASE_URL}/{file_name}");
		info!("Downloading {url}");
		let bytes = downloader::download_file_as_bytes(&url, &file_name);

		write_cached(&path, &bytes).map_err(io)?;
	} else {
		debug!("Using cached {}", path.display());
	}

	let mut decoded = Vec::new();
	GzDecoder::new(File::open(&path).map_err(io)?).read_to_end(&mut decoded).map_err(io)?;
	Ok(decoded)
}

// Readers of `path` never see a partial download.
fn write_cached(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
	let partial = path.with_extension("gz.part");

	let mut file = File::create(&partial)?;
	file.write_all(bytes)?;
	file.sync_all()?;
	drop(file);

	fs::rename(&partial, path)
}

/// Partitions handed over directly, for tests and custom data.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
	pub train: RawPartition,
	pub test: RawPartition,
}

impl InMemorySource {
	pub fn new(train: RawPartition, test: RawPartition) -> Self {
		Self { train, test }
	}
}

impl DatasetSource for InMemorySource {
	fn load(&self) -> Result<(RawPartition, RawPartition), DataError> {
		Ok((self.train.clone(), self.test.clone()))
	}
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, DataError> {
	bytes
		.get(offset..offset + 4)
		.map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
		.ok_or_else(|| DataError::InvalidIdx(format!("header truncated at byte {offset}")))
}

fn check_magic(bytes: &[u8], expected: u32) -> Result<(), DataError> {
	let magic = read_u32(bytes, 0)?;
	if magic != expected {
		return Err(DataError::InvalidIdx(format!("magic number {magic:#010x}, expected {expected:#010x}")));
	}
	Ok(())
}

pub fn parse_idx_images(bytes: &[u8]) -> Result<Vec<[u8; PIXELS]>, DataError> {
	check_magic(bytes, IMAGES_MAGIC)?;
	let count = read_u32(bytes, 4)? as usize;
	let rows = read_u32(bytes, 8)? as usize;
	let cols = read_u32(bytes, 12)? as usize;

	if (rows, cols) != (HEIGHT, WIDTH) {
		return Err(DataError::InvalidIdx(format!("images are {rows}x{cols}, expected {HEIGHT}x{WIDTH}")));
	}

	let body = &bytes[16..];
	if body.len() != count * PIXELS {
		return Err(DataError::InvalidIdx(format!("expected {} pixel bytes, found {}", count * PIXELS, body.len())));
	}

	Ok(body
		.chunks_exact(PIXELS)
		.map(|chunk| {
			let mut pixels = [0u8; PIXELS];
			pixels.copy_from_slice(chunk);
			pixels
		})
		.collect())
}

pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>, DataError> {
	check_magic(bytes, LABELS_MAGIC)?;
	let count = read_u32(bytes, 4)? as usize;

	let body = &bytes[8..];
	if body.len() != count {
		return Err(DataError::InvalidIdx(format!("expected {count} labels, found {}", body.len())));
	}

	Ok(body.to_vec())
}

/// Proportions of the training partition held out for validation and testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitProportions {
	pub validation: f64,
	pub test: f64,
}

impl SplitProportions {
	pub fn new(validation: f64, test: f64) -> Result<Self, DataError> {
		let train = 1.0 - validation - test;
		let valid = validation.is_finite() && test.is_finite() && validation >= 0.0 && test >= 0.0;

		if !valid || train <= 0.0 || train > 1.0 {
			return Err(DataError::InvalidSplit { validation, test });
		}

		Ok(Self { validation, test })
	}

	/// Number of leading items kept for training out of `len`.
	pub fn train_len(&self, len: usize) -> usize {
		((1.0 - self.validation - self.test) * len as f64).floor() as usize
	}
}

#[derive(Debug, Clone, Default)]
pub struct DatasetSplit {
	pub train: Vec<FashionMnistItem>,
	pub valid: Vec<FashionMnistItem>,
	pub test: Vec<FashionMnistItem>,
}

impl DatasetSplit {
	/// Without `proportions` the whole training partition is used and `valid` stays empty.
	pub fn new(
		mut train: Vec<FashionMnistItem>,
		test: Vec<FashionMnistItem>,
		proportions: Option<SplitProportions>,
	) -> Result<Self, DataError> {
		let valid = match proportions {
			Some(proportions) => {
				let cut = proportions.train_len(train.len());
				train.split_off(cut)
			}
			None => Vec::new(),
		};

		if train.is_empty() {
			return Err(DataError::EmptyPartition("train"));
		}

		Ok(Self { train, valid, test })
	}

	pub fn len(&self) -> usize {
		self.train.len() + self.valid.len() + self.test.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[derive(Clone, Debug)]
pub struct FashionBatcher<B: Backend> {
	device: B::Device,
}

impl<B: Backend> FashionBatcher<B> {
	pub fn new(device: B::Device) -> Self {
		Self { device }
	}
}

#[derive(Clone, Debug)]
pub struct FashionBatch<B: Backend> {
	pub images: Tensor<B, 3>,
	pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<FashionMnistItem, FashionBatch<B>> for FashionBatcher<B> {
	fn batch(&self, items: Vec<FashionMnistItem>) -> FashionBatch<B> {
		let pixels = items
			.iter()
			.flat_map(|item| item.image.iter().flatten().copied())
			.collect::<Vec<f32>>();
		let labels = items.iter().map(|item| item.label as i64).collect::<Vec<i64>>();

		let images = TensorData::new(pixels, [items.len(), HEIGHT, WIDTH]).convert::<B::FloatElem>();
		let targets = TensorData::new(labels, [items.len()]).convert::<B::IntElem>();

		FashionBatch {
			images: Tensor::from_data(images, &self.device),
			targets: Tensor::from_data(targets, &self.device),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use burn::backend::NdArray;
	use flate2::write::GzEncoder;
	use flate2::Compression;

	fn idx_images(count: u32, rows: u32, cols: u32, body: &[u8]) -> Vec<u8> {
		let mut bytes = Vec::new();
		for value in [IMAGES_MAGIC, count, rows, cols] {
			bytes.extend_from_slice(&value.to_be_bytes());
		}
		bytes.extend_from_slice(body);
		bytes
	}

	fn idx_labels(labels: &[u8]) -> Vec<u8> {
		let mut bytes = LABELS_MAGIC.to_be_bytes().to_vec();
		bytes.extend_from_slice(&(labels.len() as u32).to_be_bytes());
		bytes.extend_from_slice(labels);
		bytes
	}

	fn items(count: usize) -> Vec<FashionMnistItem> {
		(0..count).map(|i| FashionMnistItem::from_pixels(&[i as u8; PIXELS], (i % 10) as u8)).collect()
	}

	#[test]
	fn parses_images_and_labels() {
		let mut body = vec![0u8; 2 * PIXELS];
		body[PIXELS] = 255;

		let images = parse_idx_images(&idx_images(2, 28, 28, &body)).unwrap();
		assert_eq!(images.len(), 2);
		assert_eq!(images[1][0], 255);

		assert_eq!(parse_idx_labels(&idx_labels(&[9, 0, 4])).unwrap(), vec![9, 0, 4]);
	}

	#[test]
	fn rejects_malformed_idx() {
		let mut wrong_magic = idx_images(0, 28, 28, &[]);
		wrong_magic[3] = 0x01;
		assert!(matches!(parse_idx_images(&wrong_magic), Err(DataError::InvalidIdx(_))));

		assert!(matches!(parse_idx_images(&idx_images(1, 32, 32, &[0; 1024])), Err(DataError::InvalidIdx(_))));
		assert!(matches!(parse_idx_images(&idx_images(2, 28, 28, &[0; PIXELS])), Err(DataError::InvalidIdx(_))));
		assert!(matches!(parse_idx_labels(&[0, 0, 8]), Err(DataError::InvalidIdx(_))));
	}

	#[test]
	fn pixels_are_scaled_to_unit_range() {
		let mut pixels = [0u8; PIXELS];
		pixels[0] = 255;
		pixels[WIDTH + 1] = 51;

		let item = FashionMnistItem::from_pixels(&pixels, 3);
		assert_eq!(item.image[0][0], 1.0);
		assert!((item.image[1][1] - 0.2).abs() < 1e-6);
		assert_eq!(item.image[27][27], 0.0);
	}

	#[test]
	fn raw_partitions_validate_labels() {
		let mismatched = RawPartition { images: vec![[0; PIXELS]; 2], labels: vec![1] };
		assert!(matches!(mismatched.into_items(), Err(DataError::LabelCount { images: 2, labels: 1 })));

		let out_of_range = RawPartition { images: vec![[0; PIXELS]], labels: vec![10] };
		assert!(matches!(out_of_range.into_items(), Err(DataError::InvalidIdx(_))));
	}

	#[test]
	fn split_proportions_must_leave_training_data() {
		assert!(SplitProportions::new(0.1, 0.2).is_ok());
		assert!(SplitProportions::new(0.0, 0.0).is_ok());

		for (validation, test) in [(0.5, 0.5), (0.7, 0.4), (-0.1, 0.2), (0.1, -0.3), (f64::NAN, 0.1)] {
			assert!(matches!(
				SplitProportions::new(validation, test),
				Err(DataError::InvalidSplit { .. })
			));
		}
	}

	#[test]
	fn split_slices_the_training_partition() {
		let proportions = SplitProportions::new(0.1, 0.2).unwrap();
		let split = DatasetSplit::new(items(100), items(15), Some(proportions)).unwrap();

		assert_eq!(split.train.len(), 70);
		assert_eq!(split.valid.len(), 30);
		assert_eq!(split.test.len(), 15);
		assert_eq!(split.len(), 115);
		assert_eq!(split.valid[0], items(100)[70]);
	}

	#[test]
	fn split_without_holdout_keeps_everything() {
		let split = DatasetSplit::new(items(33), items(5), None).unwrap();
		assert_eq!(split.train.len(), 33);
		assert!(split.valid.is_empty());
	}

	#[test]
	fn split_rejects_an_empty_training_share() {
		let proportions = SplitProportions::new(0.5, 0.45).unwrap();
		assert!(matches!(
			DatasetSplit::new(items(10), items(1), Some(proportions)),
			Err(DataError::EmptyPartition("train"))
		));
	}

	#[test]
	fn batches_images_and_targets() {
		let batcher = FashionBatcher::<NdArray<f32>>::new(Default::default());
		let batch = batcher.batch(items(4));

		assert_eq!(batch.images.dims(), [4, 28, 28]);
		assert_eq!(batch.targets.into_data().to_vec::<i64>().unwrap(), vec![0, 1, 2, 3]);
	}

	#[test]
	fn cached_archives_are_decoded_without_downloading() {
		let dir = tempfile::tempdir().unwrap();
		let labels = idx_labels(&[3, 1, 4]);

		let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
		encoder.write_all(&labels).unwrap();
		write_cached(&dir.path().join("t10k-labels-idx1-ubyte.gz"), &encoder.finish().unwrap()).unwrap();

		let decoded = download(dir.path(), "t10k-labels-idx1-ubyte").unwrap();
		assert_eq!(parse_idx_labels(&decoded).unwrap(), vec![3, 1, 4]);
		assert!(!dir.path().join("t10k-labels-idx1-ubyte.gz.part").exists());
	}
}
