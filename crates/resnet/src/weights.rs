use burn::data::network::downloader;
use log::info;
use std::fs::{self, create_dir_all, File};
use std::io::{Error, ErrorKind, Write};
use std::path::{Path, PathBuf};

const CACHE_DIR: &str = "resnet-burn";

/// A torchvision checkpoint and the number of classes its original head predicts.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
	pub url: &'static str,
	pub num_classes: usize,
}

impl Weights {
	pub fn file_name(&self) -> &'static str {
		self.url.rsplit_once('/').map_or(self.url, |(_, name)| name)
	}

	/// Download the checkpoint into `~/.cache/resnet-burn` unless it is already there.
	pub fn download(&self) -> Result<PathBuf, Error> {
		let model_dir = dirs::home_dir()
			.ok_or_else(|| Error::new(ErrorKind::NotFound, "Could not locate the home directory"))?
			.join(".cache")
			.join(CACHE_DIR);

		if !model_dir.exists() {
			create_dir_all(&model_dir)?;
		}

		let file_name = model_dir.join(self.file_name());
		if file_name.exists() {
			info!("Using cached weights {}", file_name.display());
			return Ok(file_name);
		}

		info!("Downloading weights from {}", self.url);
		let bytes = downloader::download_file_as_bytes(self.url, self.file_name());

		write_cached(&file_name, &bytes)?;

		Ok(file_name)
	}
}

/// Write `bytes` to `<path>.part`, then rename it to `path`. `path` only ever
/// holds a complete file.
fn write_cached(path: &Path, bytes: &[u8]) -> Result<(), Error> {
	let mut partial = path.as_os_str().to_owned();
	partial.push(".part");
	let partial = PathBuf::from(partial);

	let mut output_file = File::create(&partial)?;
	output_file.write_all(bytes)?;
	output_file.sync_all()?;
	drop(output_file);

	fs::rename(&partial, path)
}

pub trait WeightsMeta {
	fn weights(&self) -> Weights;
}

#[derive(Debug, Clone, Copy)]
pub enum ResNet18 {
	/// Top-1 accuracy: 69.758%. Top-5 accuracy: 89.078%.
	ImageNet1kV1,
}

impl WeightsMeta for ResNet18 {
	fn weights(&self) -> Weights {
		Weights {
			url: "https://download.pytorch.org/models/resnet18-f37072fd.pth",
			num_classes: 1000,
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub enum ResNet50 {
	/// Top-1 accuracy: 76.130%. Top-5 accuracy: 92.862%.
	ImageNet1kV1,
}

impl WeightsMeta for ResNet50 {
	fn weights(&self) -> Weights {
		Weights {
			url: "https://download.pytorch.org/models/resnet50-0676ba61.pth",
			num_classes: 1000,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_names_come_from_urls() {
		assert_eq!(ResNet50::ImageNet1kV1.weights().file_name(), "resnet50-0676ba61.pth");
		assert_eq!(ResNet18::ImageNet1kV1.weights().file_name(), "resnet18-f37072fd.pth");
		assert_eq!(ResNet18::ImageNet1kV1.weights().num_classes, 1000);
	}

	#[test]
	fn cached_file_appears_whole() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("resnet50-0676ba61.pth");

		write_cached(&path, b"first").unwrap();
		write_cached(&path, b"second download").unwrap();

		assert_eq!(fs::read(&path).unwrap(), b"second download");
		let names = fs::read_dir(dir.path())
			.unwrap()
			.map(|entry| entry.unwrap().file_name())
			.collect::<Vec<_>>();
		assert_eq!(names, vec![std::ffi::OsString::from("resnet50-0676ba61.pth")]);
	}

	#[test]
	fn failed_write_leaves_no_cache_entry() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("missing").join("weights.pth");

		assert!(write_cached(&path, b"bytes").is_err());
		assert!(!path.exists());
	}
}
