pub const NUM_CLASSES: usize = 10;

pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
	"T-shirt/top",
	"Trouser",
	"Pullover",
	"Dress",
	"Coat",
	"Sandal",
	"Shirt",
	"Sneaker",
	"Bag",
	"Ankle boot",
];

/// Index-aligned names for the classifier's output vector.
#[derive(Debug, Clone, Copy)]
pub struct ClassLabels {
	names: &'static [&'static str],
}

impl ClassLabels {
	pub fn fashion() -> Self {
		Self { names: &CLASS_NAMES }
	}

	pub fn get(&self, index: usize) -> Option<&'static str> {
		self.names.get(index).copied()
	}

	pub fn len(&self) -> usize {
		self.names.len()
	}

	pub fn is_empty(&self) -> bool {
		self.names.is_empty()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.names.contains(&name)
	}
}

impl Default for ClassLabels {
	fn default() -> Self {
		Self::fashion()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_order() {
		let labels = ClassLabels::fashion();
		assert_eq!(labels.len(), NUM_CLASSES);
		assert_eq!(labels.get(0), Some("T-shirt/top"));
		assert_eq!(labels.get(7), Some("Sneaker"));
		assert_eq!(labels.get(9), Some("Ankle boot"));
		assert_eq!(labels.get(10), None);
		assert!(labels.contains("Bag"));
	}
}
