use burn::train::renderer::{MetricState, MetricsRenderer, TrainingProgress};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const LOSS: &str = "Loss";
pub const ACCURACY: &str = "Accuracy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
	Train,
	Valid,
}

#[derive(Debug, Default)]
struct Running {
	sum: f64,
	weight: f64,
}

impl Running {
	fn mean(&self) -> Option<f64> {
		(self.weight > 0.0).then(|| self.sum / self.weight)
	}
}

#[derive(Debug, Default)]
struct SplitState {
	pending: Vec<(String, f64)>,
	last_epoch: usize,
	last_processed: usize,
}

/// Item-weighted means of every numeric metric, per epoch and split.
#[derive(Debug, Default)]
pub struct EpochMeans {
	epochs: BTreeMap<usize, HashMap<(Split, String), Running>>,
	splits: HashMap<Split, SplitState>,
}

impl EpochMeans {
	fn update(&mut self, split: Split, state: MetricState) {
		if let MetricState::Numeric(entry, value) = state {
			self.splits.entry(split).or_default().pending.push((entry.name, value));
		}
	}

	fn render(&mut self, split: Split, progress: &TrainingProgress) -> Vec<(String, f64)> {
		let state = self.splits.entry(split).or_default();
		if state.last_epoch != progress.epoch || progress.progress.items_processed < state.last_processed {
			state.last_epoch = progress.epoch;
			state.last_processed = 0;
		}

		let items = progress.progress.items_processed.saturating_sub(state.last_processed).max(1);
		state.last_processed = progress.progress.items_processed;

		let pending = std::mem::take(&mut state.pending);
		let epoch = self.epochs.entry(progress.epoch).or_default();
		for (name, value) in &pending {
			let running = epoch.entry((split, name.clone())).or_default();
			running.sum += value * items as f64;
			running.weight += items as f64;
		}

		pending
	}

	/// Epoch numbers seen so far, in order.
	pub fn epochs(&self) -> Vec<usize> {
		self.epochs.keys().copied().collect()
	}

	pub fn mean(&self, epoch: usize, split: Split, metric: &str) -> Option<f64> {
		self.epochs.get(&epoch)?.get(&(split, metric.to_string()))?.mean()
	}
}

/// Sends learner progress to `log` instead of a terminal UI, and keeps per-epoch means.
#[derive(Debug, Clone, Default)]
pub struct LogRenderer {
	means: Arc<Mutex<EpochMeans>>,
}

impl LogRenderer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Shared view of the means, still readable after the renderer moves into the learner.
	pub fn means(&self) -> Arc<Mutex<EpochMeans>> {
		self.means.clone()
	}

	fn update(&self, split: Split, state: MetricState) {
		if let Ok(mut means) = self.means.lock() {
			means.update(split, state);
		}
	}

	fn render(&self, split: Split, progress: TrainingProgress) {
		let Ok(mut means) = self.means.lock() else {
			return;
		};
		let values = means.render(split, &progress);

		let summary = values
			.iter()
			.map(|(name, value)| format!("{name}: {value:.4}"))
			.collect::<Vec<_>>()
			.join(", ");
		debug!(
			"{split:?} epoch {}/{} iteration {} [{}/{}] {summary}",
			progress.epoch,
			progress.epoch_total,
			progress.iteration,
			progress.progress.items_processed,
			progress.progress.items_total,
		);

		if progress.progress.items_processed >= progress.progress.items_total {
			let loss = means.mean(progress.epoch, split, LOSS).unwrap_or(f64::NAN);
			let accuracy = means.mean(progress.epoch, split, ACCURACY).unwrap_or(f64::NAN);
			info!(
				"Epoch {}/{} {split:?} - loss: {loss:.4} - accuracy: {:.4}",
				progress.epoch,
				progress.epoch_total,
				accuracy / 100.0,
			);
		}
	}
}

impl MetricsRenderer for LogRenderer {
	fn update_train(&mut self, state: MetricState) {
		self.update(Split::Train, state);
	}

	fn update_valid(&mut self, state: MetricState) {
		self.update(Split::Valid, state);
	}

	fn render_train(&mut self, item: TrainingProgress) {
		self.render(Split::Train, item);
	}

	fn render_valid(&mut self, item: TrainingProgress) {
		self.render(Split::Valid, item);
	}
}
