//! HTTP surface and per-request orchestration.
//!
//! Every failure on `/predict` becomes `500 {"detail": ...}`, whether the client
//! sent a broken upload or inference failed.

use crate::predictor::{arg_max, Classifier, PredictError};
use crate::preprocess::{PreprocessError, Preprocessor};
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fashion_common::ClassLabels;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const HEALTH_MESSAGE: &str = "API Endpoit up and running";
pub const UPLOAD_FIELD: &str = "file";
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ServiceError {
	#[error("{0}")]
	Upload(String),
	#[error(transparent)]
	Preprocess(#[from] PreprocessError),
	#[error(transparent)]
	Predict(#[from] PredictError),
	#[error("Model returned {scores} scores for {labels} class labels")]
	LabelMismatch { scores: usize, labels: usize },
	#[error("Prediction task failed: {0}")]
	Task(String),
}

impl IntoResponse for ServiceError {
	fn into_response(self) -> Response {
		error!("An error occurred during prediction: {self}");

		let body = Json(json!({ "detail": self.to_string() }));
		(StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
	}
}

impl From<MultipartRejection> for ServiceError {
	fn from(rejection: MultipartRejection) -> Self {
		ServiceError::Upload(rejection.body_text())
	}
}

/// Request lifecycle, used to tag log lines and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	Received,
	Preprocessing,
	Inferring,
	LabelDecoding,
	Responded,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// One uploaded file, fully buffered.
#[derive(Debug, Clone)]
pub struct Upload {
	pub filename: Option<String>,
	pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
	pub filename: Option<String>,
	pub predicted_class: String,
}

/// Preprocess, classify, decode. Shared read-only by every request.
pub struct PredictionService {
	preprocessor: Preprocessor,
	classifier: Arc<dyn Classifier>,
	labels: ClassLabels,
}

impl PredictionService {
	pub fn new(preprocessor: Preprocessor, classifier: Arc<dyn Classifier>, labels: ClassLabels) -> Self {
		Self { preprocessor, classifier, labels }
	}

	pub fn handle(&self, upload: Upload) -> Result<Prediction, ServiceError> {
		let filename = upload.filename.as_deref().unwrap_or("<unnamed>");
		debug!("{} {filename} ({} bytes)", Stage::Received, upload.bytes.len());

		debug!("{} {filename}", Stage::Preprocessing);
		let input = self.preprocessor.preprocess(&upload.bytes)?;

		debug!("{} {filename}", Stage::Inferring);
		let probabilities = self.classifier.predict(input)?;
		info!("Prediction made with probabilities: {probabilities:?}");

		debug!("{} {filename}", Stage::LabelDecoding);
		let predicted_class = self.decode(&probabilities)?;
		info!("Predicted class: {predicted_class}");

		debug!("{} {filename}", Stage::Responded);
		Ok(Prediction { filename: upload.filename, predicted_class: predicted_class.to_string() })
	}

	fn decode(&self, probabilities: &[f32]) -> Result<&'static str, ServiceError> {
		let mismatch = || ServiceError::LabelMismatch { scores: probabilities.len(), labels: self.labels.len() };

		if probabilities.len() != self.labels.len() {
			return Err(mismatch());
		}

		arg_max(probabilities).and_then(|index| self.labels.get(index)).ok_or_else(mismatch)
	}
}

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<PredictionService>,
}

impl AppState {
	pub fn new(service: PredictionService) -> Self {
		Self { service: Arc::new(service) }
	}
}

pub fn create_router(state: AppState, body_limit: usize) -> Router {
	Router::new()
		.route("/", get(root))
		.route("/predict", post(predict))
		.layer(DefaultBodyLimit::max(body_limit))
		.with_state(state)
}

async fn root() -> Json<serde_json::Value> {
	Json(json!({ "message": HEALTH_MESSAGE }))
}

async fn predict(
	State(state): State<AppState>,
	multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, ServiceError> {
	let upload = read_upload(multipart?).await?;

	let service = state.service.clone();
	let prediction = tokio::task::spawn_blocking(move || service.handle(upload))
		.await
		.map_err(|err| ServiceError::Task(err.to_string()))??;

	Ok(Json(prediction))
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ServiceError> {
	while let Some(field) = multipart.next_field().await.map_err(|err| ServiceError::Upload(err.body_text()))? {
		if field.name() != Some(UPLOAD_FIELD) {
			continue;
		}

		let filename = field.file_name().map(str::to_string);
		let bytes = field.bytes().await.map_err(|err| ServiceError::Upload(err.body_text()))?;

		return Ok(Upload { filename, bytes });
	}

	Err(ServiceError::Upload(format!("Missing multipart field `{UPLOAD_FIELD}`")))
}
