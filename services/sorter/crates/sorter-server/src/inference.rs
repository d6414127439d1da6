//! Inference provider port and the model-server client behind it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use smartbin_common::WasteClass;
use thiserror::Error;

use crate::intake::ImageTensor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("model server unavailable: {0}")]
    Unavailable(String),

    #[error("model server returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed model output: {0}")]
    Malformed(String),
}

/// Scores one preprocessed image. The score is the probability of
/// class `1` (non-biodegradable).
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn predict(&self, tensor: &ImageTensor) -> Result<f32, InferenceError>;
}

/// Round a score to a class index, ties to even: `0.5` is biodegradable.
pub fn probability_to_class(probability: f32) -> Result<WasteClass, InferenceError> {
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        return Err(InferenceError::Malformed(format!(
            "score {probability} is outside [0, 1]"
        )));
    }
    let index = u8::from(probability.round_ties_even() >= 1.0);
    WasteClass::from_index(index)
        .ok_or_else(|| InferenceError::Malformed(format!("no class for index {index}")))
}

/// Score an image and map it to a class.
pub async fn classify(
    classifier: &dyn Classifier,
    tensor: &ImageTensor,
) -> Result<WasteClass, InferenceError> {
    let probability = classifier.predict(tensor).await?;
    let label = probability_to_class(probability)?;
    tracing::info!(probability, waste_type = %label, "image classified");
    Ok(label)
}

/// TensorFlow-Serving style REST predict endpoint:
/// `POST {url}` with `{"instances": [tensor]}`, answered by
/// `{"predictions": [[score]]}`.
#[derive(Debug, Clone)]
pub struct RemoteModel {
    client: Client,
    url: Url,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: [&'a [Vec<[f32; 3]>]; 1],
}

impl RemoteModel {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let url = Url::parse(url)
            .map_err(|e| InferenceError::Unavailable(format!("invalid model URL '{url}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Unavailable(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Classifier for RemoteModel {
    async fn predict(&self, tensor: &ImageTensor) -> Result<f32, InferenceError> {
        let nested = tensor.to_nested();
        let request = PredictRequest {
            instances: [nested.as_slice()],
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| InferenceError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))?;
        first_score(&body)
    }
}

/// First scalar of the first prediction. Accepts `[[p]]` and `[p]` shapes.
pub(crate) fn first_score(body: &Value) -> Result<f32, InferenceError> {
    let first = body
        .get("predictions")
        .and_then(Value::as_array)
        .and_then(|predictions| predictions.first())
        .ok_or_else(|| InferenceError::Malformed("missing 'predictions'".to_string()))?;

    let score = match first {
        Value::Array(inner) => inner.first().and_then(Value::as_f64),
        other => other.as_f64(),
    };

    #[allow(clippy::cast_possible_truncation)]
    score
        .map(|s| s as f32)
        .ok_or_else(|| InferenceError::Malformed(format!("prediction is not a number: {first}")))
}
