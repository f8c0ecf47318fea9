//! Clients for the hosted classification and plant-care chat functions

use crate::classifier::ImageClassifier;
use crate::config::RemoteConfig;
use crate::postprocess::normalize_predictions;
use async_trait::async_trait;
use leafscan_core::{ChatMessage, ClassPrediction, Error, InferenceResult, RawImage, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    image_data: String,
    model_version: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    success: bool,
    #[serde(default)]
    predictions: Vec<ClassPrediction>,
    #[serde(default)]
    model_used: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    conversation_history: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    success: bool,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

fn http_client(config: &RemoteConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))
}

/// POST `body` as JSON and decode a JSON reply, mapping HTTP failures
async fn post_json<B, R>(
    client: &reqwest::Client,
    endpoint: &str,
    anon_key: Option<&str>,
    body: &B,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: serde::de::DeserializeOwned,
{
    let mut request = client.post(endpoint).json(body);
    if let Some(key) = anon_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            Error::timeout("remote request")
        } else {
            Error::transport(format!("request to {} failed: {}", endpoint, e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        return Err(Error::RemoteStatus {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json::<R>()
        .await
        .map_err(|e| Error::transport(format!("invalid response body: {}", e)))
}

/// Classifies images through the hosted classification function
pub struct RemoteClassifier {
    client: reqwest::Client,
    endpoint: String,
    anon_key: Option<String>,
    model_version: String,
    top_k: usize,
}

impl RemoteClassifier {
    /// Create a client from configuration; fails when no base URL is set
    pub fn from_config(config: &RemoteConfig, top_k: usize) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            endpoint: config.endpoint(&config.classify_path)?,
            anon_key: config.anon_key.clone(),
            model_version: config.model_version.clone(),
            top_k: top_k.max(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Classify, returning typed errors
    pub async fn try_classify(&self, image: &RawImage) -> Result<Vec<ClassPrediction>> {
        let request = ClassifyRequest {
            image_data: image.to_data_url(),
            model_version: &self.model_version,
        };

        let response: ClassifyResponse = post_json(
            &self.client,
            &self.endpoint,
            self.anon_key.as_deref(),
            &request,
        )
        .await?;

        if !response.success {
            return Err(Error::RemoteRejected(
                response
                    .error
                    .unwrap_or_else(|| "classification failed".to_string()),
            ));
        }

        tracing::debug!(
            model = response.model_used.as_deref().unwrap_or("unknown"),
            count = response.predictions.len(),
            "Remote classification complete"
        );

        Ok(normalize_predictions(response.predictions, self.top_k))
    }
}

#[async_trait]
impl ImageClassifier for RemoteClassifier {
    async fn classify(&self, image: &RawImage) -> InferenceResult {
        let start = Instant::now();
        let outcome = self.try_classify(image).await;

        metrics::histogram!("leafscan_inference_latency_us", "source" => "remote")
            .record(start.elapsed().as_micros() as f64);

        match outcome {
            Ok(predictions) => {
                metrics::counter!(
                    "leafscan_predictions_total",
                    "source" => "remote",
                    "outcome" => "success"
                )
                .increment(1);
                InferenceResult::success(predictions)
            }
            Err(e) => {
                metrics::counter!(
                    "leafscan_predictions_total",
                    "source" => "remote",
                    "outcome" => "error"
                )
                .increment(1);
                tracing::warn!(error = %e, "Remote classification failed");
                InferenceResult::failure(e.result_message())
            }
        }
    }

    fn name(&self) -> &str {
        "remote"
    }
}

/// Sends messages to the plant-care chat function
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    anon_key: Option<String>,
    history_limit: usize,
}

impl ChatClient {
    /// Create a client from configuration; fails when no base URL is set
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            endpoint: config.endpoint(&config.chat_path)?,
            anon_key: config.anon_key.clone(),
            history_limit: config.history_limit,
        })
    }

    /// Send `message` with the tail of `history` and return the reply
    pub async fn send(&self, message: &str, history: &[ChatMessage]) -> Result<String> {
        if message.trim().is_empty() {
            return Err(Error::InvalidRequest("message must not be empty".to_string()));
        }

        let tail = &history[history.len().saturating_sub(self.history_limit)..];
        let request = ChatRequest {
            message,
            conversation_history: tail,
        };

        tracing::debug!(history = tail.len(), "Sending chat message");
        let response: ChatResponse = post_json(
            &self.client,
            &self.endpoint,
            self.anon_key.as_deref(),
            &request,
        )
        .await?;

        match response {
            ChatResponse {
                success: true,
                response: Some(reply),
                ..
            } => Ok(reply),
            ChatResponse { error, .. } => Err(Error::RemoteRejected(
                error.unwrap_or_else(|| "no response from assistant".to_string()),
            )),
        }
    }
}

/// A conversation with the plant-care assistant
pub struct ChatSession {
    client: Arc<ChatClient>,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(client: Arc<ChatClient>) -> Self {
        Self {
            client,
            history: Vec::new(),
        }
    }

    /// Ask a question; the exchange is recorded only when it succeeds
    pub async fn ask(&mut self, message: &str) -> Result<String> {
        let reply = self.client.send(message, &self.history).await?;

        self.history.push(ChatMessage::user(message));
        self.history.push(ChatMessage::assistant(reply.clone()));
        Ok(reply)
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
