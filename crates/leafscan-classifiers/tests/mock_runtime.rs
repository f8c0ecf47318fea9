//! Pipeline tests against a mock inference runtime
//!
//! The mock runtime counts loads, sessions and runs so the tests can check
//! single-flight loading and every failure path without ONNX Runtime.

use async_trait::async_trait;
use leafscan_classifiers::config::{ClassifierConfig, ModelSource, RuntimeSettings, TimeoutConfig};
use leafscan_classifiers::{
    InferencePipeline, InferenceRuntime, ModelOutputs, ModelSession, ModelSessionManager,
    NamedInput, OutputTensor, RegistryBuilder, RuntimeLoader, RuntimeProvider,
};
use leafscan_core::{Error, RawImage, Result};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A session returning canned outputs
pub struct MockSession {
    outputs: ModelOutputs,
    output_names: Vec<String>,
    run_delay: Option<Duration>,
    runs: AtomicU32,
}

impl ModelSession for MockSession {
    fn input_name(&self) -> &str {
        "input"
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(&self, input: NamedInput) -> Result<ModelOutputs> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        assert_eq!(input.name, "input");
        assert_eq!(input.tensor.shape(), [1, 3, 224, 224]);

        if let Some(delay) = self.run_delay {
            std::thread::sleep(delay);
        }
        Ok(self.outputs.clone())
    }
}

/// A runtime that builds [`MockSession`]s
pub struct MockRuntime {
    outputs: ModelOutputs,
    run_delay: Option<Duration>,
    session_failure: Option<Error>,
    sessions_created: AtomicU32,
    last_session: parking_lot::Mutex<Option<Arc<MockSession>>>,
}

impl InferenceRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn create_session(
        &self,
        _model_path: &Path,
        _input_name: &str,
    ) -> Result<Arc<dyn ModelSession>> {
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));

        if let Some(err) = &self.session_failure {
            return Err(err.clone());
        }

        let session = Arc::new(MockSession {
            outputs: self.outputs.clone(),
            output_names: self.outputs.names().map(String::from).collect(),
            run_delay: self.run_delay,
            runs: AtomicU32::new(0),
        });
        *self.last_session.lock() = Some(session.clone());
        Ok(session)
    }
}

/// Provider handing out one shared [`MockRuntime`]
pub struct MockProvider {
    runtime: Arc<MockRuntime>,
    load_delay: Duration,
    failure: Option<Error>,
    panic_on_first_load: bool,
    loads: AtomicU32,
}

impl MockProvider {
    pub fn with_logits(logits: Vec<f32>) -> Self {
        let shape = vec![1, logits.len() as i64];
        Self::with_outputs(ModelOutputs::new().with("logits", OutputTensor::numeric(shape, logits)))
    }

    pub fn with_outputs(outputs: ModelOutputs) -> Self {
        Self {
            runtime: Arc::new(MockRuntime {
                outputs,
                run_delay: None,
                session_failure: None,
                sessions_created: AtomicU32::new(0),
                last_session: parking_lot::Mutex::new(None),
            }),
            load_delay: Duration::from_millis(30),
            failure: None,
            panic_on_first_load: false,
            loads: AtomicU32::new(0),
        }
    }

    pub fn failing(error: Error) -> Self {
        let mut provider = Self::with_logits(vec![1.0]);
        provider.failure = Some(error);
        provider
    }

    pub fn panicking_once(mut self) -> Self {
        self.panic_on_first_load = true;
        self
    }

    pub fn with_session_failure(mut self, error: Error) -> Self {
        Arc::get_mut(&mut self.runtime)
            .expect("runtime not shared yet")
            .session_failure = Some(error);
        self
    }

    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        Arc::get_mut(&mut self.runtime)
            .expect("runtime not shared yet")
            .run_delay = Some(delay);
        self
    }

    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn sessions_created(&self) -> u32 {
        self.runtime.sessions_created.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> u32 {
        self.runtime
            .last_session
            .lock()
            .as_ref()
            .map(|s| s.runs.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[async_trait]
impl RuntimeProvider for MockProvider {
    async fn load(&self, _settings: &RuntimeSettings) -> Result<Arc<dyn InferenceRuntime>> {
        let attempt = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.load_delay).await;

        if self.panic_on_first_load && attempt == 1 {
            panic!("runtime initializer crashed");
        }

        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.runtime.clone()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn leaf_image() -> RawImage {
    let img = image::RgbImage::from_fn(320, 240, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 90])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    RawImage::new(buf, "image/png")
}

struct Harness {
    provider: Arc<MockProvider>,
    pipeline: InferencePipeline,
    _model: tempfile::NamedTempFile,
}

fn harness(provider: MockProvider) -> Harness {
    harness_with_timeouts(provider, TimeoutConfig::default())
}

fn harness_with_timeouts(provider: MockProvider, timeouts: TimeoutConfig) -> Harness {
    let model = tempfile::NamedTempFile::new().unwrap();
    let provider = Arc::new(provider);

    let runtime = Arc::new(RuntimeLoader::new(provider.clone(), RuntimeSettings::default()));
    let sessions = Arc::new(ModelSessionManager::new(runtime, "input"));
    let pipeline = InferencePipeline::new(
        sessions,
        ModelSource::Local {
            path: model.path().to_path_buf(),
        },
    )
    .with_timeouts(timeouts);

    Harness {
        provider,
        pipeline,
        _model: model,
    }
}

#[tokio::test]
async fn test_predict_ranks_top_three() {
    let h = harness(MockProvider::with_logits(vec![2.0, 1.0, 0.1]));

    let result = h.pipeline.predict(&leaf_image()).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert!(result.error.is_none());
    let names: Vec<_> = result.predictions.iter().map(|p| p.class_name.as_str()).collect();
    assert_eq!(names, vec!["Healthy", "Early Blight", "Late Blight"]);

    let confidences: Vec<_> = result.predictions.iter().map(|p| p.confidence).collect();
    assert!((confidences[0] - 0.659).abs() < 1e-3);
    assert!((confidences[1] - 0.242).abs() < 1e-3);
    assert!((confidences[2] - 0.099).abs() < 1e-3);
    assert_eq!(h.provider.runs(), 1);
}

#[tokio::test]
async fn test_ten_class_output_truncated_to_three() {
    let logits = vec![0.1, 0.2, 0.3, 0.4, 0.5, 3.0, 0.7, 0.8, 0.9, 1.0];
    let h = harness(MockProvider::with_logits(logits));

    let result = h.pipeline.predict(&leaf_image()).await;

    assert_eq!(result.predictions.len(), 3);
    assert_eq!(result.top().unwrap().class_name, "Mosaic Virus");
    assert_eq!(result.predictions[1].class_name, "Anthracnose");
}

#[tokio::test]
async fn test_two_element_output_gives_two_predictions() {
    let h = harness(MockProvider::with_logits(vec![0.2, 1.2]));

    let result = h.pipeline.predict(&leaf_image()).await;

    assert!(result.success);
    assert_eq!(result.predictions.len(), 2);
    assert_eq!(result.predictions[0].class_name, "Early Blight");
    assert_eq!(result.predictions[1].class_name, "Healthy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_predictions_load_once() {
    let h = Arc::new(harness(MockProvider::with_logits(vec![2.0, 1.0, 0.1])));
    let image = leaf_image();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = Arc::clone(&h);
        let image = image.clone();
        handles.push(tokio::spawn(async move { h.pipeline.predict(&image).await }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().success);
    }
    assert_eq!(h.provider.loads(), 1);
    assert_eq!(h.provider.sessions_created(), 1);
    assert_eq!(h.provider.runs(), 8);
}

#[tokio::test]
async fn test_runtime_failure_reports_model_not_loaded() {
    let h = harness(MockProvider::failing(Error::runtime_load("asset returned 404")));

    let result = h.pipeline.predict(&leaf_image()).await;
    assert!(!result.success);
    assert!(result.predictions.is_empty());
    assert_eq!(result.error.as_deref(), Some("Model not loaded"));

    // Failed loads are retried on the next call
    let _ = h.pipeline.predict(&leaf_image()).await;
    assert_eq!(h.provider.loads(), 2);
    assert_eq!(h.provider.sessions_created(), 0);
}

#[tokio::test]
async fn test_panicking_runtime_load_is_retried() {
    let h = harness(MockProvider::with_logits(vec![2.0, 1.0, 0.1]).panicking_once());

    let first = h.pipeline.predict(&leaf_image()).await;
    assert!(!first.success);
    assert_eq!(first.error.as_deref(), Some("Model not loaded"));
    assert!(first.predictions.is_empty());

    let second = h.pipeline.predict(&leaf_image()).await;
    assert!(second.success, "unexpected failure: {:?}", second.error);
    assert_eq!(second.top().unwrap().class_name, "Healthy");
    assert_eq!(h.provider.loads(), 2);
}

#[tokio::test]
async fn test_model_failure_reports_model_not_loaded() {
    let h = harness(
        MockProvider::with_logits(vec![1.0])
            .with_session_failure(Error::model_load("protobuf parse error")),
    );

    let result = h.pipeline.predict(&leaf_image()).await;
    assert_eq!(result.error.as_deref(), Some("Model not loaded"));
}

#[tokio::test]
async fn test_missing_model_file_reports_model_not_loaded() {
    let provider = Arc::new(MockProvider::with_logits(vec![1.0]));
    let runtime = Arc::new(RuntimeLoader::new(provider.clone(), RuntimeSettings::default()));
    let pipeline = InferencePipeline::new(
        Arc::new(ModelSessionManager::new(runtime, "input")),
        ModelSource::Local {
            path: "/nonexistent/plant-disease-model.onnx".into(),
        },
    );

    let result = pipeline.predict(&leaf_image()).await;
    assert_eq!(result.error.as_deref(), Some("Model not loaded"));
    assert_eq!(provider.loads(), 1);
    assert_eq!(provider.sessions_created(), 0);
}

#[tokio::test]
async fn test_malformed_image_is_reported() {
    let h = harness(MockProvider::with_logits(vec![1.0, 2.0]));

    let result = h
        .pipeline
        .predict(&RawImage::new(b"GIF89a-but-not-really".to_vec(), "image/jpeg"))
        .await;

    assert!(!result.success);
    assert!(result.predictions.is_empty());
    assert!(result.error.unwrap().starts_with("preprocess error"));
    assert_eq!(h.provider.runs(), 0);
}

#[tokio::test]
async fn test_no_outputs_is_invalid_model_output() {
    let h = harness(MockProvider::with_outputs(ModelOutputs::new()));

    let result = h.pipeline.predict(&leaf_image()).await;
    assert_eq!(result.error.as_deref(), Some("Invalid model output"));
}

#[tokio::test]
async fn test_non_numeric_output_is_invalid_model_output() {
    let outputs = ModelOutputs::new().with("output", OutputTensor::non_numeric(vec![1, 10]));
    let h = harness(MockProvider::with_outputs(outputs));

    let result = h.pipeline.predict(&leaf_image()).await;
    assert_eq!(result.error.as_deref(), Some("Invalid model output"));
}

#[tokio::test]
async fn test_nan_logits_are_invalid_model_output() {
    let h = harness(MockProvider::with_logits(vec![0.3, f32::NAN, 1.0]));

    let result = h.pipeline.predict(&leaf_image()).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Invalid model output"));
}

#[tokio::test]
async fn test_first_declared_output_used_without_candidates() {
    let outputs = ModelOutputs::new()
        .with("probabilities", OutputTensor::numeric(vec![1, 3], vec![0.0, 0.0, 5.0]))
        .with("embedding", OutputTensor::numeric(vec![1, 2], vec![9.0, 9.0]));
    let h = harness(MockProvider::with_outputs(outputs));

    let result = h.pipeline.predict(&leaf_image()).await;
    assert_eq!(result.top().unwrap().class_name, "Late Blight");
}

#[tokio::test]
async fn test_inference_timeout() {
    let timeouts = TimeoutConfig {
        inference_ms: 20,
        ..Default::default()
    };
    let h = harness_with_timeouts(
        MockProvider::with_logits(vec![1.0]).with_run_delay(Duration::from_millis(300)),
        timeouts,
    );

    let result = h.pipeline.predict(&leaf_image()).await;
    assert_eq!(result.error.as_deref(), Some("inference timed out"));
}

#[tokio::test]
async fn test_runtime_load_timeout_reports_model_not_loaded() {
    let timeouts = TimeoutConfig {
        runtime_load_ms: 5,
        ..Default::default()
    };
    let h = harness_with_timeouts(MockProvider::with_logits(vec![1.0]), timeouts);

    let result = h.pipeline.predict(&leaf_image()).await;
    assert_eq!(result.error.as_deref(), Some("Model not loaded"));
}

#[tokio::test]
async fn test_cancellation() {
    let h = harness(
        MockProvider::with_logits(vec![1.0]).with_run_delay(Duration::from_millis(300)),
    );
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = h.pipeline.predict_with_cancel(&leaf_image(), &cancel).await;
    assert_eq!(result.error.as_deref(), Some("operation cancelled"));
}

#[tokio::test]
async fn test_warmup_then_predict_reuses_session() {
    let h = harness(MockProvider::with_logits(vec![1.0, 2.0]));

    h.pipeline.warmup(&CancellationToken::new()).await.unwrap();
    assert_eq!(h.provider.sessions_created(), 1);

    assert!(h.pipeline.predict(&leaf_image()).await.success);
    assert_eq!(h.provider.loads(), 1);
    assert_eq!(h.provider.sessions_created(), 1);
}

#[tokio::test]
async fn test_registry_with_injected_provider() {
    let model = tempfile::NamedTempFile::new().unwrap();
    let mut config = ClassifierConfig::default();
    config.model.source = ModelSource::Local {
        path: model.path().to_path_buf(),
    };
    config.top_k = 2;

    let provider = Arc::new(MockProvider::with_logits(vec![0.1, 0.2, 3.0]));
    let registry = RegistryBuilder::new(config)
        .with_runtime_provider(provider.clone())
        .build()
        .unwrap();

    registry.warmup(&CancellationToken::new()).await.unwrap();
    let outcome = registry
        .fallback()
        .classify_with_source(&leaf_image(), &CancellationToken::new())
        .await;

    assert_eq!(outcome.source, leafscan_classifiers::PredictionSource::Local);
    assert_eq!(outcome.result.predictions.len(), 2);
    assert_eq!(outcome.result.top().unwrap().class_name, "Late Blight");
    assert_eq!(provider.loads(), 1);
}
