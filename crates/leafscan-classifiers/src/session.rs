//! Model sessions and their lifecycle
//!
//! [`ModelSessionManager`] resolves the model asset, builds one session on
//! the shared runtime, and caches it for the manager's lifetime.

use crate::config::{ModelSource, RuntimeSettings};
use crate::preprocess::InputTensor;
use crate::runtime::RuntimeLoader;
use crate::single_flight::SingleFlight;
use leafscan_core::{Error, Result};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// A tensor bound to a model input name
#[derive(Debug, Clone)]
pub struct NamedInput {
    pub name: String,
    pub tensor: InputTensor,
}

impl NamedInput {
    pub fn new(name: impl Into<String>, tensor: InputTensor) -> Self {
        Self {
            name: name.into(),
            tensor,
        }
    }
}

/// One model output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    /// Dimensions reported by the runtime
    pub shape: Vec<i64>,

    /// Flat f32 data, `None` when the output is not a float tensor
    pub values: Option<Vec<f32>>,
}

impl OutputTensor {
    pub fn numeric(shape: Vec<i64>, values: Vec<f32>) -> Self {
        Self {
            shape,
            values: Some(values),
        }
    }

    pub fn non_numeric(shape: Vec<i64>) -> Self {
        Self {
            shape,
            values: None,
        }
    }
}

/// Outputs of a run, in the model's declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutputs {
    outputs: Vec<(String, OutputTensor)>,
}

impl ModelOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an output
    pub fn push(&mut self, name: impl Into<String>, tensor: OutputTensor) {
        self.outputs.push((name.into(), tensor));
    }

    /// Builder-style [`push`](Self::push)
    pub fn with(mut self, name: impl Into<String>, tensor: OutputTensor) -> Self {
        self.push(name, tensor);
        self
    }

    /// Look up an output by name
    pub fn get(&self, name: &str) -> Option<&OutputTensor> {
        self.outputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tensor)| tensor)
    }

    /// First declared output
    pub fn first(&self) -> Option<(&str, &OutputTensor)> {
        self.outputs
            .first()
            .map(|(name, tensor)| (name.as_str(), tensor))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// An executable model
pub trait ModelSession: Send + Sync {
    /// Name the image tensor must be bound under
    fn input_name(&self) -> &str;

    /// Declared output names, in declaration order
    fn output_names(&self) -> &[String];

    /// Execute the model. Blocking; callers run it off the async executor.
    fn run(&self, input: NamedInput) -> Result<ModelOutputs>;
}

/// Creates the model session once and shares it
pub struct ModelSessionManager {
    runtime: Arc<RuntimeLoader>,
    input_name: String,
    cache_dir: PathBuf,
    session: SingleFlight<Arc<dyn ModelSession>>,
    loaded_from: Mutex<Option<ModelSource>>,
}

impl ModelSessionManager {
    /// Create a manager whose sessions bind inputs under `input_name`
    pub fn new(runtime: Arc<RuntimeLoader>, input_name: impl Into<String>) -> Self {
        Self {
            runtime,
            input_name: input_name.into(),
            cache_dir: default_cache_dir(),
            session: SingleFlight::new(),
            loaded_from: Mutex::new(None),
        }
    }

    /// Override where Hugging Face downloads are cached
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Return the session, creating it on first use.
    ///
    /// The session is not keyed by source: once one is loaded it is returned
    /// for every later call.
    pub async fn ensure_model(&self, source: &ModelSource) -> Result<Arc<dyn ModelSession>> {
        let session = match self.session.get() {
            Some(session) => session,
            None => self.load(source).await?,
        };

        self.note_source(source);
        Ok(session)
    }

    async fn load(&self, source: &ModelSource) -> Result<Arc<dyn ModelSession>> {
        self.session
            .get_or_try_init(|| {
                let runtime = Arc::clone(&self.runtime);
                let source = source.clone();
                let input_name = self.input_name.clone();
                let cache_dir = self.cache_dir.clone();

                async move {
                    let runtime = runtime.ensure_runtime().await?;

                    tracing::info!(model = %source, "Loading model");
                    let start = Instant::now();

                    let session = tokio::task::spawn_blocking(move || {
                        let path = resolve_model_path(&source, &cache_dir)?;
                        runtime.create_session(&path, &input_name)
                    })
                    .await
                    .map_err(|e| Error::model_load(format!("model loader task failed: {}", e)))?;

                    match &session {
                        Ok(session) => tracing::info!(
                            input = session.input_name(),
                            outputs = ?session.output_names(),
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Model session ready"
                        ),
                        Err(e) => tracing::warn!(error = %e, "Failed to load model"),
                    }

                    session
                }
            })
            .await
    }

    /// The session if it has already been created
    pub fn loaded(&self) -> Option<Arc<dyn ModelSession>> {
        self.session.get()
    }

    /// The runtime loader this manager builds sessions on
    pub fn runtime(&self) -> &Arc<RuntimeLoader> {
        &self.runtime
    }

    fn note_source(&self, source: &ModelSource) {
        let mut loaded_from = self.loaded_from.lock();
        let first = loaded_from.get_or_insert_with(|| source.clone());
        if first != source {
            tracing::warn!(
                loaded = %first,
                requested = %source,
                "Model already loaded from a different source; reusing it"
            );
        }
    }
}

/// Cache directory for downloaded models
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("leafscan")
        .join("models")
}

/// Resolve a model source to a file on disk, downloading if needed
pub fn resolve_model_path(source: &ModelSource, cache_dir: &Path) -> Result<PathBuf> {
    match source {
        ModelSource::Local { path } => {
            if !path.is_file() {
                return Err(Error::model_load(format!(
                    "model file not found: {}",
                    path.display()
                )));
            }
            Ok(path.clone())
        }
        ModelSource::HuggingFace {
            repo,
            filename,
            revision,
        } => {
            let revision = revision.clone().unwrap_or_else(|| "main".to_string());
            tracing::info!("Downloading {} from HuggingFace: {} @ {}", filename, repo, revision);

            let api = hf_hub::api::sync::ApiBuilder::new()
                .with_cache_dir(cache_dir.to_path_buf())
                .build()
                .map_err(|e| {
                    Error::model_load(format!("Failed to initialize HF API: {}", e))
                })?;

            let repo = api.repo(hf_hub::Repo::with_revision(
                repo.clone(),
                hf_hub::RepoType::Model,
                revision,
            ));

            repo.get(filename).map_err(|e| {
                Error::model_load(format!("Failed to download model from HF: {}", e))
            })
        }
    }
}

/// An `ort` session on the CPU execution provider
pub struct OrtSession {
    session: Mutex<Session>,
    input_name: String,
    output_names: Vec<String>,
}

impl OrtSession {
    /// Build a session for the model file
    pub fn from_file(path: &Path, input_name: &str, settings: &RuntimeSettings) -> Result<Self> {
        let session = Session::builder()
            .map_err(model_err("create session builder"))?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(model_err("register CPU execution provider"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(model_err("set optimization level"))?
            .with_intra_threads(settings.intra_threads)
            .map_err(model_err("set intra-op threads"))?
            .with_inter_threads(settings.inter_threads)
            .map_err(model_err("set inter-op threads"))?
            .with_parallel_execution(false)
            .map_err(model_err("set sequential execution"))?
            .commit_from_file(path)
            .map_err(|e| {
                Error::model_load(format!("failed to load model {}: {}", path.display(), e))
            })?;

        let declared_inputs: Vec<String> =
            session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> =
            session.outputs.iter().map(|o| o.name.clone()).collect();

        let input_name = if declared_inputs.iter().any(|n| n == input_name) {
            input_name.to_string()
        } else if let [only] = declared_inputs.as_slice() {
            tracing::warn!(
                configured = input_name,
                declared = %only,
                "Configured input name not declared by model; using its only input"
            );
            only.clone()
        } else {
            return Err(Error::model_load(format!(
                "model does not declare input '{}' (declared: {:?})",
                input_name, declared_inputs
            )));
        };

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_names,
        })
    }
}

impl ModelSession for OrtSession {
    fn input_name(&self) -> &str {
        &self.input_name
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(&self, input: NamedInput) -> Result<ModelOutputs> {
        let [n, c, h, w] = input.tensor.shape();
        let array = ndarray::Array4::from_shape_vec((n, c, h, w), input.tensor.into_vec())
            .map_err(|e| Error::inference(format!("bad input shape: {}", e)))?;
        let tensor = ort::value::Tensor::from_array(array)
            .map_err(|e| Error::inference(format!("failed to create input tensor: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input.name.as_str() => tensor])
            .map_err(|e| Error::inference(format!("session run failed: {}", e)))?;

        let mut collected = ModelOutputs::new();
        for name in &self.output_names {
            let Some(value) = outputs.get(name.as_str()) else {
                continue;
            };
            let tensor = match value.try_extract_tensor::<f32>() {
                Ok((shape, data)) => {
                    OutputTensor::numeric(shape.iter().copied().collect(), data.to_vec())
                }
                Err(_) => OutputTensor::non_numeric(Vec::new()),
            };
            collected.push(name.clone(), tensor);
        }

        Ok(collected)
    }
}

fn model_err<E: std::fmt::Display>(stage: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::model_load(format!("failed to {}: {}", stage, e))
}
