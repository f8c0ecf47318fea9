//! Configuration for the runtime, model, preprocessing and remote endpoints

use leafscan_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Class labels of the bundled plant-disease model, in output index order
pub const DEFAULT_LABELS: [&str; 10] = [
    "Healthy",
    "Early Blight",
    "Late Blight",
    "Bacterial Spot",
    "Powdery Mildew",
    "Mosaic Virus",
    "Leaf Scorch",
    "Rust",
    "Black Rot",
    "Anthracnose",
];

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Configuration for the whole classification stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Inference runtime settings
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Model asset and tensor naming
    #[serde(default)]
    pub model: ModelSettings,

    /// Image preprocessing
    #[serde(default)]
    pub preprocessing: PreprocessConfig,

    /// Class names by output index
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,

    /// Number of ranked predictions to return
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Per-stage time budgets
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Remote classification and chat endpoints
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Fixed operational parameters applied when the runtime is loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Self-hosted directory holding the runtime shared library
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,

    /// Library file name inside `asset_dir`; platform default when unset
    #[serde(default)]
    pub library: Option<String>,

    /// Threads used within a single operator
    #[serde(default = "default_threads")]
    pub intra_threads: usize,

    /// Threads used across independent operators
    #[serde(default = "default_threads")]
    pub inter_threads: usize,

    /// Request SIMD kernels
    #[serde(default)]
    pub simd: bool,
}

impl RuntimeSettings {
    /// Full path of the runtime shared library
    pub fn library_path(&self) -> PathBuf {
        let name = self
            .library
            .clone()
            .unwrap_or_else(default_library_name);
        self.asset_dir.join(name)
    }
}

/// Platform file name of the ONNX Runtime shared library
pub fn default_library_name() -> String {
    format!(
        "{}onnxruntime{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    )
}

/// Where the model comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelSource {
    /// Local file path
    Local { path: PathBuf },

    /// Hugging Face Hub
    HuggingFace {
        repo: String,
        filename: String,
        #[serde(default)]
        revision: Option<String>,
    },
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::Local {
            path: PathBuf::from("public/models/plant-disease-model.onnx"),
        }
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::HuggingFace {
                repo,
                filename,
                revision,
            } => write!(
                f,
                "hf://{}/{}@{}",
                repo,
                filename,
                revision.as_deref().unwrap_or("main")
            ),
        }
    }
}

/// Model asset and tensor naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model source
    #[serde(default)]
    pub source: ModelSource,

    /// Name the image tensor is bound under
    #[serde(default = "default_input_name")]
    pub input_name: String,

    /// Output names tried in order before falling back to the first output
    #[serde(default = "default_output_candidates")]
    pub output_candidates: Vec<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            source: ModelSource::default(),
            input_name: default_input_name(),
            output_candidates: default_output_candidates(),
        }
    }
}

/// Resampling filter used when resizing to the model input size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for image::imageops::FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => Self::Nearest,
            ResizeFilter::Triangle => Self::Triangle,
            ResizeFilter::CatmullRom => Self::CatmullRom,
            ResizeFilter::Gaussian => Self::Gaussian,
            ResizeFilter::Lanczos3 => Self::Lanczos3,
        }
    }
}

/// Image preprocessing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_size")]
    pub width: u32,

    #[serde(default = "default_size")]
    pub height: u32,

    #[serde(default = "default_mean")]
    pub mean: [f32; 3],

    #[serde(default = "default_std")]
    pub std: [f32; 3],

    #[serde(default)]
    pub filter: ResizeFilter,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            width: default_size(),
            height: default_size(),
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            filter: ResizeFilter::default(),
        }
    }
}

/// Per-stage time budgets in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_runtime_load_ms")]
    pub runtime_load_ms: u64,

    #[serde(default = "default_model_load_ms")]
    pub model_load_ms: u64,

    #[serde(default = "default_preprocess_ms")]
    pub preprocess_ms: u64,

    #[serde(default = "default_inference_ms")]
    pub inference_ms: u64,
}

impl TimeoutConfig {
    pub fn runtime_load(&self) -> Duration {
        Duration::from_millis(self.runtime_load_ms)
    }

    pub fn model_load(&self) -> Duration {
        Duration::from_millis(self.model_load_ms)
    }

    pub fn preprocess(&self) -> Duration {
        Duration::from_millis(self.preprocess_ms)
    }

    pub fn inference(&self) -> Duration {
        Duration::from_millis(self.inference_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            runtime_load_ms: default_runtime_load_ms(),
            model_load_ms: default_model_load_ms(),
            preprocess_ms: default_preprocess_ms(),
            inference_ms: default_inference_ms(),
        }
    }
}

/// Remote classification and chat endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Backend base URL; remote features are disabled when unset
    #[serde(default)]
    pub base_url: Option<String>,

    /// Anonymous API key sent as a bearer token
    #[serde(default)]
    pub anon_key: Option<String>,

    #[serde(default = "default_classify_path")]
    pub classify_path: String,

    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    /// Model version requested from the remote classifier
    #[serde(default = "default_model_version")]
    pub model_version: String,

    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,

    /// Number of prior chat messages sent with each request
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl RemoteConfig {
    /// Whether a backend is configured
    pub fn is_enabled(&self) -> bool {
        self.base_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }

    /// Join the base URL with an endpoint path
    pub fn endpoint(&self, path: &str) -> Result<String> {
        let base = self
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::config("remote base_url is not configured"))?;

        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            anon_key: None,
            classify_path: default_classify_path(),
            chat_path: default_chat_path(),
            model_version: default_model_version(),
            timeout_ms: default_remote_timeout_ms(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeSettings::default(),
            model: ModelSettings::default(),
            preprocessing: PreprocessConfig::default(),
            labels: default_labels(),
            top_k: default_top_k(),
            timeouts: TimeoutConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            asset_dir: default_asset_dir(),
            library: None,
            intra_threads: default_threads(),
            inter_threads: default_threads(),
            simd: false,
        }
    }
}

impl ClassifierConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("invalid YAML: {}", e)))
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Check the values that would otherwise fail deep inside the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(Error::config("labels must not be empty"));
        }
        if self.top_k == 0 {
            return Err(Error::config("top_k must be at least 1"));
        }
        if self.preprocessing.width == 0 || self.preprocessing.height == 0 {
            return Err(Error::config(format!(
                "preprocessing size must be positive, got {}x{}",
                self.preprocessing.width, self.preprocessing.height
            )));
        }
        if self.preprocessing.std.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(Error::config("preprocessing std components must be non-zero"));
        }
        if self.runtime.intra_threads == 0 || self.runtime.inter_threads == 0 {
            return Err(Error::config("runtime thread counts must be at least 1"));
        }
        if self.model.input_name.is_empty() {
            return Err(Error::config("model input_name must not be empty"));
        }
        Ok(())
    }
}

fn default_labels() -> Vec<String> {
    DEFAULT_LABELS.iter().map(|s| s.to_string()).collect()
}

fn default_top_k() -> usize {
    3
}

fn default_asset_dir() -> PathBuf {
    PathBuf::from("public/onnx")
}

fn default_threads() -> usize {
    1
}

fn default_input_name() -> String {
    "input".to_string()
}

fn default_output_candidates() -> Vec<String> {
    vec!["logits".to_string(), "output".to_string()]
}

fn default_size() -> u32 {
    224
}

fn default_mean() -> [f32; 3] {
    IMAGENET_MEAN
}

fn default_std() -> [f32; 3] {
    IMAGENET_STD
}

fn default_runtime_load_ms() -> u64 {
    30_000
}

fn default_model_load_ms() -> u64 {
    60_000
}

fn default_preprocess_ms() -> u64 {
    10_000
}

fn default_inference_ms() -> u64 {
    30_000
}

fn default_classify_path() -> String {
    "/functions/v1/classify-image".to_string()
}

fn default_chat_path() -> String {
    "/functions/v1/chat-gemini".to_string()
}

fn default_model_version() -> String {
    "gemini-v1".to_string()
}

fn default_remote_timeout_ms() -> u64 {
    30_000
}

fn default_history_limit() -> usize {
    10
}
