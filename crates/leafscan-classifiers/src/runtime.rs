//! Inference runtime loading
//!
//! The runtime is loaded on first use and shared for the lifetime of its
//! [`RuntimeLoader`]. The production provider loads ONNX Runtime from a
//! self-hosted directory; nothing is ever downloaded.

use crate::config::RuntimeSettings;
use crate::session::{ModelSession, OrtSession};
use crate::single_flight::SingleFlight;
use async_trait::async_trait;
use leafscan_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A loaded inference engine able to build model sessions
pub trait InferenceRuntime: Send + Sync {
    /// Runtime name for logging
    fn name(&self) -> &str;

    /// Build a session for the model at `model_path`.
    ///
    /// Called on a blocking thread.
    fn create_session(&self, model_path: &Path, input_name: &str)
        -> Result<Arc<dyn ModelSession>>;
}

/// Produces an [`InferenceRuntime`]
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    /// Fetch and initialize the runtime
    async fn load(&self, settings: &RuntimeSettings) -> Result<Arc<dyn InferenceRuntime>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Lazily loads the runtime once and hands out the shared handle
pub struct RuntimeLoader {
    provider: Arc<dyn RuntimeProvider>,
    settings: RuntimeSettings,
    runtime: SingleFlight<Arc<dyn InferenceRuntime>>,
    attempts: Arc<AtomicU32>,
}

impl RuntimeLoader {
    /// Create a loader backed by `provider`
    pub fn new(provider: Arc<dyn RuntimeProvider>, settings: RuntimeSettings) -> Self {
        Self {
            provider,
            settings,
            runtime: SingleFlight::new(),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Create a loader for the self-hosted ONNX Runtime
    pub fn onnx(settings: RuntimeSettings) -> Self {
        Self::new(Arc::new(OrtRuntimeProvider::new()), settings)
    }

    /// Return the runtime, loading it if this is the first call.
    ///
    /// Concurrent callers during a load all await the same attempt.
    pub async fn ensure_runtime(&self) -> Result<Arc<dyn InferenceRuntime>> {
        self.runtime
            .get_or_try_init(|| {
                let provider = Arc::clone(&self.provider);
                let settings = self.settings.clone();
                let attempts = Arc::clone(&self.attempts);

                async move {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::info!(
                        provider = provider.name(),
                        attempt,
                        asset_dir = %settings.asset_dir.display(),
                        "Loading inference runtime"
                    );

                    let start = Instant::now();
                    match provider.load(&settings).await {
                        Ok(runtime) => {
                            tracing::info!(
                                runtime = runtime.name(),
                                elapsed_ms = start.elapsed().as_millis() as u64,
                                "Inference runtime ready"
                            );
                            Ok(runtime)
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to load inference runtime");
                            Err(e)
                        }
                    }
                }
            })
            .await
    }

    /// The runtime if it has already been loaded
    pub fn loaded(&self) -> Option<Arc<dyn InferenceRuntime>> {
        self.runtime.get()
    }

    /// Number of load attempts started so far
    pub fn load_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }
}

/// Loads ONNX Runtime from `RuntimeSettings::asset_dir`
#[derive(Debug, Default)]
pub struct OrtRuntimeProvider;

impl OrtRuntimeProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RuntimeProvider for OrtRuntimeProvider {
    async fn load(&self, settings: &RuntimeSettings) -> Result<Arc<dyn InferenceRuntime>> {
        let settings = settings.clone();

        let runtime = tokio::task::spawn_blocking(move || OrtRuntime::load(settings))
            .await
            .map_err(|e| Error::runtime_load(format!("runtime loader task failed: {}", e)))??;

        Ok(Arc::new(runtime))
    }

    fn name(&self) -> &str {
        "onnxruntime"
    }
}

/// ONNX Runtime loaded from a shared library on disk
pub struct OrtRuntime {
    library_path: PathBuf,
    settings: RuntimeSettings,
    // Keeps the probed library mapped for as long as sessions may use it
    _library: Arc<libloading::Library>,
}

impl OrtRuntime {
    /// Locate, probe and initialize the runtime library
    pub fn load(settings: RuntimeSettings) -> Result<Self> {
        let library_path = settings.library_path();

        if !library_path.is_file() {
            return Err(Error::runtime_load(format!(
                "runtime asset not found at {}",
                library_path.display()
            )));
        }

        let library = probe_library(&library_path)?;

        if settings.simd {
            tracing::debug!("SIMD requested; kernel selection is left to the runtime build");
        }

        let committed = ort::init_from(library_path.display().to_string())
            .with_name("leafscan")
            .commit();
        environment_committed(committed, &library_path)?;
        tracing::debug!(library = %library_path.display(), "ONNX Runtime environment initialized");

        Ok(Self {
            library_path,
            settings,
            _library: Arc::new(library),
        })
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }
}

impl InferenceRuntime for OrtRuntime {
    fn name(&self) -> &str {
        "onnxruntime"
    }

    fn create_session(
        &self,
        model_path: &Path,
        input_name: &str,
    ) -> Result<Arc<dyn ModelSession>> {
        let session = OrtSession::from_file(model_path, input_name, &self.settings)?;
        Ok(Arc::new(session))
    }
}

fn environment_committed<T, E: std::fmt::Display>(
    outcome: std::result::Result<T, E>,
    library_path: &Path,
) -> Result<T> {
    outcome.map_err(|e| {
        Error::runtime_load(format!(
            "failed to initialize ONNX Runtime from {}: {}",
            library_path.display(),
            e
        ))
    })
}

/// Open the library and check that it exposes the ONNX Runtime entry point
fn probe_library(path: &Path) -> Result<libloading::Library> {
    // SAFETY: loading a shared library runs its initializers; the file is the
    // self-hosted runtime named by configuration.
    let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
        Error::runtime_load(format!("failed to open {}: {}", path.display(), e))
    })?;

    // SAFETY: the symbol is only looked up, never called.
    let entry = unsafe { library.get::<unsafe extern "C" fn()>(b"OrtGetApiBase\0") };
    if entry.is_err() {
        return Err(Error::runtime_load(format!(
            "{} does not expose OrtGetApiBase",
            path.display()
        )));
    }
    drop(entry);

    Ok(library)
}
