//! Wiring the classification stack from configuration

use crate::classifier::ImageClassifier;
use crate::config::ClassifierConfig;
use crate::fallback::FallbackClassifier;
use crate::pipeline::InferencePipeline;
use crate::remote::{ChatClient, RemoteClassifier};
use crate::runtime::{OrtRuntimeProvider, RuntimeLoader, RuntimeProvider};
use crate::session::ModelSessionManager;
use leafscan_core::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything needed to classify images and chat, built from one config
pub struct ClassifierRegistry {
    config: ClassifierConfig,
    pipeline: Arc<InferencePipeline>,
    remote: Option<Arc<RemoteClassifier>>,
    chat: Option<Arc<ChatClient>>,
    fallback: Arc<FallbackClassifier>,
}

impl ClassifierRegistry {
    /// Build the registry with the ONNX Runtime provider
    pub fn from_config(config: ClassifierConfig) -> Result<Self> {
        RegistryBuilder::new(config).build()
    }

    /// Load configuration from a YAML file and build the registry
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(ClassifierConfig::from_file(path)?)
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// The local inference pipeline
    pub fn pipeline(&self) -> &Arc<InferencePipeline> {
        &self.pipeline
    }

    /// The remote classifier, when a backend is configured
    pub fn remote(&self) -> Option<&Arc<RemoteClassifier>> {
        self.remote.as_ref()
    }

    /// The chat client, when a backend is configured
    pub fn chat_client(&self) -> Option<&Arc<ChatClient>> {
        self.chat.as_ref()
    }

    /// Local-first classifier with the remote fallback, if any
    pub fn fallback(&self) -> &Arc<FallbackClassifier> {
        &self.fallback
    }

    /// Preload the runtime and model, returning how long it took
    pub async fn warmup(&self, cancel: &CancellationToken) -> Result<Duration> {
        let start = Instant::now();
        self.pipeline.warmup(cancel).await?;

        let elapsed = start.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "Warmup complete");
        Ok(elapsed)
    }
}

/// Builder for [`ClassifierRegistry`] with injectable runtime
pub struct RegistryBuilder {
    config: ClassifierConfig,
    provider: Option<Arc<dyn RuntimeProvider>>,
    model_cache_dir: Option<PathBuf>,
    remote_enabled: bool,
}

impl RegistryBuilder {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            provider: None,
            model_cache_dir: None,
            remote_enabled: true,
        }
    }

    /// Use a custom runtime provider instead of ONNX Runtime
    pub fn with_runtime_provider(mut self, provider: Arc<dyn RuntimeProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Where downloaded models are cached
    pub fn with_model_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_cache_dir = Some(dir.into());
        self
    }

    /// Disable the remote classifier even when a backend is configured
    pub fn without_remote(mut self) -> Self {
        self.remote_enabled = false;
        self
    }

    pub fn build(self) -> Result<ClassifierRegistry> {
        let config = self.config;
        config.validate()?;

        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(OrtRuntimeProvider::new()));
        info!(provider = provider.name(), "Initializing classifier registry");

        let runtime = Arc::new(RuntimeLoader::new(provider, config.runtime.clone()));
        let mut sessions = ModelSessionManager::new(runtime, config.model.input_name.clone());
        if let Some(dir) = self.model_cache_dir {
            sessions = sessions.with_cache_dir(dir);
        }

        let pipeline = Arc::new(InferencePipeline::from_config(Arc::new(sessions), &config)?);

        let (remote, chat) = if config.remote.is_enabled() {
            let chat = Arc::new(ChatClient::from_config(&config.remote)?);
            let remote = if self.remote_enabled {
                Some(Arc::new(RemoteClassifier::from_config(
                    &config.remote,
                    config.top_k,
                )?))
            } else {
                None
            };
            (remote, Some(chat))
        } else {
            (None, None)
        };

        let mut fallback = FallbackClassifier::new(pipeline.clone() as Arc<dyn ImageClassifier>);
        if let Some(remote) = &remote {
            info!(endpoint = remote.endpoint(), "Remote fallback enabled");
            fallback = fallback.with_fallback(remote.clone() as Arc<dyn ImageClassifier>);
        }

        Ok(ClassifierRegistry {
            config,
            pipeline,
            remote,
            chat,
            fallback: Arc::new(fallback),
        })
    }
}
