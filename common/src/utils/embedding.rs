use std::{
    collections::hash_map::DefaultHasher,
    fmt, fs,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, InitOptionsUserDefined, ModelTrait, Pooling, TextEmbedding,
    TextInitOptions, TokenizerFiles, UserDefinedEmbeddingModel,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackend},
};

/// Converts text into fixed-dimension vectors.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    Hashed {
        dimension: usize,
        /// Batches served so far; those past `healthy_batches` come back one
        /// component too wide.
        batches: Arc<AtomicUsize>,
        healthy_batches: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        label: String,
        dimension: usize,
    },
}

/// Where a model can be loaded from, in the order the provider tries them.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Hub {
        model: EmbeddingModel,
        cache_dir: Option<PathBuf>,
    },
    /// Previously downloaded ONNX model and tokenizer files; never touches the network.
    LocalCache { dir: PathBuf },
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hub { model, .. } => write!(f, "hub:{model}"),
            Self::LocalCache { dir } => write!(f, "local:{}", dir.display()),
        }
    }
}

/// Loads one model source. Swappable so the fallback order can be exercised
/// without downloading models.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, source: &ModelSource) -> Result<EmbeddingProvider>;
}

pub struct FastEmbedLoader;

#[async_trait]
impl ModelLoader for FastEmbedLoader {
    async fn load(&self, source: &ModelSource) -> Result<EmbeddingProvider> {
        match source {
            ModelSource::Hub { model, cache_dir } => {
                EmbeddingProvider::new_fastembed(model.clone(), cache_dir.clone()).await
            }
            ModelSource::LocalCache { dir } => EmbeddingProvider::new_local(dir.clone()).await,
        }
    }
}

impl EmbeddingProvider {
    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension, .. } | EmbeddingInner::FastEmbed { dimension, .. } => {
                *dimension
            }
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.inner {
            EmbeddingInner::FastEmbed { label, .. } => Some(label.clone()),
            EmbeddingInner::Hashed { .. } => None,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(vec![text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding backend returned no vector for input"))
    }

    /// Embeds a batch on the blocking pool; inference never runs on the async executor.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        match &self.inner {
            EmbeddingInner::Hashed {
                dimension,
                batches,
                healthy_batches,
            } => {
                let served = batches.fetch_add(1, Ordering::SeqCst);
                let width = if served < *healthy_batches {
                    *dimension
                } else {
                    dimension.saturating_add(1)
                };
                Ok(texts
                    .into_iter()
                    .map(|text| hashed_embedding(&text, width))
                    .collect())
            }
            EmbeddingInner::FastEmbed { model, .. } => {
                if texts.is_empty() {
                    return Ok(Vec::new());
                }
                let model = Arc::clone(model);
                tokio::task::spawn_blocking(move || {
                    let mut guard = model.blocking_lock();
                    guard.embed(texts, None)
                })
                .await
                .context("joining fastembed inference task")?
                .context("generating fastembed batch embeddings")
            }
        }
    }

    pub async fn new_fastembed(model_name: EmbeddingModel, cache_dir: Option<PathBuf>) -> Result<Self> {
        let mut options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);
        if let Some(dir) = cache_dir {
            fs::create_dir_all(&dir)?;
            options = options.with_cache_dir(dir);
        }
        let model_name_for_task = model_name.clone();
        let model_name_code = model_name.to_string();

        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let model =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            let info = EmbeddingModel::get_model_info(&model_name_for_task)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {model_name_code}"))?;
            Ok((model, info.dim))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        Ok(EmbeddingProvider {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                label: model_name.to_string(),
                dimension,
            },
        })
    }

    /// Loads a model from files already on disk.
    pub async fn new_local(dir: PathBuf) -> Result<Self> {
        let label = format!("local:{}", dir.display());
        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let read = |name: &str| -> Result<Vec<u8>> {
                let path = dir.join(name);
                fs::read(&path).with_context(|| format!("reading {}", path.display()))
            };
            let tokenizer_files = TokenizerFiles {
                tokenizer_file: read("tokenizer.json")?,
                config_file: read("config.json")?,
                special_tokens_map_file: read("special_tokens_map.json")?,
                tokenizer_config_file: read("tokenizer_config.json")?,
            };
            let user_model = UserDefinedEmbeddingModel::new(read("model.onnx")?, tokenizer_files)
                .with_pooling(Pooling::Mean);
            let mut model = TextEmbedding::try_new_from_user_defined(
                user_model,
                InitOptionsUserDefined::default(),
            )
            .context("initialising local embedding model")?;
            let probe = model
                .embed(vec!["dimension probe".to_string()], None)
                .context("probing local embedding model")?;
            let dimension = probe
                .first()
                .map(Vec::len)
                .ok_or_else(|| anyhow!("local embedding model produced no output"))?;
            Ok((model, dimension))
        })
        .await
        .context("joining local model initialisation task")??;

        Ok(EmbeddingProvider {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                label,
                dimension,
            },
        })
    }

    pub fn new_hashed(dimension: usize) -> Result<Self> {
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
                batches: Arc::new(AtomicUsize::new(0)),
                healthy_batches: usize::MAX,
            },
        })
    }

    /// Hashed provider whose batches after the first `healthy_batches` have
    /// the wrong dimension, so the index rejects them.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_hashed_degrading(dimension: usize, healthy_batches: usize) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
                batches: Arc::new(AtomicUsize::new(0)),
                healthy_batches,
            },
        }
    }

    /// Number of batch calls a hashed provider has served.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn batches_served(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { batches, .. } => batches.load(Ordering::SeqCst),
            EmbeddingInner::FastEmbed { .. } => 0,
        }
    }

    /// Builds the provider the configuration asks for, walking the model
    /// fallback chain for the fastembed backend.
    pub async fn from_config(config: &AppConfig, loader: &dyn ModelLoader) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackend::Hashed => {
                Ok(Self::new_hashed(config.hashed_embedding_dimension)?)
            }
            EmbeddingBackend::FastEmbed => {
                let sources = model_sources(config)?;
                Self::load_first_available(&sources, loader).await
            }
        }
    }

    /// Tries each source in order and keeps the first that loads.
    pub async fn load_first_available(
        sources: &[ModelSource],
        loader: &dyn ModelLoader,
    ) -> Result<Self, AppError> {
        let mut failures = Vec::with_capacity(sources.len());
        for source in sources {
            match loader.load(source).await {
                Ok(provider) => {
                    info!(
                        source = %source,
                        dimension = provider.dimension(),
                        "embedding model loaded"
                    );
                    return Ok(provider);
                }
                Err(err) => {
                    warn!(source = %source, error = %err, "embedding model source failed");
                    failures.push(format!("{source}: {err:#}"));
                }
            }
        }

        Err(AppError::Unavailable(format!(
            "no embedding model could be loaded ({})",
            failures.join("; ")
        )))
    }
}

/// Preferred multilingual model, the smaller fallback, then the offline cache.
pub fn model_sources(config: &AppConfig) -> Result<Vec<ModelSource>, AppError> {
    let parse = |code: &str| {
        EmbeddingModel::from_str(code)
            .map_err(|err| AppError::Validation(format!("unknown embedding model '{code}': {err}")))
    };
    let preferred = match &config.embedding_model {
        Some(code) => parse(code)?,
        None => EmbeddingModel::ParaphraseMLMiniLML12V2,
    };
    let fallback = match &config.embedding_fallback_model {
        Some(code) => parse(code)?,
        None => EmbeddingModel::AllMiniLML6V2,
    };
    let cache_dir = config
        .fastembed_cache_dir
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| Some(Path::new(&config.data_dir).join("fastembed")));
    let local_dir = config.embedding_local_model_dir.as_ref().map_or_else(
        || {
            Path::new(&config.data_dir)
                .join("models")
                .join("paraphrase-multilingual-MiniLM-L12-v2")
        },
        PathBuf::from,
    );

    Ok(vec![
        ModelSource::Hub {
            model: preferred,
            cache_dir: cache_dir.clone(),
        },
        ModelSource::Hub {
            model: fallback,
            cache_dir,
        },
        ModelSource::LocalCache { dir: local_dir },
    ])
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0usize;
    for token in tokens(text) {
        token_count += 1;
        if let Some(slot) = vector.get_mut(bucket(&token, dim)) {
            *slot += 1.0;
        }
    }

    if token_count == 0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct ScriptedLoader {
        fail_first: usize,
        attempts: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelLoader for ScriptedLoader {
        async fn load(&self, source: &ModelSource) -> Result<EmbeddingProvider> {
            let mut attempts = self.attempts.lock().expect("lock");
            attempts.push(source.to_string());
            if attempts.len() <= self.fail_first {
                return Err(anyhow!("network timeout"));
            }
            EmbeddingProvider::new_hashed(8)
        }
    }

    fn fastembed_config() -> AppConfig {
        AppConfig {
            data_dir: "/tmp/library".into(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_model_sources_follow_preference_order() {
        let sources = model_sources(&fastembed_config()).expect("sources");
        assert_eq!(sources.len(), 3);
        assert!(matches!(
            &sources[0],
            ModelSource::Hub { model: EmbeddingModel::ParaphraseMLMiniLML12V2, .. }
        ));
        assert!(matches!(
            &sources[1],
            ModelSource::Hub { model: EmbeddingModel::AllMiniLML6V2, .. }
        ));
        assert!(matches!(&sources[2], ModelSource::LocalCache { .. }));
    }

    #[tokio::test]
    async fn test_falls_back_to_next_source() {
        let loader = ScriptedLoader {
            fail_first: 1,
            attempts: StdMutex::new(Vec::new()),
        };
        let sources = model_sources(&fastembed_config()).expect("sources");
        let provider = EmbeddingProvider::load_first_available(&sources, &loader)
            .await
            .expect("second source loads");
        assert_eq!(provider.dimension(), 8);
        assert_eq!(loader.attempts.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn test_all_sources_failing_reports_unavailable() {
        let loader = ScriptedLoader {
            fail_first: usize::MAX,
            attempts: StdMutex::new(Vec::new()),
        };
        let sources = model_sources(&fastembed_config()).expect("sources");
        let result = EmbeddingProvider::load_first_available(&sources, &loader).await;
        assert!(matches!(result, Err(AppError::Unavailable(_))));
        assert_eq!(loader.attempts.lock().expect("lock").len(), 3);
    }

    #[tokio::test]
    async fn test_hashed_backend_is_normalised_and_deterministic() {
        let provider = EmbeddingProvider::new_hashed(64).expect("hashed");
        let a = provider.embed("Sparse attention scales").await.expect("embed");
        let b = provider.embed("sparse attention SCALES").await.expect("embed");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
