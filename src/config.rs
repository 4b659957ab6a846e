use config::{Config, Environment};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Base directory of the canonical file tree.
    pub base_dir: String,
    /// Postgres connection string for the mirror; absent means no mirror
    /// and therefore no semantic search.
    pub database_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible embeddings endpoint. Empty means not configured.
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Upper bound on one embedding call; the service behind the endpoint
    /// is not ours to control.
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_url.is_empty()
    }
}

impl MemoryConfig {
    /// Defaults overridden by `MEMVAULT_`-prefixed environment variables,
    /// e.g. `MEMVAULT_STORAGE__BASE_DIR=/data/memories` or
    /// `MEMVAULT_EMBEDDING__API_URL=https://api.openai.com/v1/embeddings`.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        builder = builder
            .set_default("storage.base_dir", "./memories")?
            .set_default("embedding.api_url", "")?
            .set_default("embedding.model", "text-embedding-3-small")?
            .set_default("embedding.timeout_secs", 10)?;

        builder = builder.add_source(
            Environment::with_prefix("MEMVAULT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}
