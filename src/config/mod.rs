// Configuration management module
// TOML settings for the embedding endpoint, the local store and the remote index

pub mod settings;

#[cfg(test)]
mod tests;

pub use settings::{
    Backend, Config, ConfigError, DEFAULT_EMBEDDING_DIMENSION, EmbeddingConfig, RemoteConfig,
    StoreConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Render the effective configuration as TOML, with its file location
#[inline]
pub fn show_config(config: &Config) -> anyhow::Result<String> {
    let body = toml::to_string_pretty(config)?;
    Ok(format!(
        "# {}\n{}",
        config.config_file_path().display(),
        body
    ))
}
