mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./kino.toml",
        "~/.config/kino/config.toml",
        "/etc/kino/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if !config.media.root.exists() {
        tracing::warn!("Media root does not exist: {:?}", config.media.root);
    }

    let transcoding = &config.transcoding;
    if transcoding.max_sessions == 0 {
        anyhow::bail!("transcoding.max_sessions must be at least 1");
    }
    if transcoding.segment_duration == 0 {
        anyhow::bail!("transcoding.segment_duration must be at least 1 second");
    }

    let mut seen = HashSet::new();
    for profile in &transcoding.profiles {
        if profile.name.is_empty() {
            anyhow::bail!("Transcoding profile with an empty name");
        }
        if !seen.insert(profile.name.as_str()) {
            anyhow::bail!("Duplicate transcoding profile '{}'", profile.name);
        }
    }

    Ok(())
}
