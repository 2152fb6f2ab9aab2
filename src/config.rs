use crate::language::lexer::LexOptions;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Environment options, usually read from an `asyncplate.toml`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub autoescape: bool,
    pub throw_on_undefined: bool,
    pub trim_blocks: bool,
    pub lstrip_blocks: bool,
    /// Use the async generator; when false, pending values are render errors.
    pub async_mode: bool,
    pub cache: bool,
    pub template_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            autoescape: true,
            throw_on_undefined: false,
            trim_blocks: false,
            lstrip_blocks: false,
            async_mode: true,
            cache: true,
            template_root: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("Invalid config {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        let mut config: Config = toml::from_str(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        if let Some(root) = &config.template_root {
            if root.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                config.template_root = Some(base.join(root));
            }
        }
        Ok(config)
    }

    /// `ASYNCPLATE_MODE=sync|async` and `ASYNCPLATE_AUTOESCAPE=0|1` override the file.
    pub fn apply_env(&mut self) {
        if let Ok(mode) = env::var("ASYNCPLATE_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "sync" => self.async_mode = false,
                "async" => self.async_mode = true,
                other => tracing::warn!(value = other, "ignoring unknown ASYNCPLATE_MODE"),
            }
        }
        if let Ok(flag) = env::var("ASYNCPLATE_AUTOESCAPE") {
            match flag.trim() {
                "0" | "false" => self.autoescape = false,
                "1" | "true" => self.autoescape = true,
                other => tracing::warn!(value = other, "ignoring unknown ASYNCPLATE_AUTOESCAPE"),
            }
        }
    }

    pub fn lex_options(&self) -> LexOptions {
        LexOptions {
            trim_blocks: self.trim_blocks,
            lstrip_blocks: self.lstrip_blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config: Config = toml::from_str("trim_blocks = true").unwrap();
        assert!(config.trim_blocks);
        assert!(config.autoescape);
        assert!(config.async_mode);
    }

    #[test]
    fn load_resolves_root_next_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asyncplate.toml");
        fs::write(&path, "template_root = \"views\"\nasync_mode = false\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.template_root, Some(dir.path().join("views")));
        assert!(!config.async_mode);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "autoscape = false\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
