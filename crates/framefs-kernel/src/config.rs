//! Filesystem configuration.
//!
//! ```toml
//! backing_storage = "~/captures"
//! extension = "tga"
//! hide_files = false
//!
//! [handler]
//! blend_rate = 1
//! shutter_angle = 180
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::sequence::{CaptureFactory, DEFAULT_EXTENSION, HandlerParams, SequenceClassifier, SequenceRouter};
use crate::vfs::LocalBackend;

/// Errors loading or validating a [`FsConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("backing_storage must not be empty")]
    MissingBackingStorage,

    #[error("backing storage is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("invalid frame extension: {0:?}")]
    InvalidExtension(String),

    #[error("blend_rate must be at least 1, got {0}")]
    InvalidBlendRate(u32),

    #[error("shutter_angle must be within 0..=360, got {0}")]
    InvalidShutterAngle(u32),
}

/// Everything needed to stand up a [`SequenceRouter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FsConfig {
    /// Directory the overlay passes through to. `~` is expanded.
    pub backing_storage: String,
    /// Frame extension, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Start with directory enumeration hidden.
    #[serde(default)]
    pub hide_files: bool,
    #[serde(default)]
    pub handler: HandlerParams,
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

impl FsConfig {
    /// Config for `backing_storage` with everything else defaulted.
    pub fn new(backing_storage: impl Into<String>) -> Self {
        Self {
            backing_storage: backing_storage.into(),
            extension: default_extension(),
            hide_files: false,
            handler: HandlerParams::default(),
        }
    }

    /// Parse and validate.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file. `~` in `path` is expanded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = expand(&path.as_ref().to_string_lossy());
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Check the values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backing_storage.trim().is_empty() {
            return Err(ConfigError::MissingBackingStorage);
        }
        let ext = self.extension.trim_start_matches('.');
        if ext.is_empty() || ext.contains(['/', '\\']) || !ext.is_ascii() {
            return Err(ConfigError::InvalidExtension(self.extension.clone()));
        }
        if self.handler.blend_rate < 1 {
            return Err(ConfigError::InvalidBlendRate(self.handler.blend_rate));
        }
        if self.handler.shutter_angle > 360 {
            return Err(ConfigError::InvalidShutterAngle(self.handler.shutter_angle));
        }
        Ok(())
    }

    /// `backing_storage` with `~` expanded.
    pub fn backing_path(&self) -> PathBuf {
        expand(&self.backing_storage)
    }

    pub fn classifier(&self) -> SequenceClassifier {
        SequenceClassifier::new(&self.extension)
    }

    /// Build a router over the backing directory with capture handlers.
    ///
    /// The backing directory must already exist.
    pub fn build_router(&self) -> Result<SequenceRouter, ConfigError> {
        self.validate()?;
        let root = self.backing_path();
        if !root.is_dir() {
            return Err(ConfigError::NotADirectory(root));
        }

        let backend = Arc::new(LocalBackend::new(&root));
        tracing::info!(
            root = %backend.root().display(),
            extension = %self.extension,
            hide_files = self.hide_files,
            "framefs router ready"
        );

        let router = SequenceRouter::new(backend, Arc::new(CaptureFactory), self.handler)
            .with_classifier(self.classifier());
        router.set_hide_files(self.hide_files);
        Ok(router)
    }
}

fn expand(path: &str) -> PathBuf {
    shellexpand::tilde(path).as_ref().into()
}
