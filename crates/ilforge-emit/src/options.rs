//! Session options, loadable from TOML.
//!
//! ```toml
//! arity = "unary"
//! max_stack = 32
//! compress_image = true
//! ```

use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ilforge_core::{verify::DEFAULT_MAX_STACK, ILIMG_VERSION};

/// How many parameters a method may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArityPolicy {
    /// Any ordered parameter list.
    #[default]
    Any,
    /// Exactly one parameter.
    Unary,
}

/// Options of a generation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionOptions {
    /// Parameter-list policy for declared methods.
    pub arity: ArityPolicy,
    /// Verifier bound on evaluation stack depth.
    pub max_stack: u16,
    /// Compress the CODE section when persisting (needs the `zstd` feature).
    pub compress_image: bool,
    /// ILIMG format version written on persist.
    pub image_version: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            arity: ArityPolicy::Any,
            max_stack: DEFAULT_MAX_STACK,
            compress_image: false,
            image_version: ILIMG_VERSION,
        }
    }
}

/// Failure to load [`SessionOptions`].
#[derive(Debug, Error)]
pub enum OptionsError {
    /// Reading the file failed.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// Options file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// TOML syntax or schema error.
    #[error("invalid options: {0}")]
    Parse(#[from] toml::de::Error),
    /// Well-formed but unusable value.
    #[error("invalid options: {0}")]
    Invalid(String),
}

impl SessionOptions {
    /// Parse options from a TOML document; missing keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, OptionsError> {
        let opts: Self = toml::from_str(src)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Load options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let path = path.as_ref();
        let src = fs::read_to_string(path).map_err(|source| OptionsError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&src)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.max_stack == 0 {
            return Err(OptionsError::Invalid("max_stack must be at least 1".into()));
        }
        if self.image_version == 0 || self.image_version > ILIMG_VERSION {
            return Err(OptionsError::Invalid(format!(
                "image_version {} not supported (1..={ILIMG_VERSION})",
                self.image_version
            )));
        }
        Ok(())
    }
}
