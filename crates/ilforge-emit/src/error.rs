//! Error taxonomy of a generation session.
//!
//! Every kind except [`invariant_violation`] is local and synchronous: it is
//! returned to the caller of the offending operation and nothing is retried.

use std::{fmt, path::PathBuf};

use thiserror::Error;

use ilforge_core::{verify::VerifyError, CoreError};
use ilforge_image::ImageError;

/// Result alias for builder, finalization and binding operations.
pub type EmitResult<T> = Result<T, Error>;

/// Failure of a session, binder or persistence operation.
#[derive(Debug, Error)]
pub enum Error {
    /// A module, type or method with the same identity already exists.
    #[error("duplicate {kind} `{name}`")]
    DuplicateDeclaration {
        /// `module`, `type` or `method`.
        kind: &'static str,
        /// Offending name (methods include their parameter list).
        name: String,
    },

    /// The target (type or assembly) was already finalized.
    #[error("{what} is already finalized")]
    AlreadyFinalized {
        /// What was finalized.
        what: String,
    },

    /// The target must be finalized first.
    #[error("{what} is not finalized yet")]
    NotFinalized {
        /// What is still open.
        what: String,
    },

    /// A method was declared but never closed.
    #[error("method `{method}` of `{ty}` was never closed")]
    IncompleteMethod {
        /// Owning type.
        ty: String,
        /// Open method.
        method: String,
    },

    /// Emission into a closed method.
    #[error("instruction stream of `{method}` is closed")]
    StreamClosed {
        /// Closed method.
        method: String,
    },

    /// No method by that name on the type.
    #[error("no method `{method}` on `{ty}`")]
    MethodNotFound {
        /// Searched type.
        ty: String,
        /// Requested name.
        method: String,
    },

    /// No type by that name in the assembly.
    #[error("no type `{name}` in assembly `{assembly}`")]
    TypeNotFound {
        /// Searched assembly.
        assembly: String,
        /// Requested fully-qualified name.
        name: String,
    },

    /// Methods by that name exist but none has the requested signature.
    #[error("`{method}` has no overload {requested} (available: {available})")]
    SignatureMismatch {
        /// `Type::method`.
        method: String,
        /// Signature asked for.
        requested: String,
        /// Declared signatures, `|`-separated.
        available: String,
    },

    /// Another operation holds the session.
    #[error("concurrent mutation of the session rejected")]
    ConcurrentMutation,

    /// Persistence I/O failed; the in-memory form is untouched.
    #[error("I/O on {}: {source}", path.display())]
    Io {
        /// Destination or source file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Persisted image is malformed.
    #[error("image: {0}")]
    Image(#[source] ImageError),

    /// A closed method body failed verification at finalization or load.
    #[error("method `{method}` failed verification: {source}")]
    Verification {
        /// `Type::method`.
        method: String,
        /// Verifier diagnostic (pc + reason).
        #[source]
        source: VerifyError,
    },

    /// A declaration is rejected by attribute, name or arity rules.
    #[error("invalid declaration: {reason}")]
    InvalidDeclaration {
        /// Rule that was broken.
        reason: String,
    },

    /// A handle from another session.
    #[error("handle belongs to another session")]
    ForeignHandle,

    /// The loader could not produce an entry point.
    #[error("cannot load `{method}`: {reason}")]
    LoadFailed {
        /// `Type::method`.
        method: String,
        /// Loader diagnostic.
        reason: String,
    },
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self { Self::InvalidDeclaration { reason: reason.into() } }
}

impl From<ImageError> for Error {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Io { path, source } => Self::Io { path, source },
            other => Self::Image(other),
        }
    }
}

impl From<CoreError> for Error {
    fn from(e: CoreError) -> Self { Self::Image(ImageError::Core(e)) }
}

/// Aborts on a broken finalize-then-bind contract.
///
/// Only reached when the implementation itself is wrong (a verified body
/// producing a value of the wrong type, say), never on caller misuse.
#[track_caller]
#[cold]
pub fn invariant_violation(what: impl fmt::Display) -> ! {
    tracing::error!(%what, "invariant violation");
    panic!("invariant violation: {what}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_io_errors_become_io() {
        let e: Error = ImageError::Io {
            path: "out.ilimg".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        }
        .into();
        assert!(matches!(e, Error::Io { .. }));
        assert!(e.to_string().starts_with("I/O on out.ilimg"));
    }

    #[test]
    #[should_panic(expected = "invariant violation: stack drift")]
    fn invariant_violation_panics() {
        invariant_violation("stack drift");
    }
}
