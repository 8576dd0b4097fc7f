//! Federation error taxonomy

use thiserror::Error;

/// Errors raised by the key store, the object resolver and the transforms.
///
/// None of these are retried inside the federation layer.
#[derive(Debug, Error)]
pub enum FederationError {
    /// A wire object lacks a field the transform needs (id, type, attributedTo, ...)
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    /// A wire object's `type` is not the expected vocabulary term
    #[error("expected {expected} but got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    /// A key store record required by the caller does not exist
    #[error("no federation identity for actor {0}")]
    IdentityNotFound(String),

    /// A remote object could not be fetched or decoded
    #[error("failed to resolve remote object: {0}")]
    ResolutionFailure(String),

    /// RSA key material could not be generated or encoded
    #[error("failed to generate signing keys: {0}")]
    KeyGeneration(String),
}

impl FederationError {
    pub fn type_mismatch(expected: &'static str, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected,
            found: found.into(),
        }
    }
}
