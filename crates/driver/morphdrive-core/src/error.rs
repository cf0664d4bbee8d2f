//! Error types for the driver compiler

use serde::{Deserialize, Serialize};

use morphdrive_api_core::PathError;

/// Conditions that stop the current formula. Everything recoverable is
/// reported through [`crate::diagnostics::DiagnosticLog`] instead.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DriverError {
    /// Piecewise spline text over the hard ceiling
    #[error("String driver too long for {channel}: {len} chars (limit {limit}): {preview}")]
    SplineTooLong {
        channel: String,
        len: usize,
        limit: usize,
        preview: String,
    },

    /// No free variable name left in a pool
    #[error("Variable names exhausted on {channel}: {pool} pool holds {capacity} names")]
    NamespaceExhausted {
        channel: String,
        pool: String,
        capacity: usize,
    },

    /// Expression text over the size limit
    #[error("Expression too long for {channel}: {len} chars (limit {limit})")]
    ExpressionTooLong {
        channel: String,
        len: usize,
        limit: usize,
    },

    /// Invalid channel path
    #[error("Invalid channel path: {reason}")]
    Path { reason: String },
}

impl DriverError {
    /// Fatal errors abort the pass; the rest are folded into diagnostics by the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DriverError::ExpressionTooLong { .. })
    }
}

impl From<PathError> for DriverError {
    fn from(err: PathError) -> Self {
        DriverError::Path {
            reason: err.to_string(),
        }
    }
}

/// First characters of an over-long text, for error messages.
pub(crate) fn preview(text: &str) -> String {
    const PREVIEW: usize = 60;
    if text.chars().count() <= PREVIEW {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_size_overflow_is_recoverable() {
        let too_long = DriverError::ExpressionTooLong {
            channel: "Smile".into(),
            len: 300,
            limit: 255,
        };
        assert!(!too_long.is_fatal());
        let spline = DriverError::SplineTooLong {
            channel: "Smile".into(),
            len: 300,
            limit: 254,
            preview: preview(&"x".repeat(300)),
        };
        assert!(spline.is_fatal());
        assert!(spline.to_string().starts_with("String driver too long"));
    }

    #[test]
    fn path_errors_convert() {
        let err: DriverError = PathError::Empty.into();
        assert_eq!(
            err,
            DriverError::Path {
                reason: "empty channel path".into()
            }
        );
    }
}
