//! Error type shared by every fallible constructor in the crate.
//!
//! Everything here is a configuration error: the geometry pair (or the loader
//! that produced it) cannot be used, and nothing built from it is published.
//! Recoverable conditions (solver not ready, stale clamp targets) never
//! surface as `MapError`; they are `None` returns or diagnostics.

use thiserror::Error;

pub type MapResult<T> = Result<T, MapError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    /// A grid is missing a per-vertex attachment the mapper needs.
    #[error("{grid} grid '{name}' has no '{attachment}' attachment")]
    MissingAttachment {
        grid: &'static str,
        name: String,
        attachment: &'static str,
    },

    /// An attachment does not carry one value per vertex.
    #[error("attachment '{attachment}' has {actual} entries, expected {expected}")]
    AttachmentLength {
        attachment: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Skeleton and surface do not describe the same cell.
    #[error("skeleton '{skeleton}' and surface '{surface}' do not match: {reason}")]
    GridMismatch {
        skeleton: String,
        surface: String,
        reason: String,
    },

    /// Structurally broken grid (bad indices, non-finite positions, ...).
    #[error("invalid geometry: {message}")]
    InvalidGeometry { message: String },

    /// The geometry source could not produce a grid.
    #[error("loader error: {message}")]
    Loader { message: String },
}

impl MapError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            message: message.into(),
        }
    }

    pub fn loader(message: impl Into<String>) -> Self {
        Self::Loader {
            message: message.into(),
        }
    }

    pub fn mismatch(skeleton: &str, surface: &str, reason: impl Into<String>) -> Self {
        Self::GridMismatch {
            skeleton: skeleton.to_string(),
            surface: surface.to_string(),
            reason: reason.into(),
        }
    }
}
