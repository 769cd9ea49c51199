//! Error taxonomy of the registration pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by frame loading, alignment, and stacking.
///
/// Two failure classes are deliberately *not* represented here: a checksum
/// mismatch yields a fresh metadata record (reported as
/// [`LoadOutcome::Invalidated`](crate::frame::LoadOutcome)), and a failed
/// per-candidate refinement inside detection drops the candidate with a
/// debug log entry. Nothing in the pipeline is retried.
#[derive(Debug, Error)]
pub enum Error {
    /// The source image file does not exist.
    #[error("source image not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The image container could not be decoded.
    #[error("failed to decode {}", path.display())]
    Decode {
        /// Path of the offending file.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Alignment was requested for a frame whose stars have not been registered.
    #[error("frame has no registered stars: {}", .0.display())]
    Unregistered(PathBuf),

    /// The matcher found no transform consistent with both star fields.
    #[error("no consistent transform between the star fields")]
    NoTransform,

    /// A frame pushed into the accumulator has the wrong shape.
    #[error("frame shape {actual:?} does not match stack shape {expected:?}")]
    ShapeMismatch {
        /// Shape of the frames accumulated so far.
        expected: (usize, usize),
        /// Shape of the rejected frame.
        actual: (usize, usize),
    },

    /// Sidecar or image I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization failure.
    #[error("failed to serialize metadata")]
    Meta(#[from] serde_json::Error),
}
