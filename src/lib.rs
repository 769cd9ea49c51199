#![warn(missing_docs)]

//! Astrophotography frame registration and stacking.
//!
//! `starstack` detects point sources ("stars") in captured frames, aligns
//! frames against a chosen reference frame by matching star patterns, and
//! keeps a checksum-validated metadata sidecar next to every image file so
//! repeated runs skip work that is already done. A lightweight accumulator
//! folds aligned frames into a running mean image.
//!
//! ## Pipeline
//! 1. [`StarDetector`] finds stars in a grayscale frame: a coarse multi-scale
//!    blob search on a downscaled copy, followed by per-candidate sub-pixel
//!    refinement on an upscaled crop with a 2D Gaussian fit for the spread
//!    estimate.
//! 2. [`StarMatcher`] matches the star patterns of two frames via triangle
//!    asterism hashes and fits the similarity transform mapping target
//!    coordinates onto reference coordinates.
//! 3. [`FrameStack`] maintains a running mean of aligned frames.
//!
//! Per-frame state lives in a JSON sidecar at `<image path>.meta.json`
//! (see [`store::SidecarStore`]); its validity is tied to the SHA-256 of the
//! image bytes, not to the file name. A frame can hold independent transforms
//! to any number of reference frames, keyed by the reference's record id.
//!
//! Example:
//! ```no_run
//! use starstack::{pipeline, StarDetector};
//! use starstack::store::SidecarStore;
//! use std::path::PathBuf;
//!
//! let mut store = SidecarStore;
//! let detector = StarDetector::default();
//! let files: Vec<PathBuf> = vec!["light_0001.png".into(), "light_0002.png".into()];
//! pipeline::register_frames(&mut store, &files, &detector, false);
//! pipeline::align_frames(&mut store, &files[0], &files[1..]).unwrap();
//! ```
//!
//! ## Parameters
//! - `tolerance`: maximum pixel distance between a projected target star and
//!   a reference star for the pair to count as matched.
//! - `hash_tolerance`: maximum Euclidean distance between asterism hashes in
//!   the nearest-neighbor search for candidate correspondences.
//! - `min_match`: fraction of reference stars that must match before the
//!   candidate transform search stops early.
//!
//! The batch pipeline processes files sequentially; concurrent invocations
//! over the same file are unsafe (the sidecar is read and rewritten without
//! locking).

pub mod blob;
pub mod detect;
pub mod error;
pub mod frame;
pub(crate) mod geometry;
pub mod imageops;
pub mod matching;
pub mod meta;
pub(crate) mod ndarray_utils;
pub mod pipeline;
pub mod psf;
pub mod stack;
pub mod star;
pub mod store;
pub(crate) mod triangles;

pub use detect::StarDetector;
pub use error::Error;
pub use frame::{Frame, LoadOutcome};
pub use matching::{Asterism, StarMatcher};
pub use meta::{Detection, FileMetadata, Transform};
pub use stack::FrameStack;
pub use star::{Point, Star};
pub use triangles::TriangleAsterism;

/// A generic float trait such that the pixel-level numerics are generic over `f32`/`f64`.
///
/// This trait is automatically implemented for all types implementing the supertraits.
/// Particularly, this includes `f32` and `f64`.
pub trait Float:
    Copy + Default + nalgebra::RealField + num_traits::FromPrimitive + num_traits::ToPrimitive
{
}

impl<F> Float for F where
    F: Copy + Default + nalgebra::RealField + num_traits::FromPrimitive + num_traits::ToPrimitive
{
}
