//! A frame: decoded pixel data paired with its metadata record.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use log::{debug, warn};
use ndarray::{Array2, Array3, ArrayView2};

use crate::error::Error;
use crate::imageops::luminance;
use crate::meta::FileMetadata;
use crate::store::{file_checksum, Fetched, MetadataStore};

/// How a frame's metadata record was obtained during [`Frame::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No record existed; a fresh one was created.
    Created,
    /// The stored record matched the file contents and was reused.
    Cached,
    /// The stored checksum did not match the file bytes. The old record,
    /// including any registered stars and transforms, was discarded and a
    /// fresh one (with a new id) created.
    Invalidated,
    /// A record existed but could not be parsed; it was replaced.
    Repaired,
}

/// In-memory pairing of decoded grayscale pixels and the frame's metadata.
///
/// Pixels are owned by the frame and always re-derived from the image file;
/// saving a frame persists only the metadata side.
#[derive(Debug, Clone)]
pub struct Frame {
    path: PathBuf,
    pixels: Array2<f64>,
    /// The frame's metadata record.
    pub meta: FileMetadata,
}

impl Frame {
    /// Load pixel data from `path` and look up or synthesize the metadata
    /// record.
    ///
    /// The record found in the store is only reused when its checksum
    /// matches the file's current bytes; any mismatch discards it, which
    /// also throws away previously registered stars and transforms. The
    /// outcome tells the caller which of these happened. Nothing is
    /// persisted until [`Frame::save`].
    pub fn load(
        path: impl AsRef<Path>,
        store: &impl MetadataStore,
    ) -> Result<(Self, LoadOutcome), Error> {
        let path = path.as_ref();
        let checksum = file_checksum(path)?;
        let pixels = decode(path)?;

        let (meta, outcome) = match store.fetch(path)? {
            Fetched::Record(meta) if meta.checksum == checksum => {
                debug!("reusing metadata {} for {}", meta.id, path.display());
                (meta, LoadOutcome::Cached)
            }
            Fetched::Record(stale) => {
                warn!(
                    "{} changed on disk, discarding stale metadata {}",
                    path.display(),
                    stale.id
                );
                (FileMetadata::new(checksum), LoadOutcome::Invalidated)
            }
            Fetched::Corrupt => {
                warn!("replacing unreadable metadata for {}", path.display());
                (FileMetadata::new(checksum), LoadOutcome::Repaired)
            }
            Fetched::Missing => (FileMetadata::new(checksum), LoadOutcome::Created),
        };

        Ok((
            Self {
                path: path.to_owned(),
                pixels,
                meta,
            },
            outcome,
        ))
    }

    /// Source file path of the frame.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decoded grayscale pixels, values in `[0, 1]`.
    pub fn pixels(&self) -> ArrayView2<'_, f64> {
        self.pixels.view()
    }

    /// Persist the metadata record. Pixel data is never written back.
    pub fn save(&self, store: &mut impl MetadataStore) -> Result<(), Error> {
        store.store(&self.path, &self.meta)
    }
}

/// Decode an image file into a grayscale array.
///
/// The decoder is picked from the file contents and extension by the `image`
/// crate; color frames are collapsed with the fixed luminance transform.
fn decode(path: &Path) -> Result<Array2<f64>, Error> {
    let decoded = image::open(path).map_err(|source| Error::Decode {
        path: path.to_owned(),
        source,
    })?;
    Ok(to_gray(decoded))
}

fn to_gray(decoded: DynamicImage) -> Array2<f64> {
    match decoded {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
            let buffer = decoded.to_luma32f();
            let (width, height) = buffer.dimensions();
            let values: Vec<f64> = buffer.into_raw().into_iter().map(f64::from).collect();
            Array2::from_shape_vec((height as usize, width as usize), values)
                .expect("luma buffer matches dimensions")
        }
        other => {
            let buffer = other.to_rgb32f();
            let (width, height) = buffer.dimensions();
            let values: Vec<f64> = buffer.into_raw().into_iter().map(f64::from).collect();
            let rgb = Array3::from_shape_vec((height as usize, width as usize, 3), values)
                .expect("rgb buffer matches dimensions");
            luminance(rgb.view())
        }
    }
}
