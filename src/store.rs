//! Metadata persistence: the sidecar store and its in-memory stand-in.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::meta::FileMetadata;

/// Suffix appended to the source file path to derive the sidecar path.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Result of looking up a record in a [`MetadataStore`].
///
/// `Corrupt` is an explicit outcome rather than an error: the store never
/// decides the repair policy, the caller does.
#[derive(Debug)]
pub enum Fetched {
    /// No record exists for this source file.
    Missing,
    /// A record exists but could not be parsed.
    Corrupt,
    /// The stored record, not yet validated against the file contents.
    Record(FileMetadata),
}

/// Storage seam for metadata records, keyed by source file path.
///
/// The pipeline only ever talks to this trait, so tests can substitute
/// [`MemoryStore`] for the filesystem-backed [`SidecarStore`].
pub trait MetadataStore {
    /// Look up the record for `source`.
    fn fetch(&self, source: &Path) -> Result<Fetched, Error>;

    /// Persist the record for `source`, replacing any previous one.
    fn store(&mut self, source: &Path, meta: &FileMetadata) -> Result<(), Error>;
}

/// Filesystem store keeping one `<source>.meta.json` sidecar per image file.
///
/// The sidecar is the sole persistent state of the pipeline: a versioned,
/// human-readable JSON rendering of [`FileMetadata`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarStore;

impl SidecarStore {
    /// Sidecar path for a source image file.
    pub fn sidecar_path(source: &Path) -> PathBuf {
        let mut name = source.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }
}

impl MetadataStore for SidecarStore {
    fn fetch(&self, source: &Path) -> Result<Fetched, Error> {
        let sidecar = Self::sidecar_path(source);
        let contents = match fs::read_to_string(&sidecar) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Fetched::Missing),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(meta) => Ok(Fetched::Record(meta)),
            Err(err) => {
                debug!("unparseable sidecar {}: {err}", sidecar.display());
                Ok(Fetched::Corrupt)
            }
        }
    }

    fn store(&mut self, source: &Path, meta: &FileMetadata) -> Result<(), Error> {
        let sidecar = Self::sidecar_path(source);
        let json = serde_json::to_string_pretty(meta)?;
        fs::write(&sidecar, json)?;
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: HashMap<PathBuf, FileMetadata>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryStore {
    fn fetch(&self, source: &Path) -> Result<Fetched, Error> {
        Ok(match self.records.get(source) {
            Some(meta) => Fetched::Record(meta.clone()),
            None => Fetched::Missing,
        })
    }

    fn store(&mut self, source: &Path, meta: &FileMetadata) -> Result<(), Error> {
        self.records.insert(source.to_owned(), meta.clone());
        Ok(())
    }
}

/// SHA-256 hex digest of a file's bytes.
///
/// A missing file maps to [`Error::NotFound`].
pub fn file_checksum(path: &Path) -> Result<String, Error> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_owned()));
        }
        Err(err) => return Err(err.into()),
    };
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
