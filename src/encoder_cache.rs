use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    sparse::{self, Bm25Encoder, TOKENIZER_ID},
};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// On-disk form of a fitted [`Bm25Encoder`].
///
/// ```json
/// {
///   "format_version": 1,
///   "tokenizer": "en_stem_stop/v1",
///   "k1": 1.2,
///   "b": 0.75,
///   "doc_count": 60,
///   "avg_doc_len": 7.5,
///   "doc_freq": { "123456": 3, ... }
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format_version: u32,
    tokenizer: String,
    k1: f32,
    b: f32,
    doc_count: u64,
    avg_doc_len: f64,
    doc_freq: BTreeMap<u32, u32>,
}

impl Snapshot {
    fn from_encoder(encoder: &Bm25Encoder) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            tokenizer: TOKENIZER_ID.to_string(),
            k1: encoder.k1,
            b: encoder.b,
            doc_count: encoder.doc_count,
            avg_doc_len: encoder.avg_doc_len,
            doc_freq: encoder.doc_freq.clone(),
        }
    }

    fn into_encoder(self) -> Result<Bm25Encoder> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::Snapshot(format!(
                "unsupported format version {} (expected {SNAPSHOT_FORMAT_VERSION})",
                self.format_version
            )));
        }
        if self.tokenizer != TOKENIZER_ID {
            return Err(Error::Snapshot(format!(
                "snapshot was fitted with tokenizer {:?}, current is {TOKENIZER_ID:?}",
                self.tokenizer
            )));
        }
        if !self.avg_doc_len.is_finite() || self.avg_doc_len < 0.0 {
            return Err(Error::Snapshot(format!(
                "invalid average document length {}",
                self.avg_doc_len
            )));
        }
        sparse::check_parameters(self.k1, self.b).map_err(Error::Snapshot)?;
        if let Some((term, df)) = self
            .doc_freq
            .iter()
            .find(|(_, df)| u64::from(**df) > self.doc_count)
        {
            return Err(Error::Snapshot(format!(
                "term {term} appears in {df} documents, more than the {} fitted",
                self.doc_count
            )));
        }

        Ok(Bm25Encoder {
            k1: self.k1,
            b: self.b,
            doc_count: self.doc_count,
            avg_doc_len: self.avg_doc_len,
            doc_freq: self.doc_freq,
        })
    }
}

/// Persists the fitted sparse encoder so lexical scoring stays stable
/// across restarts without refitting.
#[derive(Debug, Clone)]
pub struct SparseEncoderCache {
    path: PathBuf,
}

impl SparseEncoderCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write the encoder snapshot, replacing any previous one.
    ///
    /// The snapshot is written to a sibling temporary file and renamed into
    /// place, so readers never observe a half-written file.
    pub fn save(&self, encoder: &Bm25Encoder) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec(&Snapshot::from_encoder(encoder))
            .map_err(|e| Error::Snapshot(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::info!(path = %self.path.display(), "saved BM25 encoder snapshot");
        Ok(())
    }

    /// Read the encoder snapshot.
    ///
    /// Returns `Ok(None)` when no snapshot exists, and an error when one
    /// exists but cannot be read or does not match the current format.
    pub fn load(&self) -> Result<Option<Bm25Encoder>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Snapshot(e.to_string()))?;
        snapshot.into_encoder().map(Some)
    }

    /// Like [`load`](Self::load), but any failure is logged and reported as
    /// "no snapshot" so the caller falls back to a fresh fit.
    pub fn load_or_absent(&self) -> Option<Bm25Encoder> {
        match self.load() {
            Ok(Some(encoder)) => {
                tracing::info!(
                    path = %self.path.display(),
                    documents = encoder.doc_count(),
                    "loaded BM25 encoder snapshot"
                );
                Some(encoder)
            }
            Ok(None) => {
                tracing::info!(
                    path = %self.path.display(),
                    "no BM25 encoder snapshot found"
                );
                None
            }
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "ignoring unreadable BM25 encoder snapshot"
                );
                None
            }
        }
    }

    /// Remove the snapshot, forcing the next initialization to refit.
    /// Returns whether a snapshot was removed.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "cleared BM25 encoder snapshot");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
