//! Attachment descriptors.
//!
//! An attachment is a pointer to a file, not the file's bytes: resolution
//! and reading happen when a transport serialises the message. A file that
//! has gone missing by then produces a structured warning record; how
//! severe that is depends on the transport.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Fallback when the MIME type is neither configured nor guessable.
const OCTET_STREAM: &str = "application/octet-stream";

/// A file to embed in the message, resolved lazily.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    /// Display name; defaults to the file name of `path`.
    pub name: Option<String>,
    /// MIME type; guessed from the extension when absent.
    pub mime_type: Option<String>,
}

impl Attachment {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
            mime_type: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Normalises the descriptor into the concrete values serialisation
    /// uses. Pure path work, no I/O.
    #[must_use]
    pub fn resolve(&self) -> ResolvedAttachment {
        let absolute_path = if self.path.is_absolute() {
            self.path.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.path))
                .unwrap_or_else(|_| self.path.clone())
        };

        let filename = self.name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map_or_else(|| "attachment".to_string(), |n| n.to_string_lossy().into_owned())
        });

        let mime_type = self.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.path)
                .first_raw()
                .unwrap_or(OCTET_STREAM)
                .to_string()
        });

        ResolvedAttachment {
            absolute_path,
            filename,
            mime_type,
        }
    }
}

/// The normalised form of an [`Attachment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub absolute_path: PathBuf,
    pub filename: String,
    pub mime_type: String,
}

impl ResolvedAttachment {
    /// Reads the file's bytes, or reports why it could not.
    ///
    /// # Errors
    ///
    /// Returns an [`AttachmentWarning`] naming the path and the underlying
    /// I/O failure.
    pub fn read(&self) -> Result<Vec<u8>, AttachmentWarning> {
        std::fs::read(&self.absolute_path).map_err(|source| AttachmentWarning {
            path: self.absolute_path.clone(),
            reason: source.to_string(),
        })
    }
}

/// An attachment that could not be embedded at serialisation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for AttachmentWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "attachment {} unreadable: {}", self.path.display(), self.reason)
    }
}
