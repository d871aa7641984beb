//! Repository catalog - the persisted result of the listing phase
//!
//! The catalog is a JSON Lines file with one [`RepositoryDescriptor`] per
//! line. A listing refresh truncates it up front and then appends records as
//! providers report them; a sync run reads it back without touching any
//! provider API.
//!
//! Writes go through a single owner task fed by a channel, so concurrent
//! provider tasks never share the file handle.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::discovery::RepositoryDescriptor;

/// Queue depth between provider tasks and the catalog writer
const APPEND_QUEUE_DEPTH: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("no repository catalog at {path:?}; run the listing phase (--list) first")]
    Missing { path: PathBuf },

    #[error("catalog I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode catalog record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("malformed catalog record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("catalog writer stopped before all records were appended")]
    WriterClosed,
}

/// Handle to the catalog file
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
}

impl Catalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Discard the previous catalog and start the writer task
    pub async fn begin_refresh(&self) -> Result<CatalogWriter, CatalogError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let file = tokio::fs::File::create(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        debug!("Truncated catalog at {}", self.path.display());

        let (sender, receiver) = mpsc::channel(APPEND_QUEUE_DEPTH);
        let handle = tokio::spawn(write_records(file, self.path.clone(), receiver));

        Ok(CatalogWriter {
            sender: CatalogSender { sender },
            handle,
        })
    }

    /// Load every valid record, skipping malformed lines and repeated keys
    /// with a warning
    pub async fn read_all(&self) -> Result<Vec<RepositoryDescriptor>, CatalogError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogError::Missing {
                    path: self.path.clone(),
                });
            }
            Err(source) => return Err(self.io_error(source)),
        };

        let mut descriptors = Vec::new();
        let mut seen = HashSet::new();
        let mut skipped = 0;

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            match parse_record(index + 1, line) {
                Ok(descriptor) if !seen.insert(descriptor.key()) => {
                    warn!(
                        "Skipping catalog line {}: duplicate of {}",
                        index + 1,
                        descriptor.key()
                    );
                    skipped += 1;
                }
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    warn!("Skipping {}", e);
                    skipped += 1;
                }
            }
        }

        info!(
            "Loaded {} repositories from catalog {} ({} records skipped)",
            descriptors.len(),
            self.path.display(),
            skipped
        );

        Ok(descriptors)
    }

    fn io_error(&self, source: std::io::Error) -> CatalogError {
        CatalogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn parse_record(line: usize, text: &str) -> Result<RepositoryDescriptor, CatalogError> {
    let descriptor: RepositoryDescriptor =
        serde_json::from_str(text).map_err(|e| CatalogError::Malformed {
            line,
            reason: e.to_string(),
        })?;

    descriptor
        .validate()
        .map_err(|reason| CatalogError::Malformed { line, reason })?;

    Ok(descriptor)
}

/// Owner of an in-progress refresh
pub struct CatalogWriter {
    sender: CatalogSender,
    handle: JoinHandle<Result<usize, CatalogError>>,
}

impl CatalogWriter {
    /// A cloneable append handle for provider tasks
    pub fn sender(&self) -> CatalogSender {
        self.sender.clone()
    }

    /// Close the queue and wait until every queued record is on disk
    ///
    /// Returns the number of records written. Senders handed out by
    /// [`CatalogWriter::sender`] must be dropped first or this waits for them.
    pub async fn finish(self) -> Result<usize, CatalogError> {
        drop(self.sender);
        self.handle.await.map_err(|_| CatalogError::WriterClosed)?
    }
}

/// Append side of the catalog queue
#[derive(Clone)]
pub struct CatalogSender {
    sender: mpsc::Sender<RepositoryDescriptor>,
}

impl CatalogSender {
    /// Queue one descriptor for the writer task
    pub async fn append(&self, descriptor: RepositoryDescriptor) -> Result<(), CatalogError> {
        self.sender
            .send(descriptor)
            .await
            .map_err(|_| CatalogError::WriterClosed)
    }
}

async fn write_records(
    mut file: tokio::fs::File,
    path: PathBuf,
    mut receiver: mpsc::Receiver<RepositoryDescriptor>,
) -> Result<usize, CatalogError> {
    let io_error = |source: std::io::Error| CatalogError::Io {
        path: path.clone(),
        source,
    };

    let mut seen = HashSet::new();
    let mut written = 0;

    while let Some(descriptor) = receiver.recv().await {
        if let Err(reason) = descriptor.validate() {
            warn!("Not cataloguing {}: {}", descriptor.key(), reason);
            continue;
        }

        if !seen.insert(descriptor.key()) {
            debug!("Duplicate catalog entry ignored: {}", descriptor.key());
            continue;
        }

        let mut line = serde_json::to_string(&descriptor)?;
        line.push('\n');

        file.write_all(line.as_bytes()).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;
        written += 1;
    }

    file.sync_all().await.map_err(io_error)?;
    info!("Wrote {} repositories to catalog {}", written, path.display());

    Ok(written)
}
