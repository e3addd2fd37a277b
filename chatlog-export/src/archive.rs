use std::{
    collections::HashMap,
    fmt,
    io::{Cursor, Read},
    sync::{Arc, Mutex, PoisonError},
};

use chatlog_common::{AttachmentSource, Bytes};
use futures::future::BoxFuture;
use tokio::sync::OnceCell;
use zip::{result::ZipError, ZipArchive};

use crate::loader::decode_text;

/// Name iOS gives the transcript inside an export.
const IOS_TRANSCRIPT: &str = "_chat.txt";

/// Most an entry's declared size may pre-allocate; the buffer grows past it as data arrives.
const MAX_PREALLOC: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a readable zip archive")]
    Malformed(#[source] ZipError),
    #[error("no transcript found in archive")]
    NoTranscript,
    #[error("failed to decompress {name}")]
    Entry {
        name: String,
        #[source]
        source: ZipError,
    },
    #[error("decompression of {name} was interrupted")]
    Interrupted {
        name: String,
        #[source]
        source: tokio::task::JoinError,
    },
}

struct Index {
    zip: Arc<Mutex<ZipArchive<Cursor<Bytes>>>>,
    /// Entry names in archive order.
    names: Vec<Arc<str>>,
}

/// A zip export, decoded lazily.
///
/// The central directory is read on first access, and each entry is decompressed at most once.
pub struct Archive {
    bytes: Bytes,
    index: OnceCell<Index>,
    entries: Mutex<HashMap<Arc<str>, Bytes>>,
}

impl Archive {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            bytes,
            index: OnceCell::new(),
            entries: Mutex::default(),
        }
    }

    async fn index(&self) -> Result<&Index, ArchiveError> {
        self.index
            .get_or_try_init(|| async {
                let zip = ZipArchive::new(Cursor::new(self.bytes.clone()))
                    .map_err(ArchiveError::Malformed)?;
                let names = (0..zip.len())
                    .filter_map(|idx| zip.name_for_index(idx))
                    .map(Arc::from)
                    .collect::<Vec<_>>();
                tracing::debug!(entries = names.len(), size = self.bytes.len(), "indexed archive");
                Ok(Index {
                    zip: Arc::new(Mutex::new(zip)),
                    names,
                })
            })
            .await
    }

    pub async fn entry_names(&self) -> Result<&[Arc<str>], ArchiveError> {
        Ok(&self.index().await?.names)
    }

    /// The decompressed contents of `name`, or `None` if there is no such entry.
    ///
    /// Decompression runs on the blocking pool.
    pub async fn entry(&self, name: &str) -> Result<Option<Bytes>, ArchiveError> {
        if let Some(bytes) = self.lock_entries().get(name) {
            return Ok(Some(bytes.clone()));
        }
        let index = self.index().await?;
        let Some(name) = index.names.iter().find(|entry| &***entry == name) else {
            return Ok(None);
        };
        let zip = index.zip.clone();
        let owned = name.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            let mut zip = zip.lock().unwrap_or_else(PoisonError::into_inner);
            read_entry(&mut zip, &owned)
        })
        .await
        .map_err(|source| ArchiveError::Interrupted {
            name: name.to_string(),
            source,
        })?
        .map_err(|source| ArchiveError::Entry {
            name: name.to_string(),
            source,
        })?;
        tracing::trace!(%name, size = bytes.len(), "decompressed entry");
        self.lock_entries().insert(name.clone(), bytes.clone());
        Ok(Some(bytes))
    }

    /// Decodes the entry holding the conversation.
    pub async fn transcript_text(&self) -> Result<String, ArchiveError> {
        let index = self.index().await?;
        let name = find_transcript(&index.names).ok_or(ArchiveError::NoTranscript)?;
        let bytes = self
            .entry(name)
            .await?
            .ok_or(ArchiveError::NoTranscript)?;
        tracing::info!(%name, "found transcript");
        Ok(decode_text(&bytes))
    }

    /// Like [`Archive::entry`], but failures only get logged.
    pub async fn attachment(&self, filename: &str) -> Option<Bytes> {
        match self.entry(filename).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%filename, "{err}");
                None
            }
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<Arc<str>, Bytes>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("size", &self.bytes.len())
            .field("indexed", &self.index.initialized())
            .finish_non_exhaustive()
    }
}

impl AttachmentSource for Archive {
    fn fetch<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, Option<Bytes>> {
        Box::pin(self.attachment(filename))
    }
}

fn read_entry(zip: &mut ZipArchive<Cursor<Bytes>>, name: &str) -> Result<Bytes, ZipError> {
    let mut file = zip.by_name(name)?;
    let mut buf = Vec::with_capacity(initial_capacity(file.size()));
    file.read_to_end(&mut buf)?;
    Ok(buf.into())
}

/// Capacity to reserve for an entry whose header claims `declared` bytes.
fn initial_capacity(declared: u64) -> usize {
    usize::try_from(declared).map_or(MAX_PREALLOC, |size| size.min(MAX_PREALLOC))
}

/// A top-level `.txt` entry, preferring the iOS name.
fn find_transcript(names: &[Arc<str>]) -> Option<&str> {
    let mut candidates = names
        .iter()
        .map(|name| &**name)
        .filter(|name| !name.contains('/') && name.to_ascii_lowercase().ends_with(".txt"));
    let first = candidates.next()?;
    if first == IOS_TRANSCRIPT {
        return Some(first);
    }
    Some(
        candidates
            .find(|&name| name == IOS_TRANSCRIPT)
            .unwrap_or(first),
    )
}
