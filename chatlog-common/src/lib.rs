use std::{
    fmt,
    sync::{Arc, Weak},
};

use chrono::NaiveDateTime;
use futures::future::BoxFuture;

pub mod view;

pub use view::{ActiveUser, Alignment, Participants, ViewModel, Window};

/// Author assigned to notices that don't come from a participant.
pub const SYSTEM_AUTHOR: &str = "System";

/// Shared, immutable payload of an archive entry.
pub type Bytes = Arc<[u8]>;

#[derive(Clone, Debug)]
pub struct Message {
    /// Exports don't record a time zone, so neither do we.
    pub timestamp: NaiveDateTime,
    pub author: Arc<str>,
    pub body: Arc<str>,
    pub attachment: Option<AttachmentRef>,
}

impl Message {
    pub fn is_system(&self) -> bool {
        &*self.author == SYSTEM_AUTHOR
    }
}

/// Something attachments can be fetched from by file name.
pub trait AttachmentSource: Send + Sync {
    /// Resolves to `None` when there is no entry named `filename`.
    fn fetch<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, Option<Bytes>>;
}

/// A lazy reference to a file bundled alongside the transcript.
///
/// The reference doesn't keep its source alive: once the document it was parsed from is
/// replaced, [`AttachmentRef::resolve`] returns `None`.
#[derive(Clone)]
pub struct AttachmentRef {
    pub filename: Arc<str>,
    source: Weak<dyn AttachmentSource>,
}

impl AttachmentRef {
    pub fn new(filename: impl Into<Arc<str>>, source: Weak<dyn AttachmentSource>) -> Self {
        Self {
            filename: filename.into(),
            source,
        }
    }

    pub async fn resolve(&self) -> Option<Bytes> {
        let source = self.source.upgrade()?;
        source.fetch(&self.filename).await
    }
}

impl fmt::Debug for AttachmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentRef")
            .field("filename", &self.filename)
            .field("attached", &(self.source.strong_count() > 0))
            .finish()
    }
}
