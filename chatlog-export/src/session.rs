use std::{path::PathBuf, sync::Arc};

use chatlog_common::{Message, ViewModel, Window};
use tokio::sync::mpsc;

use crate::{
    archive::{Archive, ArchiveError},
    loader::{load, FileHandle, LoadError, RawInput},
    normalize::normalize,
    parser::{parse, DateOrder, ParseOptions},
};

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// A transcript ready to parse, plus the archive it came out of (if any).
#[derive(Clone, Debug)]
pub struct Document {
    pub path: PathBuf,
    pub transcript: Arc<str>,
    pub archive: Option<Arc<Archive>>,
}

impl Document {
    pub async fn open(file: &FileHandle) -> Result<Self, OpenError> {
        let input = load(file).await?;
        Ok(Self::from_raw(file.path.clone(), input).await?)
    }

    pub async fn from_raw(path: PathBuf, input: RawInput) -> Result<Self, ArchiveError> {
        match input {
            RawInput::Text(text) => Ok(Self {
                path,
                transcript: text.into(),
                archive: None,
            }),
            RawInput::Binary(bytes) => {
                let archive = Arc::new(Archive::new(bytes));
                let transcript = archive.transcript_text().await?;
                Ok(Self {
                    path,
                    transcript: transcript.into(),
                    archive: Some(archive),
                })
            }
        }
    }
}

#[derive(Debug)]
pub enum LoadEvent {
    Loaded(Document),
    Failed { path: PathBuf, error: OpenError },
}

/// Opens `file` and reports the outcome on `channel`.
pub async fn load_sender(file: FileHandle, channel: mpsc::UnboundedSender<LoadEvent>) {
    let event = match Document::open(&file).await {
        Ok(document) => LoadEvent::Loaded(document),
        Err(error) => {
            tracing::warn!(path = %file.path.display(), "{error}");
            LoadEvent::Failed {
                path: file.path,
                error,
            }
        }
    };
    if channel.send(event).is_err() {
        tracing::debug!("load receiver gone, dropping result");
    }
}

/// Starts opening `file` in the background. Loads aren't coalesced: whichever finishes last is
/// the one the receiver ends up showing.
pub fn spawn_load(
    file: FileHandle,
    channel: mpsc::UnboundedSender<LoadEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(load_sender(file, channel))
}

struct CacheKey {
    transcript: Arc<str>,
    archive: Option<Arc<Archive>>,
    options: ParseOptions,
}

impl CacheKey {
    fn matches(&self, document: &Document, options: &ParseOptions) -> bool {
        Arc::ptr_eq(&self.transcript, &document.transcript)
            && match (&self.archive, &document.archive) {
                (Some(cached), Some(archive)) => Arc::ptr_eq(cached, archive),
                (None, None) => true,
                _ => false,
            }
            && self.options == *options
    }
}

/// Remembers the messages parsed out of the last document, keyed on the identity of its
/// transcript and archive.
#[derive(Default)]
pub struct ParseCache {
    entry: Option<(CacheKey, Arc<[Message]>)>,
}

impl ParseCache {
    pub fn get_or_parse(&mut self, document: &Document, options: ParseOptions) -> Arc<[Message]> {
        if let Some((key, messages)) = &self.entry {
            if key.matches(document, &options) {
                tracing::debug!("reusing parsed transcript");
                return messages.clone();
            }
        }
        let messages: Arc<[Message]> = normalize(parse(
            &document.transcript,
            &options,
            document.archive.as_ref(),
        ))
        .into();
        let key = CacheKey {
            transcript: document.transcript.clone(),
            archive: document.archive.clone(),
            options,
        };
        self.entry = Some((key, messages.clone()));
        messages
    }
}

impl std::fmt::Debug for ParseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseCache")
            .field("messages", &self.entry.as_ref().map(|(_, messages)| messages.len()))
            .finish()
    }
}

/// The one document being viewed, and everything derived from it.
#[derive(Debug, Default)]
pub struct Session {
    document: Option<Document>,
    cache: ParseCache,
    date_order: Option<DateOrder>,
    view: ViewModel,
}

impl Session {
    pub fn new(date_order: Option<DateOrder>) -> Self {
        Self {
            date_order,
            ..Default::default()
        }
    }

    /// Replaces the current document and everything derived from it.
    pub fn install(&mut self, document: Document) {
        tracing::info!(path = %document.path.display(), archive = document.archive.is_some(), "opened document");
        self.document = Some(document);
        self.refresh();
    }

    /// Re-derives the view from the current document. Parsing only reruns if the document changed.
    pub fn refresh(&mut self) {
        let Some(document) = &self.document else {
            return;
        };
        let options = ParseOptions {
            resolve_attachments: document.archive.is_some(),
            date_order: self.date_order,
        };
        let messages = self.cache.get_or_parse(document, options);
        self.view.set_messages(messages);
    }

    /// Applies a finished load. Failures leave the current view alone.
    pub fn handle(&mut self, event: LoadEvent) -> Result<(), OpenError> {
        match event {
            LoadEvent::Loaded(document) => {
                self.install(document);
                Ok(())
            }
            LoadEvent::Failed { error, .. } => Err(error),
        }
    }

    pub fn apply_window_input(&mut self, lower: &str, upper: &str) -> Window {
        let window = Window::parse(lower, upper);
        self.view.apply_window(window);
        self.refresh();
        window
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ViewModel {
        &mut self.view
    }
}

#[cfg(test)]
mod tests {
    use chatlog_common::SYSTEM_AUTHOR;

    use super::*;
    use crate::{archive::tests::build_zip, loader::MediaType};

    const TRANSCRIPT: &str = "\
[06/07/2020, 15:13:00] Trip: \u{200e}Messages and calls are end-to-end encrypted.
[06/07/2020, 15:13:20] Alice: <attached: IMG-001.jpg>
[06/07/2020, 15:14:01] Bob: nice
[06/07/2020, 15:15:45] Alice: thanks";

    fn text_document(transcript: &str) -> Document {
        Document {
            path: "chat.txt".into(),
            transcript: transcript.into(),
            archive: None,
        }
    }

    #[tokio::test]
    async fn archive_pipeline_end_to_end() {
        let bytes = build_zip(&[
            ("_chat.txt", TRANSCRIPT),
            ("IMG-001.jpg", "jpeg"),
        ]);
        let document = Document::from_raw("export.zip".into(), RawInput::Binary(bytes))
            .await
            .unwrap();
        let mut session = Session::default();
        session.install(document);

        let view = session.view();
        assert_eq!(view.messages().len(), 4);
        assert_eq!(&*view.messages()[0].author, SYSTEM_AUTHOR);
        let names = view.participants().iter().map(|p| &**p).collect::<Vec<_>>();
        assert_eq!(names, ["Alice", "Bob"]);
        assert_eq!(view.active_user(), Some("Alice"));

        let attachment = view.messages()[1].attachment.clone().unwrap();
        assert_eq!(attachment.resolve().await.as_deref(), Some(&b"jpeg"[..]));
    }

    #[tokio::test]
    async fn text_documents_have_no_attachments() {
        let mut session = Session::default();
        session.install(text_document(TRANSCRIPT));
        assert!(session
            .view()
            .messages()
            .iter()
            .all(|message| message.attachment.is_none()));
    }

    #[test]
    fn window_changes_reuse_parsed_messages() {
        let mut session = Session::default();
        session.install(text_document(TRANSCRIPT));
        let before = session.view().messages().clone();
        session.view_mut().select_active_user("Bob");

        let window = session.apply_window_input("3", "2");
        assert_eq!((window.lower(), window.upper()), (2, 3));
        assert!(Arc::ptr_eq(&before, session.view().messages()));
        assert_eq!(session.view().visible().len(), 2);
        assert_eq!(session.view().active_user(), Some("Bob"));
    }

    #[test]
    fn window_is_clamped_to_transcript() {
        let mut session = Session::default();
        session.install(text_document(TRANSCRIPT));
        session.apply_window_input("2", "500");
        assert_eq!(session.view().visible().len(), 3);
    }

    #[test]
    fn new_document_reparses_and_resets_stale_user() {
        let mut session = Session::default();
        session.install(text_document(TRANSCRIPT));
        session.view_mut().select_active_user("Bob");
        session.install(text_document("[1/2/20, 10:00:00] Carol: hi\n[1/2/20, 10:01:00] Dan: yo"));
        assert_eq!(session.view().messages().len(), 2);
        assert_eq!(session.view().active_user(), Some("Carol"));
    }

    #[test]
    fn failed_load_keeps_previous_messages() {
        let mut session = Session::default();
        session.install(text_document(TRANSCRIPT));
        let before = session.view().messages().clone();

        let result = session.handle(LoadEvent::Failed {
            path: "photo.png".into(),
            error: LoadError::UnsupportedMediaType(MediaType::new("image/png")).into(),
        });
        assert_eq!(
            result.unwrap_err().to_string(),
            "File type image/png not supported"
        );
        assert!(Arc::ptr_eq(&before, session.view().messages()));
    }

    #[tokio::test]
    async fn replaced_archive_no_longer_resolves() {
        let bytes = build_zip(&[
            ("_chat.txt", TRANSCRIPT),
            ("IMG-001.jpg", "jpeg"),
        ]);
        let mut session = Session::default();
        session.install(
            Document::from_raw("export.zip".into(), RawInput::Binary(bytes))
                .await
                .unwrap(),
        );
        let attachment = session.view().messages()[1].attachment.clone().unwrap();
        session.install(text_document("[1/2/20, 10:00:00] Carol: hi"));
        assert_eq!(attachment.resolve().await, None);
    }

    #[tokio::test]
    async fn spawned_loads_report_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.txt");
        std::fs::write(&path, TRANSCRIPT).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_load(FileHandle::new(&path), tx.clone()).await.unwrap();
        spawn_load(FileHandle::new(dir.path().join("photo.png")), tx)
            .await
            .unwrap();

        let mut session = Session::default();
        session.handle(rx.recv().await.unwrap()).unwrap();
        assert!(session.handle(rx.recv().await.unwrap()).is_err());
        assert_eq!(session.view().messages().len(), 4);
    }
}
