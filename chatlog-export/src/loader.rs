use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use chatlog_common::Bytes;

const BYTE_ORDER_MARK: char = '\u{feff}';

/// The declared type of a file, e.g. `text/plain`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MediaType(Arc<str>);

/// How a file is read, decided by its media type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputKind {
    Archive,
    Text,
}

impl MediaType {
    pub fn new(media_type: impl Into<Arc<str>>) -> Self {
        Self(media_type.into())
    }

    /// Guesses a media type from the file extension, the way a file picker would.
    pub fn guess(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let media_type = match extension.as_deref() {
            Some("zip") => "application/zip",
            Some("txt") => "text/plain",
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            Some("mp4") => "video/mp4",
            Some("opus") => "audio/ogg",
            Some("pdf") => "application/pdf",
            Some("json") => "application/json",
            _ => "application/octet-stream",
        };
        Self::new(media_type)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `None` for types that can't hold a transcript.
    pub fn kind(&self) -> Option<InputKind> {
        if is_zip(&self.0) {
            Some(InputKind::Archive)
        } else if &*self.0 == "text/plain" {
            Some(InputKind::Text)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Matches `application/zip` and its vendor variants (`x-zip`, `zip-compressed`,
/// `x-zip-compressed`), ignoring case.
fn is_zip(media_type: &str) -> bool {
    use nom::{
        bytes::complete::tag_no_case,
        combinator::{eof, opt},
        sequence::tuple,
    };

    tuple::<_, _, nom::error::Error<&str>, _>((
        tag_no_case("application/"),
        opt(tag_no_case("x-")),
        tag_no_case("zip"),
        opt(tag_no_case("-compressed")),
        eof,
    ))(media_type)
    .is_ok()
}

/// A file picked by the user, along with its declared type.
#[derive(Clone, Debug)]
pub struct FileHandle {
    pub path: PathBuf,
    pub media_type: MediaType,
}

impl FileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let media_type = MediaType::guess(&path);
        Self { path, media_type }
    }

    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }
}

#[derive(Clone, Debug)]
pub enum RawInput {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("File type {0} not supported")]
    UnsupportedMediaType(MediaType),
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads `file` once, as text or bytes depending on its media type.
pub async fn load(file: &FileHandle) -> Result<RawInput, LoadError> {
    let kind = file
        .media_type
        .kind()
        .ok_or_else(|| LoadError::UnsupportedMediaType(file.media_type.clone()))?;
    let bytes = tokio::fs::read(&file.path)
        .await
        .map_err(|source| LoadError::Io {
            path: file.path.clone(),
            source,
        })?;
    tracing::info!(path = %file.path.display(), media_type = %file.media_type, size = bytes.len(), "read file");
    Ok(match kind {
        InputKind::Archive => RawInput::Binary(bytes.into()),
        InputKind::Text => RawInput::Text(decode_text(&bytes)),
    })
}

/// Decodes UTF-8, replacing invalid sequences and dropping a leading byte order mark.
pub fn decode_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text: &str = &text;
    text.strip_prefix(BYTE_ORDER_MARK).unwrap_or(text).to_owned()
}
