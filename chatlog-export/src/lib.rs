//! Turns an exported chat (a `.txt` transcript or a `.zip` with its media) into messages.

pub mod archive;
pub mod loader;
pub mod normalize;
pub mod parser;
pub mod session;

pub use archive::{Archive, ArchiveError};
pub use loader::{load, FileHandle, InputKind, LoadError, MediaType, RawInput};
pub use normalize::normalize;
pub use parser::{parse, DateOrder, ParseOptions};
pub use session::{load_sender, spawn_load, Document, LoadEvent, OpenError, ParseCache, Session};
