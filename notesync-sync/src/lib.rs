//! # notesync-sync
//!
//! The sync engine: read notes from the source window by window, compare them
//! with what the remote store holds, and write the difference back.
//!
//! Call [`pipeline::run`] with a [`NoteSource`] and a [`RemoteStore`] to
//! perform one full run. The individual stages are public for callers that
//! need only part of it:
//!
//! - [`parser`]: source text → [`notesync_core::Record`]s
//! - [`normalize`]: control-character stripping and body cap
//! - [`fetcher`]: windowed source invocation
//! - [`reconcile`]: fresh vs. stored → [`Delta`]
//! - [`driver`]: batched writes with per-item fallback

pub mod driver;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod reconcile;
pub mod source;
pub mod store;

pub use error::{SourceError, StoreError, SyncError};
pub use pipeline::{run, RunOptions, RunReport};
pub use reconcile::Delta;
pub use source::{NoteSource, OsascriptSource};
pub use store::{FirebaseStore, RemoteStore};
