//! View state persistence

pub mod persistence;
pub mod session_store;
pub mod snapshot;


pub use persistence::{apply_cursor, RestoreHooks, RestoreOutcome, SaveReport, ViewPersistence};
pub use session_store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use snapshot::{key_for, SnapshotKind, SnapshotPayload, ViewStateSnapshot, KEY_PREFIX, SNAPSHOT_VERSION};
