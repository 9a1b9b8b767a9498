//! Confstore is a versioned configuration repository engine: JSON and
//! plain-text files in linearly versioned repositories backed by a
//! content-addressed object store, with structured change application,
//! diff/history queries, and long-poll watch notification.

pub mod cache;
pub mod errors;
pub mod hash;
pub mod internal;
pub mod manager;
pub mod model;
pub mod patch;
pub mod pattern;
pub mod repository;
pub mod sanitize;

mod watch;

pub use errors::ConfError;
pub use manager::{ManagerOptions, RepositoryManager};
pub use model::{
    Author, Change, ChangeContent, CommitInfo, CommitMessage, Entry, EntryContent, EntryType,
    FindOptions, Markup, Query, Revision, RevisionRange,
};
pub use repository::Repository;
