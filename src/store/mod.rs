//! Persistence layer — SQLite-backed storage for users and mailboxes.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{MailboxRecord, Store, UserRecord};
