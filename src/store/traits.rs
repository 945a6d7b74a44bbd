//! `Store` trait — single async interface for all persistence.
//!
//! Both tables are exclusively owned by the provisioning workflow; the
//! provider adapter and chat channel never touch the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// A user known to the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Opaque stable identifier from the chat transport, unique key.
    pub external_id: String,
    /// Set at first sight, never changed afterwards.
    pub joined_at: DateTime<Utc>,
    /// Monotonic: flips false to true on a positive membership check.
    pub verified: bool,
}

/// A provisioned disposable mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxRecord {
    /// Back-reference to the owning `UserRecord.external_id`.
    pub owner_id: String,
    /// Globally unique `local_part@domain`, the primary key.
    pub address: String,
    /// Provider credential for the mailbox.
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic persistence trait covering users and mailboxes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Return the user's record, creating an unverified one if absent.
    ///
    /// Safe under concurrent first contact from the same id: at most one
    /// record is created and all callers converge on it.
    async fn get_or_create_user(&self, external_id: &str) -> Result<UserRecord, StorageError>;

    /// Mark a user verified. Idempotent; `joined_at` is left untouched.
    async fn mark_verified(&self, external_id: &str) -> Result<(), StorageError>;

    /// All verified users, for broadcast delivery.
    async fn list_verified(&self) -> Result<Vec<UserRecord>, StorageError>;

    /// Persist a provisioned mailbox. A duplicate address surfaces as
    /// `StorageError::Constraint`.
    async fn insert_mailbox(&self, record: &MailboxRecord) -> Result<(), StorageError>;

    /// All mailboxes owned by a user, oldest first.
    async fn list_mailboxes(&self, owner_id: &str) -> Result<Vec<MailboxRecord>, StorageError>;

    /// Remove a mailbox record. No-op if the address is unknown.
    async fn delete_mailbox(&self, address: &str) -> Result<(), StorageError>;
}
