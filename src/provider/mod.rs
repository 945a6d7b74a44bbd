//! Mailbox provider abstraction.
//!
//! Pure boundary: adapters create and delete remote accounts and never
//! persist anything. Retry policy belongs to the caller.

pub mod mailtm;

use async_trait::async_trait;

use crate::error::ProviderError;

pub use mailtm::MailTmProvider;

/// Provider-issued identifier for a mailbox account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountId(pub String);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote mailbox provider capability.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// Domains available for new addresses. Non-empty on success.
    async fn list_domains(&self) -> Result<Vec<String>, ProviderError>;

    /// Create an account for `address` with the given credential.
    ///
    /// An address collision is an ordinary `ProviderError`, not a signal
    /// to regenerate and retry.
    async fn create_account(
        &self,
        address: &str,
        secret: &str,
    ) -> Result<AccountId, ProviderError>;

    /// Delete a remote account. Reserved for the deletion flow.
    async fn delete_account(&self, id: &AccountId) -> Result<(), ProviderError>;
}
