//! Provisioning workflow — the access-gated state machine.
//!
//! Stateless between calls: a user's state (`Unverified`/`Verified`) is
//! derived from the store on every action, so re-entry and out-of-order
//! delivery are tolerated. The only in-memory state is the advisory
//! per-user lock serializing mailbox requests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::channels::{Button, ChatInterface, Command};
use crate::error::{Error, ProviderError, StorageError};
use crate::gate::{MembershipGate, MembershipStatus};
use crate::provider::MailboxProvider;
use crate::store::{MailboxRecord, Store};

/// Length of the generated mailbox local part.
const LOCAL_PART_LEN: usize = 10;
/// Length of the generated mailbox secret.
const SECRET_LEN: usize = 16;

const JOIN_PROMPT: &str = "Please join our channel to use this bot.";
const NOT_YET_MEMBER: &str = "You haven't joined the channel yet.";
const VERIFIED_MENU: &str = "Verification successful. Main menu:";
const MENU: &str = "Main menu:";
const VERIFY_FIRST: &str = "You need to verify first. Send /start to begin.";
const MAILBOX_FAILURE: &str = "Failed to create a mailbox. Please try again.";
const BROADCAST_USAGE: &str = "Usage: /notifyall <message>";

/// An inbound user action, already decoded by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    Verify,
    RequestMailbox,
    CheckInbox,
    DeleteMailbox,
    Broadcast { text: String },
}

/// The provisioning state machine.
pub struct Workflow {
    store: Arc<dyn Store>,
    provider: Arc<dyn MailboxProvider>,
    gate: MembershipGate,
    chat: Arc<dyn ChatInterface>,
    operator_id: String,
    join_url: String,
    request_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Internal split of provisioning failures: a provider failure persists
/// nothing, a storage failure after provider success leaves an orphaned
/// remote account and must be logged distinctly.
enum ProvisionError {
    Provider(ProviderError),
    Storage {
        address: String,
        source: StorageError,
    },
}

impl Workflow {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn MailboxProvider>,
        gate: MembershipGate,
        chat: Arc<dyn ChatInterface>,
        operator_id: impl Into<String>,
        join_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            gate,
            chat,
            operator_id: operator_id.into(),
            join_url: join_url.into(),
            request_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch one decoded action for one user.
    pub async fn handle(&self, user_id: &str, action: Action) -> Result<(), Error> {
        match action {
            Action::Start => self.on_start(user_id).await,
            Action::Verify => self.on_verify(user_id).await,
            Action::RequestMailbox => self.on_request_mailbox(user_id).await,
            Action::CheckInbox => self.on_stub(user_id, "Inbox view is coming soon.").await,
            Action::DeleteMailbox => {
                self.on_stub(user_id, "Mailbox deletion is coming soon.").await
            }
            Action::Broadcast { text } => self.on_broadcast(user_id, &text).await,
        }
    }

    async fn on_start(&self, user_id: &str) -> Result<(), Error> {
        self.store.get_or_create_user(user_id).await?;

        match self.gate.check(user_id).await {
            MembershipStatus::Member => {
                self.store.mark_verified(user_id).await?;
                info!(user = user_id, "User verified on start");
                self.chat.reply(user_id, MENU, &menu_buttons()).await?;
            }
            MembershipStatus::NotMember | MembershipStatus::Unknown => {
                self.chat
                    .reply(user_id, JOIN_PROMPT, &self.join_buttons())
                    .await?;
            }
        }
        Ok(())
    }

    async fn on_verify(&self, user_id: &str) -> Result<(), Error> {
        self.store.get_or_create_user(user_id).await?;

        match self.gate.check(user_id).await {
            MembershipStatus::Member => {
                self.store.mark_verified(user_id).await?;
                info!(user = user_id, "User verified");
                self.chat
                    .edit_last(user_id, VERIFIED_MENU, &menu_buttons())
                    .await?;
            }
            MembershipStatus::NotMember | MembershipStatus::Unknown => {
                self.chat
                    .edit_last(user_id, NOT_YET_MEMBER, &self.join_buttons())
                    .await?;
            }
        }
        Ok(())
    }

    async fn on_request_mailbox(&self, user_id: &str) -> Result<(), Error> {
        let user = self.store.get_or_create_user(user_id).await?;
        if !user.verified {
            warn!(user = user_id, "Mailbox request from unverified user rejected");
            self.chat
                .reply(user_id, VERIFY_FIRST, &self.join_buttons())
                .await?;
            return Ok(());
        }

        // One in-flight provisioning per user: the lock spans the
        // provider call and the persistence step.
        let lock = self.request_lock(user_id).await;
        let _guard = lock.lock().await;

        match self.provision(user_id).await {
            Ok(address) => {
                self.chat
                    .edit_last(user_id, &format!("Your new mailbox: `{address}`"), &[])
                    .await?;
                Ok(())
            }
            Err(ProvisionError::Provider(e)) => {
                warn!(user = user_id, "Mailbox provisioning failed: {e}");
                self.chat.edit_last(user_id, MAILBOX_FAILURE, &[]).await?;
                Ok(())
            }
            Err(ProvisionError::Storage { address, source }) => {
                error!(
                    user = user_id,
                    address = %address,
                    "Mailbox created at provider but not persisted, orphaned remote account: {source}"
                );
                self.chat.edit_last(user_id, MAILBOX_FAILURE, &[]).await?;
                Err(source.into())
            }
        }
    }

    /// Provider call plus persistence, as one logical step.
    async fn provision(&self, user_id: &str) -> Result<String, ProvisionError> {
        let domains = self
            .provider
            .list_domains()
            .await
            .map_err(ProvisionError::Provider)?;
        let domain = domains
            .first()
            .ok_or(ProvisionError::Provider(ProviderError::NoDomains))?;

        let address = format!("{}@{domain}", random_lowercase(LOCAL_PART_LEN));
        let secret = random_lowercase(SECRET_LEN);

        let account = self
            .provider
            .create_account(&address, &secret)
            .await
            .map_err(ProvisionError::Provider)?;

        let record = MailboxRecord {
            owner_id: user_id.to_string(),
            address: address.clone(),
            secret,
            created_at: Utc::now(),
        };
        self.store
            .insert_mailbox(&record)
            .await
            .map_err(|source| ProvisionError::Storage {
                address: address.clone(),
                source,
            })?;

        info!(user = user_id, address = %address, account = %account, "Mailbox provisioned");
        Ok(address)
    }

    async fn on_stub(&self, user_id: &str, text: &str) -> Result<(), Error> {
        let user = self.store.get_or_create_user(user_id).await?;
        if !user.verified {
            self.chat
                .reply(user_id, VERIFY_FIRST, &self.join_buttons())
                .await?;
            return Ok(());
        }
        self.chat.edit_last(user_id, text, &menu_buttons()).await?;
        Ok(())
    }

    async fn on_broadcast(&self, caller_id: &str, text: &str) -> Result<(), Error> {
        if caller_id != self.operator_id {
            warn!(user = caller_id, "Broadcast from non-operator ignored");
            return Ok(());
        }

        let text = text.trim();
        if text.is_empty() {
            self.chat.reply(caller_id, BROADCAST_USAGE, &[]).await?;
            return Ok(());
        }

        let users = self.store.list_verified().await?;
        let body = format!("Announcement:\n\n{text}");
        let mut delivered = 0usize;
        for user in &users {
            match self.chat.reply(&user.external_id, &body, &[]).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(user = %user.external_id, "Broadcast delivery failed: {e}"),
            }
        }
        info!(delivered, total = users.len(), "Broadcast complete");

        self.chat
            .reply(
                caller_id,
                &format!("Notification sent to {delivered} users"),
                &[],
            )
            .await?;
        Ok(())
    }

    /// Advisory lock for one user's mailbox requests, created lazily.
    async fn request_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.request_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn join_buttons(&self) -> Vec<Button> {
        vec![
            Button::url("Join channel", &self.join_url),
            Button::command("Verify", Command::Verify),
        ]
    }
}

fn menu_buttons() -> Vec<Button> {
    vec![
        Button::command("New mailbox", Command::NewMailbox),
        Button::command("Check inbox", Command::CheckInbox),
        Button::command("Delete mailbox", Command::DeleteMailbox),
    ]
}

/// Uniform random choice over the 26 lowercase letters, per character.
fn random_lowercase(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

// ── Tests ───────────────────────────────────────────────────────────
