//! Chat abstraction for user-facing message I/O.
//!
//! The workflow talks to `ChatInterface` only; transport payloads never
//! cross this boundary in either direction.

pub mod telegram;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::workflow::Action;

pub use telegram::TelegramChannel;

/// An interactive command a button can dispatch back to the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Verify,
    NewMailbox,
    CheckInbox,
    DeleteMailbox,
}

impl Command {
    /// The workflow action this command dispatches.
    pub fn action(self) -> Action {
        match self {
            Command::Verify => Action::Verify,
            Command::NewMailbox => Action::RequestMailbox,
            Command::CheckInbox => Action::CheckInbox,
            Command::DeleteMailbox => Action::DeleteMailbox,
        }
    }
}

/// A button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    /// Opens an external link.
    Url { label: String, url: String },
    /// Dispatches a command back to the bot.
    Command { label: String, command: Command },
}

impl Button {
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Button::Url {
            label: label.into(),
            url: url.into(),
        }
    }

    pub fn command(label: impl Into<String>, command: Command) -> Self {
        Button::Command {
            label: label.into(),
            command,
        }
    }
}

/// Outbound messaging surface consumed by the workflow.
#[async_trait]
pub trait ChatInterface: Send + Sync {
    /// Send a new message to the user.
    async fn reply(
        &self,
        user_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), ChannelError>;

    /// Edit the user's last interactive message, falling back to a new
    /// message when there is nothing to edit.
    async fn edit_last(
        &self,
        user_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), ChannelError>;
}
