//! Telegram channel — long-polls the Bot API for updates.
//!
//! Native Bot API implementation: decodes `message` and `callback_query`
//! updates into typed workflow actions, renders inline keyboards, and
//! answers membership lookups against the gating chat.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::channels::{Button, ChatInterface, Command};
use crate::error::{ChannelError, OracleError};
use crate::gate::{ChatRole, MembershipOracle};
use crate::workflow::Action;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll wait passed to getUpdates. The HTTP client timeout must
/// outlive this, see `TelegramChannel::new`.
const POLL_TIMEOUT_SECS: u64 = 25;

/// Stream of decoded inbound actions.
pub type ActionStream = Pin<Box<dyn Stream<Item = Inbound> + Send>>;

/// A decoded inbound action with the user who sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub user_id: String,
    pub action: Action,
}

/// Where to deliver outbound messages for a user, learned from inbound
/// traffic. Falls back to the user id, which equals the chat id for
/// private chats.
#[derive(Debug, Clone, Default)]
struct ChatState {
    chat_id: Option<String>,
    last_message_id: Option<i64>,
}

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    gate_chat_id: String,
    client: reqwest::Client,
    chats: Arc<Mutex<HashMap<String, ChatState>>>,
}

impl TelegramChannel {
    /// Build a channel with a bounded HTTP timeout.
    pub fn new(
        bot_token: SecretString,
        gate_chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        // The client timeout has to be longer than the long-poll wait,
        // or every idle getUpdates call would abort early.
        let timeout = timeout.max(Duration::from_secs(POLL_TIMEOUT_SECS + 5));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            bot_token,
            gate_chat_id: gate_chat_id.into(),
            client,
            chats: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// Verify the token against getMe before starting the poll loop.
    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    /// Start the long-poll loop. Decoded actions arrive on the returned
    /// stream; everything transport-specific stays on this side.
    pub async fn start(&self) -> Result<ActionStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let answer_url = self.api_url("answerCallbackQuery");
        let client = self.client.clone();
        let chats = Arc::clone(&self.chats);

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            info!("Telegram channel listening for updates...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Telegram poll error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Telegram parse error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
                    for update in results {
                        if let Some(uid) =
                            update.get("update_id").and_then(serde_json::Value::as_i64)
                        {
                            offset = uid + 1;
                        }

                        let Some(decoded) = decode_update(update) else {
                            continue;
                        };

                        {
                            let mut chats = chats.lock().expect("chat map mutex poisoned");
                            let state = chats.entry(decoded.user_id.clone()).or_default();
                            state.chat_id = Some(decoded.chat_id.clone());
                            if decoded.message_id.is_some() {
                                state.last_message_id = decoded.message_id;
                            }
                        }

                        // Stop the client-side spinner on the pressed button.
                        if let Some(cb_id) = &decoded.callback_id {
                            let _ = client
                                .post(&answer_url)
                                .json(&serde_json::json!({ "callback_query_id": cb_id }))
                                .send()
                                .await;
                        }

                        let inbound = Inbound {
                            user_id: decoded.user_id,
                            action: decoded.action,
                        };
                        if tx.send(inbound).is_err() {
                            info!("Telegram listener channel closed");
                            return;
                        }
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    fn chat_state(&self, user_id: &str) -> ChatState {
        self.chats
            .lock()
            .expect("chat map mutex poisoned")
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Send a text message, trying Markdown first with plain text fallback.
    /// Splits long messages; the keyboard rides on the final chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let markup = keyboard(buttons);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i + 1 == chunks.len() {
                markup.as_ref()
            } else {
                None
            };
            self.send_message_chunk(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        markup: Option<&serde_json::Value>,
    ) -> Result<(), ChannelError> {
        let mut markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(m) = markup {
            markdown_body["reply_markup"] = m.clone();
        }

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let mut plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(m) = markup {
            plain_body["reply_markup"] = m.clone();
        }

        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {}, plain: {})",
                    markdown_status, plain_err
                ),
            });
        }

        Ok(())
    }

    /// Edit an existing message in place, Markdown-first with fallback.
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: i64,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), ChannelError> {
        let markup = keyboard(buttons);

        let mut markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(m) = &markup {
            markdown_body["reply_markup"] = m.clone();
        }

        let markdown_resp = self
            .client
            .post(self.api_url("editMessageText"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| ChannelError::EditFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let mut plain_body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(m) = &markup {
            plain_body["reply_markup"] = m.clone();
        }

        let plain_resp = self
            .client
            .post(self.api_url("editMessageText"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::EditFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::EditFailed {
                name: "telegram".into(),
                reason: format!("editMessageText failed: {err}"),
            });
        }

        Ok(())
    }
}

// ── ChatInterface implementation ────────────────────────────────────

#[async_trait]
impl ChatInterface for TelegramChannel {
    async fn reply(
        &self,
        user_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), ChannelError> {
        let state = self.chat_state(user_id);
        let chat_id = state.chat_id.as_deref().unwrap_or(user_id);
        self.send_message(chat_id, text, buttons).await
    }

    async fn edit_last(
        &self,
        user_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), ChannelError> {
        let state = self.chat_state(user_id);
        let chat_id = state.chat_id.clone().unwrap_or_else(|| user_id.to_string());

        if let Some(message_id) = state.last_message_id {
            match self.edit_message(&chat_id, message_id, text, buttons).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(user = user_id, "Edit failed, sending new message: {e}");
                }
            }
        }
        self.send_message(&chat_id, text, buttons).await
    }
}

// ── MembershipOracle implementation ─────────────────────────────────

#[async_trait]
impl MembershipOracle for TelegramChannel {
    async fn chat_role(&self, user_id: &str) -> Result<ChatRole, OracleError> {
        let numeric_id: i64 = user_id
            .parse()
            .map_err(|_| OracleError::Unavailable(format!("non-numeric user id: {user_id}")))?;

        let resp = self
            .client
            .post(self.api_url("getChatMember"))
            .json(&serde_json::json!({
                "chat_id": self.gate_chat_id,
                "user_id": numeric_id,
            }))
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        parse_member_response(&body)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Public join link for the gating chat.
pub fn join_url(gate_chat_id: &str) -> String {
    format!("https://t.me/{}", gate_chat_id.trim_start_matches('@'))
}

/// Decoded fields of one update.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Decoded {
    user_id: String,
    chat_id: String,
    message_id: Option<i64>,
    callback_id: Option<String>,
    action: Action,
}

/// Decode a getUpdates entry into a typed action. Returns None for
/// updates the bot does not handle.
fn decode_update(update: &serde_json::Value) -> Option<Decoded> {
    if let Some(message) = update.get("message") {
        let text = message.get("text").and_then(serde_json::Value::as_str)?;
        let user_id = message
            .get("from")
            .and_then(|f| f.get("id"))
            .and_then(serde_json::Value::as_i64)?
            .to_string();
        let chat_id = message
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(serde_json::Value::as_i64)?
            .to_string();

        let action = decode_command_text(text)?;
        return Some(Decoded {
            user_id,
            chat_id,
            message_id: None,
            callback_id: None,
            action,
        });
    }

    if let Some(cb) = update.get("callback_query") {
        let data = cb.get("data").and_then(serde_json::Value::as_str)?;
        let command = parse_callback(data)?;
        let user_id = cb
            .get("from")
            .and_then(|f| f.get("id"))
            .and_then(serde_json::Value::as_i64)?
            .to_string();
        let callback_id = cb
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(String::from);
        let message = cb.get("message");
        let message_id = message
            .and_then(|m| m.get("message_id"))
            .and_then(serde_json::Value::as_i64);
        let chat_id = message
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(serde_json::Value::as_i64)
            .map(|id| id.to_string())
            .unwrap_or_else(|| user_id.clone());

        return Some(Decoded {
            user_id,
            chat_id,
            message_id,
            callback_id,
            action: command.action(),
        });
    }

    None
}

/// Map a slash-command message to an action.
fn decode_command_text(text: &str) -> Option<Action> {
    let text = text.trim();
    if text == "/start" || text.starts_with("/start ") {
        return Some(Action::Start);
    }
    if let Some(rest) = text.strip_prefix("/notifyall") {
        if rest.is_empty() || rest.starts_with(' ') {
            return Some(Action::Broadcast {
                text: rest.trim().to_string(),
            });
        }
    }
    None
}

/// Callback data for a command button. Inverse of `parse_callback`.
fn command_data(command: Command) -> &'static str {
    match command {
        Command::Verify => "verify",
        Command::NewMailbox => "new_mailbox",
        Command::CheckInbox => "check_inbox",
        Command::DeleteMailbox => "delete_mailbox",
    }
}

fn parse_callback(data: &str) -> Option<Command> {
    match data {
        "verify" => Some(Command::Verify),
        "new_mailbox" => Some(Command::NewMailbox),
        "check_inbox" => Some(Command::CheckInbox),
        "delete_mailbox" => Some(Command::DeleteMailbox),
        _ => None,
    }
}

/// Render buttons as an inline keyboard, one button per row. None when
/// there are no buttons, so plain messages carry no reply_markup.
fn keyboard(buttons: &[Button]) -> Option<serde_json::Value> {
    if buttons.is_empty() {
        return None;
    }
    let rows: Vec<serde_json::Value> = buttons
        .iter()
        .map(|b| match b {
            Button::Url { label, url } => {
                serde_json::json!([{ "text": label, "url": url }])
            }
            Button::Command { label, command } => {
                serde_json::json!([{ "text": label, "callback_data": command_data(*command) }])
            }
        })
        .collect();
    Some(serde_json::json!({ "inline_keyboard": rows }))
}

/// Parse a getChatMember response into a role.
fn parse_member_response(body: &serde_json::Value) -> Result<ChatRole, OracleError> {
    let ok = body
        .get("ok")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if !ok {
        let description = body
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("no description");
        return Err(OracleError::Unavailable(format!(
            "getChatMember: {description}"
        )));
    }

    let status = body
        .get("result")
        .and_then(|r| r.get("status"))
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| OracleError::Unavailable("getChatMember: missing status".to_string()))?;

    Ok(parse_chat_role(status))
}

fn parse_chat_role(status: &str) -> ChatRole {
    match status {
        "member" => ChatRole::Member,
        "administrator" => ChatRole::Administrator,
        "creator" => ChatRole::Owner,
        "restricted" => ChatRole::Restricted,
        "left" => ChatRole::Left,
        "kicked" => ChatRole::Kicked,
        _ => ChatRole::Other,
    }
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let chunk = &remaining[..max_len];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(max_len);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { max_len } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
