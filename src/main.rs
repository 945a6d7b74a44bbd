use std::sync::Arc;

use futures::StreamExt;

use mailgate::channels::telegram::join_url;
use mailgate::channels::{ChatInterface, TelegramChannel};
use mailgate::config::Config;
use mailgate::gate::{MembershipGate, MembershipOracle};
use mailgate::provider::{MailTmProvider, MailboxProvider};
use mailgate::store::{LibSqlStore, Store};
use mailgate::workflow::Workflow;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  required: TELEGRAM_BOT_TOKEN, MAILGATE_OPERATOR_ID, MAILGATE_GATE_CHAT_ID");
        std::process::exit(1);
    });

    eprintln!("📮 Mailgate v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Gate: {}", config.gate_chat_id);
    eprintln!("   Provider: {}", config.provider_base_url);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Persistence ──────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    // ── Collaborators ────────────────────────────────────────────────
    let provider: Arc<dyn MailboxProvider> = Arc::new(MailTmProvider::new(
        config.provider_base_url.clone(),
        config.http_timeout,
    )?);

    let channel = Arc::new(TelegramChannel::new(
        config.bot_token.clone(),
        config.gate_chat_id.clone(),
        config.http_timeout,
    )?);
    channel.health_check().await?;

    let gate = MembershipGate::new(Arc::clone(&channel) as Arc<dyn MembershipOracle>);

    let workflow = Arc::new(Workflow::new(
        store,
        provider,
        gate,
        Arc::clone(&channel) as Arc<dyn ChatInterface>,
        config.operator_id.clone(),
        join_url(&config.gate_chat_id),
    ));

    // ── Action loop ──────────────────────────────────────────────────
    let mut actions = channel.start().await?;
    while let Some(inbound) = actions.next().await {
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move {
            if let Err(e) = workflow.handle(&inbound.user_id, inbound.action).await {
                tracing::error!(user = %inbound.user_id, "Action failed: {e}");
            }
        });
    }

    Ok(())
}
