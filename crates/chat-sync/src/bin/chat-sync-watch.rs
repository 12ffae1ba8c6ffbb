use chat_sync::{
    ChatClient, ClientConfig, ConversationContext, ConversationId, Message, Role, SyncConfig,
    SyncController,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "chat-sync-watch")]
#[command(about = "Follow a chat conversation and send stdin lines to it")]
struct Cli {
    /// Server API root
    #[arg(long, env = "CHAT_SERVER_URL", default_value = "http://localhost:8000/api/v1")]
    base_url: String,

    /// Conversation to follow; a new one is created on the first send if omitted
    #[arg(short, long)]
    conversation: Option<String>,

    /// Bearer token
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Sync engine config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model to request for replies
    #[arg(short, long)]
    model: Option<String>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chat_sync=debug,info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn render(message: &Message) -> String {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let mut line = format!("[{}] {}", who, message.content);
    if message.in_progress {
        line.push_str(" …");
    }
    if message.provisional {
        line.push_str(" (sending)");
    }
    if let Some(error) = &message.error {
        line.push_str(&format!(" (error: {})", error));
    }
    line
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let sync_config = match &cli.config {
        Some(path) => SyncConfig::load(path).await?,
        None => SyncConfig::default(),
    };

    let mut client_config = ClientConfig::new(cli.base_url.clone());
    client_config.auth_token = cli.token.clone();
    let client = Arc::new(ChatClient::with_config(client_config)?);

    info!("=== chat-sync-watch ===");
    info!("Server: {}", cli.base_url);

    let sync = SyncController::spawn(client.clone(), client, sync_config);

    let mut context = match cli.conversation.clone() {
        Some(id) => {
            let id = ConversationId::from(id);
            sync.set_conversation(Some(id.clone())).await?;
            ConversationContext::new(id)
        }
        None => ConversationContext::unsaved(),
    };
    context.set_model(cli.model.clone());

    let mut messages = sync.subscribe_messages();
    tokio::spawn(async move {
        while messages.changed().await.is_ok() {
            let snapshot = messages.borrow_and_update().clone();
            println!("--- {} message(s) ---", snapshot.len());
            for message in snapshot.iter() {
                println!("{}", render(message));
            }
        }
    });

    let mut status = sync.subscribe_status();
    tokio::spawn(async move {
        let mut degraded = false;
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if current.fallback_active != degraded {
                degraded = current.fallback_active;
                if degraded {
                    eprintln!("!! live updates unavailable, polling");
                } else {
                    eprintln!("!! live updates restored");
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        context.set_draft(line);
        if let Err(e) = sync.submit_context(&mut context).await {
            eprintln!("!! send failed: {}", e);
            context.draft.clear();
        }
    }

    info!("stdin closed, shutting down");
    sync.shutdown().await?;
    Ok(())
}
