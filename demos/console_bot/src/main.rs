//! Console Bot
//!
//! Chats with the bot from a terminal. Every line typed is delivered as an
//! inbound message; quote a bot message with `>ID text` to continue a `chat`
//! conversation.
//!
//! Run with: `cargo run -p console-bot -- --chat me@s.whatsapp.net`

mod console;
mod plugins;

use anyhow::Context;
use clap::Parser;
use yuzu::prelude::*;
use yuzu::runtime::wait_for_shutdown;

use crate::console::{ConsoleConnector, ConsoleUser};

#[derive(Debug, Parser)]
#[command(name = "console-bot", about = "Talk to a yuzu bot from the terminal")]
struct Args {
    /// Configuration file (defaults to searching for yuzu.toml).
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Configuration profile, e.g. `development`.
    #[arg(short, long)]
    profile: Option<String>,

    /// Chat the typed lines are sent from.
    #[arg(long, default_value = "console@s.whatsapp.net")]
    chat: String,

    /// Display name of the console user.
    #[arg(long, default_value = "console")]
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut builder = BotRuntime::builder().with_linked_plugins();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = args.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build().context("failed to load configuration")?;

    let bot = &runtime.config().bot;
    tracing::debug!(
        session_dir = %bot.session_dir.display(),
        method = ?bot.method,
        "Console sessions need no pairing"
    );

    let connector = ConsoleConnector::new(ConsoleUser {
        chat: args.chat,
        name: args.name,
    });

    runtime
        .run_until(&connector, async {
            tokio::select! {
                _ = wait_for_shutdown() => {}
                _ = connector.closed() => tracing::info!("Console closed"),
            }
        })
        .await?;

    Ok(())
}
