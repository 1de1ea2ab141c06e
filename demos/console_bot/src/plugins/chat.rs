//! `chat`: an echo conversation that continues whenever the user replies
//! to one of the bot's answers.

use std::sync::Arc;

use serde::Deserialize;
use yuzu::prelude::*;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ChatConfig {
    /// Watch index file inside the data directory.
    watch_file: String,
    /// Longest echoed text, in characters.
    max_len: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            watch_file: "chat_watch.json".to_string(),
            max_len: 200,
        }
    }
}

fn answer(text: &str, max_len: usize) -> String {
    format!("you said: {}", short_to(text, max_len))
}

fn handlers(ctx: &ModuleContext) -> Vec<PluginBuilder> {
    let config: ChatConfig = ctx.get_config();
    let index = Arc::new(WatchIndex::open(ctx.data_dir().join(&config.watch_file)));
    let max_len = config.max_len;

    let start = Arc::clone(&index);
    let follow = Arc::clone(&index);

    vec![
        PluginBuilder::new()
            .id("chat")
            .desc("Start an echo conversation")
            .usage("chat <text>")
            .tag("fun")
            .command("chat")
            .execute(move |ctx: Arc<MessageContext>| {
                let index = Arc::clone(&start);
                async move {
                    if ctx.args.is_empty() {
                        ctx.reply("usage: chat <text>").await?;
                    } else {
                        index.reply(&ctx, answer(&ctx.args, max_len)).await?;
                    }
                    Ok::<_, TransportError>(())
                }
            }),
        PluginBuilder::new()
            .id("chat-continue")
            .desc("Continue a conversation by replying to the bot")
            .tag("fun")
            .check_fn(index.check())
            .check(|ctx| !ctx.from_me && !ctx.text.is_empty())
            .execute(move |ctx: Arc<MessageContext>| {
                let index = Arc::clone(&follow);
                async move {
                    let mut text = answer(&ctx.text, max_len);
                    if let Some(entry) = index.continuation(&ctx)
                        && entry.sender != ctx.sender
                    {
                        text.push_str(&format!(" (joining {}'s thread)", entry.sender));
                    }
                    index.reply(&ctx, text).await?;
                    Ok::<_, TransportError>(())
                }
            }),
    ]
}

plugin_module!(CHAT, PluginModule::new("chat").handlers(handlers));
