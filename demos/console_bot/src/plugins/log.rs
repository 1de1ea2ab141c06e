//! `log`: writes every message to the log, inbound and outbound.

use std::convert::Infallible;
use std::sync::Arc;

use tracing::info;
use yuzu::prelude::*;

const PREVIEW_LEN: usize = 60;

fn log_message(id: &str) -> PluginBuilder {
    PluginBuilder::new()
        .id(id)
        .desc("Log messages")
        .tag("debug")
        .execute(|ctx: Arc<MessageContext>| async move {
            let kind = ctx.message_type.as_ref().map(|t| t.as_str()).unwrap_or("unknown");
            info!(
                chat = %ctx.chat,
                sender = %ctx.sender,
                name = %ctx.push_name,
                from_me = ctx.from_me,
                kind,
                "{}",
                short_to(&ctx.text, PREVIEW_LEN)
            );
            Ok::<_, Infallible>(())
        })
}

fn handlers(_: &ModuleContext) -> Vec<PluginBuilder> {
    vec![log_message("log")]
}

fn observers(_: &ModuleContext) -> Vec<PluginBuilder> {
    vec![log_message("log-sent")]
}

plugin_module!(
    LOG,
    PluginModule::new("log").handlers(handlers).observers(observers)
);
