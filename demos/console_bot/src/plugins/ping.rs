//! `ping`: answers with the time the message took to arrive.

use yuzu::prelude::*;

fn handlers(_: &ModuleContext) -> Vec<PluginBuilder> {
    vec![
        PluginBuilder::new()
            .id("ping")
            .desc("Check that the bot is alive")
            .usage("ping")
            .tag("utility")
            .commands(["ping", "p"])
            .timeout_ms(60_000)
            .execute(|ctx: std::sync::Arc<MessageContext>| async move {
                let now = chrono::Utc::now().timestamp_millis();
                let latency = u64::try_from(ctx.age_ms(now)).unwrap_or(0);
                ctx.reply(format!("pong! ({})", format_elapse(latency)))
                    .await?;
                Ok::<_, TransportError>(())
            }),
    ]
}

plugin_module!(PING, PluginModule::new("ping").handlers(handlers));
