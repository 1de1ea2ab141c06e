//! Message dispatcher for the Yuzu framework.
//!
//! The [`Dispatcher`] turns each inbound message into a [`MessageContext`]
//! and drives it through the [`PluginRegistry`]:
//!
//! 1. `notify` messages run every admitted listener in registration order,
//!    then at most one admitted command handler looked up by pattern
//! 2. `append` messages (the bot's own sends) run the admitted observers only
//!
//! Each handler is awaited before the next one starts. A failing or
//! panicking handler is logged with its plugin id and never stops the
//! handlers after it.
//!
//! ```rust,ignore
//! let registry = Arc::new(RwLock::new(PluginRegistry::new()));
//! let dispatcher = Dispatcher::new(registry.clone()).with_expirations(cache);
//!
//! while let Some(event) = events.recv().await {
//!     if let TransportEvent::MessagesUpsert(upsert) = event {
//!         dispatcher.handle_upsert(&upsert, &transport).await;
//!     }
//! }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{Instrument, Level, debug, error, span, trace};
use yuzu_core::{
    BoxedTransport, ExpirationCache, MessageContext, MessagesUpsert, Outbox, RawMessage,
    UpsertKind,
};

use crate::plugin::{Plugin, panic_message};
use crate::registry::PluginRegistry;

/// What happened while dispatching one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Listeners that ran, in order.
    pub listeners: Vec<String>,
    /// Command handler that ran.
    pub command: Option<String>,
    /// Observers that ran, in order.
    pub observers: Vec<String>,
    /// Plugins that ran and returned an error or panicked.
    pub failed: Vec<String>,
}

impl DispatchOutcome {
    /// Whether any plugin ran.
    pub fn handled(&self) -> bool {
        !self.listeners.is_empty() || self.command.is_some() || !self.observers.is_empty()
    }
}

/// Routes inbound messages to plugins.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RwLock<PluginRegistry>>,
    expirations: Option<Arc<ExpirationCache>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RwLock<PluginRegistry>>) -> Self {
        Self {
            registry,
            expirations: None,
        }
    }

    /// Remembers chat expirations seen on inbound messages and applies them
    /// to unsolicited sends.
    pub fn with_expirations(mut self, cache: Arc<ExpirationCache>) -> Self {
        self.expirations = Some(cache);
        self
    }

    pub fn registry(&self) -> &Arc<RwLock<PluginRegistry>> {
        &self.registry
    }

    pub fn expirations(&self) -> Option<&Arc<ExpirationCache>> {
        self.expirations.as_ref()
    }

    /// Builds the context for `raw`, attached to `transport`.
    pub async fn context(
        &self,
        raw: RawMessage,
        kind: UpsertKind,
        transport: &BoxedTransport,
    ) -> MessageContext {
        let mut outbox = Outbox::new(Arc::clone(transport));
        if let Some(cache) = &self.expirations {
            outbox = outbox.with_expirations(Arc::clone(cache));
        }
        let ctx = MessageContext::from_raw(raw, kind).with_outbox(outbox);

        if ctx.expiration > 0
            && let Some(cache) = &self.expirations
        {
            cache.remember(&ctx.chat, ctx.expiration).await;
        }
        ctx
    }

    /// Dispatches a batch, one message at a time in arrival order.
    ///
    /// A panic escaping the batch is logged together with the serialized batch.
    pub async fn handle_upsert(
        &self,
        upsert: &MessagesUpsert,
        transport: &BoxedTransport,
    ) -> Vec<DispatchOutcome> {
        let batch = async {
            let mut outcomes = Vec::with_capacity(upsert.messages.len());
            for raw in &upsert.messages {
                let ctx = Arc::new(self.context(raw.clone(), upsert.kind, transport).await);
                outcomes.push(self.dispatch(ctx).await);
            }
            outcomes
        };

        match AssertUnwindSafe(batch).catch_unwind().await {
            Ok(outcomes) => outcomes,
            Err(payload) => {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    batch = %serde_json::to_string(upsert).unwrap_or_default(),
                    "Unexpected failure while handling message batch"
                );
                Vec::new()
            }
        }
    }

    /// Dispatches one message.
    pub async fn dispatch(&self, ctx: Arc<MessageContext>) -> DispatchOutcome {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            id = %ctx.id,
            chat = %ctx.chat,
            kind = ?ctx.kind
        );
        async {
            match ctx.kind {
                UpsertKind::Notify => self.dispatch_notify(ctx).await,
                UpsertKind::Append => self.dispatch_append(ctx).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch_notify(&self, ctx: Arc<MessageContext>) -> DispatchOutcome {
        let (listeners, command) = {
            let registry = self.registry.read();
            (registry.listeners(), registry.lookup(&ctx.pattern))
        };

        let mut outcome = DispatchOutcome::default();

        for listener in &listeners {
            if Self::run_admitted(listener, &ctx, &mut outcome.failed).await {
                outcome.listeners.push(listener.id().to_owned());
            }
        }

        if let Some(plugin) = command {
            debug!(pattern = %ctx.pattern, plugin = %plugin.id(), "Command matched");
            if Self::run_admitted(&plugin, &ctx, &mut outcome.failed).await {
                outcome.command = Some(plugin.id().to_owned());
            }
        }

        outcome
    }

    async fn dispatch_append(&self, ctx: Arc<MessageContext>) -> DispatchOutcome {
        let observers = self.registry.read().observers();
        let mut outcome = DispatchOutcome::default();

        for observer in &observers {
            if Self::run_admitted(observer, &ctx, &mut outcome.failed).await {
                outcome.observers.push(observer.id().to_owned());
            }
        }

        outcome
    }

    /// Runs `plugin` if admitted. Returns whether it ran.
    async fn run_admitted(
        plugin: &Plugin,
        ctx: &Arc<MessageContext>,
        failed: &mut Vec<String>,
    ) -> bool {
        let admission = plugin.admit(ctx);
        if !admission.is_admitted() {
            trace!(plugin = %plugin.id(), ?admission, "Plugin not admitted");
            return false;
        }

        if let Err(e) = plugin.run(Arc::clone(ctx)).await {
            error!(
                plugin = %plugin.id(),
                error = %e,
                "Handler returned an error"
            );
            failed.push(plugin.id().to_owned());
        }
        true
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("Dispatcher")
            .field("listeners", &registry.count_listeners())
            .field("commands", &registry.count_commands())
            .field("observers", &registry.count_observers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginBuilder;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;
    use yuzu_core::{ContentBody, ContextInfo, MemoryTransport, MessagePayload};

    fn counting(id: &str, counter: &Arc<AtomicUsize>, add: usize) -> PluginBuilder {
        let counter = Arc::clone(counter);
        PluginBuilder::new().id(id).execute(move |_| {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(add, Ordering::SeqCst);
                Ok::<_, Infallible>(())
            }
        })
    }

    fn setup() -> (Dispatcher, Arc<RwLock<PluginRegistry>>, BoxedTransport) {
        let registry = Arc::new(RwLock::new(PluginRegistry::with_prefixes(".")));
        let transport: BoxedTransport = Arc::new(MemoryTransport::new());
        (Dispatcher::new(registry.clone()), registry, transport)
    }

    #[tokio::test]
    async fn test_ping_end_to_end() {
        let (dispatcher, registry, transport) = setup();
        registry.write().set_prefixes("./");
        let counter = Arc::new(AtomicUsize::new(0));
        registry
            .write()
            .register_builder(counting("ping", &counter, 1).command("ping"))
            .unwrap();

        let upsert = MessagesUpsert::notify(vec![RawMessage::text("c", "1", ".ping")]);
        let outcomes = dispatcher.handle_upsert(&upsert, &transport).await;
        assert_eq!(outcomes[0].command.as_deref(), Some("ping"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let upsert = MessagesUpsert::notify(vec![RawMessage::text("c", "2", "ping")]);
        let outcomes = dispatcher.handle_upsert(&upsert, &transport).await;
        assert!(!outcomes[0].handled());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_others() {
        let (dispatcher, registry, transport) = setup();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut registry = registry.write();
            registry.register_builder(counting("l1", &counter, 1)).unwrap();
            registry
                .register_builder(
                    PluginBuilder::new()
                        .id("l2")
                        .execute(|_| async { Err::<(), _>("listener failed") }),
                )
                .unwrap();
            registry.register_builder(counting("l3", &counter, 10)).unwrap();
        }

        let upsert = MessagesUpsert::notify(vec![RawMessage::text("c", "1", "hello")]);
        let outcomes = dispatcher.handle_upsert(&upsert, &transport).await;
        let outcome = &outcomes[0];

        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert_eq!(outcome.listeners, vec!["l1", "l2", "l3"]);
        assert_eq!(outcome.failed, vec!["l2"]);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let (dispatcher, registry, transport) = setup();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut registry = registry.write();
            registry
                .register_builder(PluginBuilder::new().id("boom").execute(|ctx| async move {
                    if !ctx.text.is_empty() {
                        panic!("handler bug");
                    }
                    Ok::<_, Infallible>(())
                }))
                .unwrap();
            registry
                .register_builder(counting("cmd", &counter, 1).command("go"))
                .unwrap();
        }

        let upsert = MessagesUpsert::notify(vec![RawMessage::text("c", "1", ".go")]);
        let outcomes = dispatcher.handle_upsert(&upsert, &transport).await;
        let outcome = &outcomes[0];
        assert_eq!(outcome.failed, vec!["boom"]);
        assert_eq!(outcome.command.as_deref(), Some("cmd"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eager_panic_does_not_stop_siblings() {
        let (dispatcher, registry, transport) = setup();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut registry = registry.write();
            registry.register_builder(counting("l1", &counter, 1)).unwrap();
            registry
                .register_builder(PluginBuilder::new().id("l2").execute(
                    |ctx: Arc<MessageContext>| {
                        let n: u32 = ctx.args.parse().expect("numeric argument");
                        async move {
                            let _ = n;
                            Ok::<_, Infallible>(())
                        }
                    },
                ))
                .unwrap();
            registry.register_builder(counting("l3", &counter, 10)).unwrap();
        }

        let upsert = MessagesUpsert::notify(vec![
            RawMessage::text("c", "1", "hello world"),
            RawMessage::text("c", "2", "hello again"),
        ]);
        let outcomes = dispatcher.handle_upsert(&upsert, &transport).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].listeners, vec!["l1", "l2", "l3"]);
        assert_eq!(outcomes[0].failed, vec!["l2"]);
        assert_eq!(counter.load(Ordering::SeqCst), 22);
    }

    #[tokio::test]
    async fn test_append_runs_observers_only() {
        let (dispatcher, registry, transport) = setup();
        let listener_hits = Arc::new(AtomicUsize::new(0));
        let observer_hits = Arc::new(AtomicUsize::new(0));
        {
            let mut registry = registry.write();
            registry
                .register_builder(counting("listener", &listener_hits, 1))
                .unwrap();
            registry
                .register_builder(counting("cmd", &listener_hits, 100).command("ping"))
                .unwrap();
            registry
                .observe_builder(counting("observer", &observer_hits, 1))
                .unwrap();
        }

        let echo = RawMessage::text("c", "1", ".ping").from_me(true);
        let outcomes = dispatcher
            .handle_upsert(&MessagesUpsert::append(vec![echo]), &transport)
            .await;

        assert_eq!(outcomes[0].observers, vec!["observer"]);
        assert_eq!(listener_hits.load(Ordering::SeqCst), 0);
        assert_eq!(observer_hits.load(Ordering::SeqCst), 1);

        let fresh = RawMessage::text("c", "2", "hi");
        dispatcher
            .handle_upsert(&MessagesUpsert::notify(vec![fresh]), &transport)
            .await;
        assert_eq!(observer_hits.load(Ordering::SeqCst), 1);
        assert_eq!(listener_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_command_does_not_run() {
        let (dispatcher, registry, transport) = setup();
        let counter = Arc::new(AtomicUsize::new(0));
        assert_ok!(
            registry.write().register_builder(
                counting("owner", &counter, 1)
                    .command("shutdown")
                    .check(|ctx| ctx.from_me),
            )
        );

        let upsert = MessagesUpsert::notify(vec![RawMessage::text("c", "1", ".shutdown")]);
        let outcomes = dispatcher.handle_upsert(&upsert, &transport).await;
        let outcome = &outcomes[0];
        assert!(outcome.command.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_processed_in_order() {
        let (dispatcher, registry, transport) = setup();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        registry
            .write()
            .register_builder(PluginBuilder::new().id("order").execute(move |ctx| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(ctx.id.clone());
                    Ok::<_, Infallible>(())
                }
            }))
            .unwrap();

        let upsert = MessagesUpsert::notify(vec![
            RawMessage::text("c", "1", "a"),
            RawMessage::text("c", "2", "b"),
            RawMessage::text("c", "3", "c"),
        ]);
        let outcomes = dispatcher.handle_upsert(&upsert, &transport).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(*seen.lock(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_inbound_expiration_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ExpirationCache::open(dir.path()));
        let (dispatcher, _registry, transport) = setup();
        let dispatcher = dispatcher.with_expirations(cache.clone());

        let raw = RawMessage {
            message: Some(MessagePayload {
                extended_text_message: Some(ContentBody::with_text("hi").context(ContextInfo {
                    expiration: Some(86400),
                    ..Default::default()
                })),
                ..Default::default()
            }),
            ..RawMessage::text("eph@s", "1", "")
        };
        dispatcher
            .handle_upsert(&MessagesUpsert::notify(vec![raw]), &transport)
            .await;

        assert_eq!(cache.get("eph@s"), Some(86400));
    }
}
