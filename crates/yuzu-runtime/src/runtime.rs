//! The bot process: one connection at a time, reopened until logout.
//!
//! [`BotRuntime`] owns the plugin registry, the dispatcher and the
//! expiration cache. It opens a [`Connection`] through a [`Connector`] and
//! hands every upsert to the dispatcher in arrival order, awaiting each batch
//! before reading the next event. A close reconnects with capped exponential
//! backoff; `LoggedOut` ends the run.
//!
//! ```rust,ignore
//! let runtime = BotRuntime::builder()
//!     .config_file("config/yuzu.toml")
//!     .profile("production")
//!     .with_linked_plugins()
//!     .build()?;
//! runtime.run(&connector).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::signal;
use tracing::{debug, error, info, warn};
use yuzu_core::{
    BoxedTransport, Connection, ConnectionState, Connector, DisconnectReason, ExpirationCache,
    TransportEvent,
};
use yuzu_framework::{
    Dispatcher, ModuleContext, ModuleLoadReport, PluginBuilder, PluginModule, PluginRegistry,
    RegistrationResult, linked_modules,
};

use crate::config::{ConfigLoader, ConfigResult, YuzuConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    Closed(DisconnectReason),
    StreamEnded,
}

/// The Yuzu bot runtime.
pub struct BotRuntime {
    config: YuzuConfig,
    registry: Arc<RwLock<PluginRegistry>>,
    dispatcher: Dispatcher,
    expirations: Arc<ExpirationCache>,
}

impl BotRuntime {
    /// Creates a runtime from `yuzu.toml` in the working directory, or from
    /// the defaults if that configuration cannot be loaded.
    pub fn new() -> Self {
        match ConfigLoader::new().with_current_dir().load() {
            Ok(config) => Self::from_config(&config),
            Err(e) => {
                // No subscriber is installed yet.
                eprintln!("yuzu: {e}; continuing with default configuration");
                Self::from_config(&YuzuConfig::default())
            }
        }
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration, initializing logging first.
    pub fn from_config(config: &YuzuConfig) -> Self {
        logging::init_from_config(&config.logging);

        let registry = Arc::new(RwLock::new(PluginRegistry::with_prefixes(
            &config.bot.prefix,
        )));
        let expirations = Arc::new(ExpirationCache::open(&config.bot.data_dir));
        let dispatcher = Dispatcher::new(Arc::clone(&registry))
            .with_expirations(Arc::clone(&expirations));

        info!(
            log_level = %config.logging.level,
            prefix = %config.bot.prefix,
            data_dir = %config.bot.data_dir.display(),
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            registry,
            dispatcher,
            expirations,
        }
    }

    pub fn config(&self) -> &YuzuConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RwLock<PluginRegistry>> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn expirations(&self) -> &Arc<ExpirationCache> {
        &self.expirations
    }

    // =========================================================================
    // Plugins
    // =========================================================================

    /// Context handed to the factories of module `name`.
    pub fn module_context(&self, name: &str) -> ModuleContext {
        ModuleContext::new(&self.config.bot.data_dir, self.config.plugin_config(name))
    }

    /// Loads one module unless its config section sets `disabled = true`.
    pub fn load_module(&self, module: &PluginModule) -> ModuleLoadReport {
        let ctx = self.module_context(module.name);
        if ctx.config_value()["disabled"] == true {
            info!(module = module.name, "Plugin module disabled by configuration");
            return ModuleLoadReport::default();
        }
        module.load_into(&mut self.registry.write(), &ctx)
    }

    /// Loads every module registered with `plugin_module!`, sorted by name.
    pub fn load_linked_plugins(&self) -> ModuleLoadReport {
        let mut total = ModuleLoadReport::default();
        for module in linked_modules() {
            let report = self.load_module(&module);
            total.handlers += report.handlers;
            total.observers += report.observers;
            total.rejected += report.rejected;
        }
        info!(
            handlers = total.handlers,
            observers = total.observers,
            rejected = total.rejected,
            "Linked plugin modules loaded"
        );
        total
    }

    /// Registers a handler directly.
    pub fn register(&self, builder: PluginBuilder) -> RegistrationResult<String> {
        self.registry.write().register_builder(builder)
    }

    /// Registers a post-send observer directly.
    pub fn observe(&self, builder: PluginBuilder) -> RegistrationResult<String> {
        self.registry.write().observe_builder(builder)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Runs until Ctrl+C, SIGTERM, logout, or the reconnect policy gives up.
    pub async fn run<C>(&self, connector: &C) -> RuntimeResult<()>
    where
        C: Connector + ?Sized,
    {
        info!("Yuzu runtime is now running. Press Ctrl+C to stop.");
        self.run_until(connector, wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes or the connection loop ends.
    pub async fn run_until<C, F>(&self, connector: &C, shutdown: F) -> RuntimeResult<()>
    where
        C: Connector + ?Sized,
        F: Future<Output = ()>,
    {
        self.log_summary();

        let result = tokio::select! {
            result = self.connection_loop(connector) => result,
            _ = shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        self.stop().await?;
        result
    }

    /// Flushes pending state.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if self.expirations.store().flush_async().await? {
            debug!("Flushed expiration cache");
        }
        info!("Runtime stopped");
        Ok(())
    }

    fn log_summary(&self) {
        let registry = self.registry.read();
        info!(
            plugins = registry.count_plugins(),
            listeners = registry.count_listeners(),
            commands = registry.count_commands(),
            observers = registry.count_observers(),
            prefix = %self.config.bot.prefix,
            "Plugins loaded"
        );
    }

    async fn connection_loop<C>(&self, connector: &C) -> RuntimeResult<()>
    where
        C: Connector + ?Sized,
    {
        let reconnect = &self.config.reconnect;
        let mut failures: u32 = 0;

        loop {
            match connector.connect().await {
                Ok(connection) => {
                    failures = 0;
                    match self.serve(connection).await {
                        SessionEnd::Closed(DisconnectReason::LoggedOut) => {
                            error!("Session logged out, not reconnecting");
                            return Err(RuntimeError::LoggedOut);
                        }
                        SessionEnd::Closed(reason) => {
                            warn!(reason = %reason, "Connection closed");
                        }
                        SessionEnd::StreamEnded => {
                            warn!("Event stream ended");
                        }
                    }
                    if !reconnect.enabled {
                        info!("Reconnect disabled, stopping");
                        return Ok(());
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect");
                    if !reconnect.enabled {
                        return Err(e.into());
                    }
                }
            }

            failures = failures.saturating_add(1);
            if !reconnect.allows(failures) {
                error!(attempts = failures, "Giving up reconnecting");
                return Err(RuntimeError::RetriesExhausted { attempts: failures });
            }

            let delay = reconnect.delay_for(failures);
            info!(
                attempt = failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Consumes one connection's events until it closes.
    async fn serve(&self, connection: Connection) -> SessionEnd {
        let Connection {
            transport,
            mut events,
        } = connection;

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::MessagesUpsert(upsert) => {
                    self.handle_upsert(&upsert, &transport).await;
                }
                TransportEvent::Connection(update) => match update.state {
                    ConnectionState::Connecting => debug!("Connecting"),
                    ConnectionState::Open => info!("Connection open"),
                    ConnectionState::Close => {
                        return SessionEnd::Closed(
                            update.reason.unwrap_or(DisconnectReason::ConnectionClosed),
                        );
                    }
                },
            }
        }

        SessionEnd::StreamEnded
    }

    async fn handle_upsert(&self, upsert: &yuzu_core::MessagesUpsert, transport: &BoxedTransport) {
        let outcomes = self.dispatcher.handle_upsert(upsert, transport).await;
        let handled = outcomes.iter().filter(|o| o.handled()).count();
        debug!(
            kind = ?upsert.kind,
            messages = upsert.messages.len(),
            handled,
            "Processed message batch"
        );
    }
}

impl Default for BotRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes on Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C, running until stopped otherwise");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Loads configuration and assembles a [`BotRuntime`].
///
/// Searches the working directory unless [`search_path`](Self::search_path)
/// or [`config_file`](Self::config_file) says otherwise.
#[derive(Debug)]
pub struct RuntimeBuilder {
    loader: ConfigLoader,
    cwd: bool,
    linked_plugins: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            loader: ConfigLoader::new(),
            cwd: true,
            linked_plugins: false,
        }
    }

    pub fn config_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.configure(|loader| loader.file(path))
    }

    /// `development`, `production` or a custom name.
    pub fn profile(self, profile: impl Into<String>) -> Self {
        self.configure(|loader| loader.profile(profile.into()))
    }

    /// Searches `path` instead of the working directory.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cwd = false;
        self.configure(|loader| loader.search_path(path))
    }

    pub fn without_env(self) -> Self {
        self.configure(ConfigLoader::without_env)
    }

    /// Layers `config` over the defaults.
    pub fn merge(self, config: YuzuConfig) -> Self {
        self.configure(|loader| loader.merge(config))
    }

    /// Applies any other [`ConfigLoader`] setting.
    pub fn configure(mut self, f: impl FnOnce(ConfigLoader) -> ConfigLoader) -> Self {
        self.loader = f(self.loader);
        self
    }

    /// Loads every `plugin_module!` module during [`build`](Self::build).
    pub fn with_linked_plugins(mut self) -> Self {
        self.linked_plugins = true;
        self
    }

    pub fn build(self) -> ConfigResult<BotRuntime> {
        let loader = if self.cwd {
            self.loader.with_current_dir()
        } else {
            self.loader
        };
        let runtime = BotRuntime::from_config(&loader.load()?);
        if self.linked_plugins {
            runtime.load_linked_plugins();
        }
        Ok(runtime)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};
    use yuzu_core::{
        ConnectionUpdate, MemoryConnector, MemoryTransport, MessagesUpsert, RawMessage,
    };

    fn test_config(dir: &std::path::Path) -> YuzuConfig {
        let mut config = YuzuConfig::default();
        config.bot.data_dir = dir.to_path_buf();
        config.reconnect.initial_delay_ms = 1;
        config.reconnect.max_delay_ms = 1;
        config
    }

    fn ping_counter(runtime: &BotRuntime) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&counter);
        runtime
            .register(PluginBuilder::new().id("ping").command("ping").execute(
                move |ctx| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        ctx.reply("pong").await?;
                        Ok::<_, yuzu_core::TransportError>(())
                    }
                },
            ))
            .unwrap();
        counter
    }

    fn ping(id: &str) -> TransportEvent {
        TransportEvent::MessagesUpsert(MessagesUpsert::notify(vec![RawMessage::text(
            "chat@s", id, ".ping",
        )]))
    }

    fn close(reason: DisconnectReason) -> TransportEvent {
        TransportEvent::Connection(ConnectionUpdate::closed(reason))
    }

    #[tokio::test]
    async fn test_reconnects_until_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = BotRuntime::from_config(&test_config(dir.path()));
        let counter = ping_counter(&runtime);

        let transport = Arc::new(MemoryTransport::new());
        let connector = MemoryConnector::new(transport.clone())
            .session(vec![
                TransportEvent::Connection(ConnectionUpdate::open()),
                ping("1"),
                close(DisconnectReason::ConnectionLost),
            ])
            .session(vec![ping("2"), close(DisconnectReason::LoggedOut)]);

        let result = runtime.run_until(&connector, std::future::pending()).await;

        assert!(matches!(result, Err(RuntimeError::LoggedOut)));
        assert_eq!(connector.attempts(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_end_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = BotRuntime::from_config(&test_config(dir.path()));
        let counter = ping_counter(&runtime);

        let connector = MemoryConnector::new(Arc::new(MemoryTransport::new()))
            .session(vec![ping("1")])
            .session(vec![close(DisconnectReason::LoggedOut)]);

        let result = runtime.run_until(&connector, std::future::pending()).await;
        assert!(matches!(result, Err(RuntimeError::LoggedOut)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = YuzuConfig::default();
        config.bot.data_dir = dir.path().to_path_buf();
        config.reconnect.max_retries = 2;
        let runtime = BotRuntime::from_config(&config);

        let connector = MemoryConnector::new(Arc::new(MemoryTransport::new()));
        let result = runtime.run_until(&connector, std::future::pending()).await;

        assert!(matches!(
            result,
            Err(RuntimeError::RetriesExhausted { attempts: 3 })
        ));
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test]
    async fn test_connect_failure_without_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.reconnect.enabled = false;
        let runtime = BotRuntime::from_config(&config);

        let connector = MemoryConnector::new(Arc::new(MemoryTransport::new()));
        let result = runtime.run_until(&connector, std::future::pending()).await;
        let err = assert_err!(result);
        assert!(matches!(err, RuntimeError::Transport(_)));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = BotRuntime::from_config(&test_config(dir.path()));
        let observed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&observed);
        runtime
            .observe(PluginBuilder::new().id("log").execute(move |_| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(())
                }
            }))
            .unwrap();
        let counter = ping_counter(&runtime);

        let transport = Arc::new(MemoryTransport::new());
        let connector = MemoryConnector::new(transport.clone())
            .session(vec![ping("1")])
            .with_echo();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = stop_rx.await;
        };
        let stopper = async {
            while observed.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            let _ = stop_tx.send(());
        };

        let (result, ()) = tokio::join!(runtime.run_until(&connector, shutdown), stopper);

        assert_ok!(result);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(connector.attempts(), 1);
        assert!(!runtime.expirations().store().is_dirty());
    }

    #[test]
    fn test_disabled_module_is_skipped() {
        fn handlers(_: &ModuleContext) -> Vec<PluginBuilder> {
            vec![
                PluginBuilder::new()
                    .id("hello")
                    .command("hello")
                    .execute(|_| async { Ok::<_, Infallible>(()) }),
            ]
        }

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config
            .plugins
            .insert("off".into(), serde_json::json!({ "disabled": true }));
        let runtime = BotRuntime::from_config(&config);

        let report = runtime.load_module(&PluginModule::new("off").handlers(handlers));
        assert_eq!(report, ModuleLoadReport::default());

        let report = runtime.load_module(&PluginModule::new("on").handlers(handlers));
        assert_eq!(report.handlers, 1);
        assert!(runtime.registry().read().lookup(".hello").is_some());
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_builder_reads_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::write(
            dir.path().join("yuzu.toml"),
            format!("[bot]\nprefix = \"!\"\ndata_dir = {:?}\n", data.display().to_string()),
        )
        .unwrap();

        let runtime = BotRuntime::builder()
            .without_env()
            .search_path(dir.path())
            .build()
            .unwrap();
        assert_eq!(runtime.config().bot.prefix, "!");
        assert_eq!(runtime.config().bot.data_dir, data);
        assert_eq!(runtime.registry().read().prefixes(), ['!']);
    }
}
