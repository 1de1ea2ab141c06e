//! Plugin descriptors.
//!
//! A [`Plugin`] is one handler: an async body plus the rules deciding when it
//! runs. Plugins without commands are *listeners* and see every new message;
//! plugins with commands are reachable only through an exact pattern match
//! in the [`PluginRegistry`](crate::registry::PluginRegistry).
//!
//! Plugins are built with [`PluginBuilder`], which validates the descriptor
//! before anything is registered:
//!
//! ```rust,ignore
//! use yuzu_framework::{CheckRule, Plugin};
//!
//! let ping = Plugin::builder()
//!     .desc("Latency check")
//!     .commands(["ping", "p"])
//!     .check(|ctx| ctx.from_me)
//!     .timeout_ms(15_000)
//!     .execute(|ctx| async move {
//!         ctx.reply("pong").await?;
//!         Ok::<_, yuzu_core::TransportError>(())
//!     })
//!     .build()?;
//! ```
//!
//! # Admission
//!
//! Before a plugin runs, [`Plugin::admit`] evaluates, in order:
//!
//! 1. `disabled` rejects immediately
//! 2. a non-zero `timeout` rejects messages older than the timeout
//! 3. every check runs, and the results are combined by the [`CheckRule`]
//!
//! A check that panics counts as `false`.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};
use yuzu_core::MessageContext;
use yuzu_core::util::gen_hex_id;

use crate::error::{BoxError, HandlerPanic, RegistrationError, RegistrationResult};

/// Length of generated plugin ids.
const PLUGIN_ID_LEN: usize = 6;

/// A type-erased admission check.
pub type CheckFn = Arc<dyn Fn(&MessageContext) -> bool + Send + Sync>;

/// A type-erased plugin body.
pub type ExecuteFn =
    Arc<dyn Fn(Arc<MessageContext>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// How check results combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckRule {
    /// Every check must pass.
    #[default]
    All,
    /// At least one check must pass.
    One,
}

impl CheckRule {
    /// Combines evaluated check results. No checks always passes.
    pub fn combine(&self, results: &[bool]) -> bool {
        if results.is_empty() {
            return true;
        }
        match self {
            Self::All => results.iter().all(|r| *r),
            Self::One => results.iter().any(|r| *r),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Disabled,
    /// The message is older than the plugin's timeout.
    Stale { age_ms: i64 },
    ChecksFailed,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Wraps a fallible predicate as a check; an error counts as `false`.
pub fn fallible_check<F, E>(f: F) -> CheckFn
where
    F: Fn(&MessageContext) -> Result<bool, E> + Send + Sync + 'static,
    E: std::fmt::Display,
{
    Arc::new(move |ctx: &MessageContext| match f(ctx) {
        Ok(pass) => pass,
        Err(e) => {
            warn!(id = %ctx.id, error = %e, "Check returned an error, treating as failed");
            false
        }
    })
}

/// A registered handler.
pub struct Plugin {
    id: String,
    desc: String,
    usage: String,
    tags: Vec<String>,
    commands: Option<Vec<String>>,
    no_prefix: bool,
    check_rule: CheckRule,
    checks: Vec<CheckFn>,
    timeout_ms: u64,
    disabled: bool,
    execute: ExecuteFn,
}

impl Plugin {
    pub fn builder() -> PluginBuilder {
        PluginBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn usage(&self) -> &str {
        &self.usage
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Lower-cased trigger strings; `None` for listeners.
    pub fn commands(&self) -> Option<&[String]> {
        self.commands.as_deref()
    }

    pub fn is_listener(&self) -> bool {
        self.commands.is_none()
    }

    pub fn no_prefix(&self) -> bool {
        self.no_prefix
    }

    pub fn check_rule(&self) -> CheckRule {
        self.check_rule
    }

    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    /// Maximum message age in milliseconds; 0 disables the guard.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Whether `ctx` may be handled right now.
    pub fn admit(&self, ctx: &MessageContext) -> Admission {
        self.admit_at(ctx, chrono::Utc::now().timestamp_millis())
    }

    /// Admission against an explicit clock.
    pub fn admit_at(&self, ctx: &MessageContext, now_ms: i64) -> Admission {
        if self.disabled {
            return Admission::Disabled;
        }

        if self.timeout_ms > 0 {
            let age_ms = ctx.age_ms(now_ms);
            if age_ms > i64::try_from(self.timeout_ms).unwrap_or(i64::MAX) {
                return Admission::Stale { age_ms };
            }
        }

        let results: Vec<bool> = self
            .checks
            .iter()
            .enumerate()
            .map(|(index, check)| self.evaluate(index, check, ctx))
            .collect();

        if self.check_rule.combine(&results) {
            Admission::Admitted
        } else {
            trace!(plugin = %self.id, ?results, "Checks rejected message");
            Admission::ChecksFailed
        }
    }

    fn evaluate(&self, index: usize, check: &CheckFn, ctx: &MessageContext) -> bool {
        match std::panic::catch_unwind(AssertUnwindSafe(|| check(ctx))) {
            Ok(pass) => pass,
            Err(payload) => {
                warn!(
                    plugin = %self.id,
                    check = index,
                    panic = %panic_message(payload.as_ref()),
                    "Check panicked, treating as failed"
                );
                false
            }
        }
    }

    /// Runs the body. A panic, whether raised while the body builds its
    /// future or while it is polled, is returned as a [`HandlerPanic`] error.
    pub async fn run(&self, ctx: Arc<MessageContext>) -> Result<(), BoxError> {
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| (self.execute)(ctx)));
        let outcome = match started {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(payload) => Err(payload),
        };
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(Box::new(HandlerPanic(panic_message(payload.as_ref())))),
        }
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("commands", &self.commands)
            .field("no_prefix", &self.no_prefix)
            .field("check_rule", &self.check_rule)
            .field("checks", &self.checks.len())
            .field("timeout_ms", &self.timeout_ms)
            .field("disabled", &self.disabled)
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// =============================================================================
// PluginBuilder
// =============================================================================

/// Validating builder for [`Plugin`].
#[derive(Clone, Default)]
pub struct PluginBuilder {
    id: Option<String>,
    desc: String,
    usage: String,
    tags: Vec<String>,
    commands: Option<Vec<String>>,
    no_prefix: bool,
    check_rule: CheckRule,
    checks: Vec<CheckFn>,
    timeout_ms: u64,
    disabled: bool,
    execute: Option<ExecuteFn>,
}

impl PluginBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the id. A random one is generated at build time otherwise.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Adds a trigger command, turning the plugin into a command handler.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands
            .get_or_insert_with(Vec::new)
            .push(command.into());
        self
    }

    /// Adds several trigger commands.
    pub fn commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands
            .get_or_insert_with(Vec::new)
            .extend(commands.into_iter().map(Into::into));
        self
    }

    /// Registers commands verbatim instead of under every prefix.
    pub fn no_prefix(mut self, no_prefix: bool) -> Self {
        self.no_prefix = no_prefix;
        self
    }

    pub fn check_rule(mut self, rule: CheckRule) -> Self {
        self.check_rule = rule;
        self
    }

    /// Adds an admission check.
    pub fn check<F>(mut self, f: F) -> Self
    where
        F: Fn(&MessageContext) -> bool + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(f));
        self
    }

    /// Adds a pre-built check.
    pub fn check_fn(mut self, check: CheckFn) -> Self {
        self.checks.push(check);
        self
    }

    /// Skips messages older than `ms` milliseconds. 0 disables the guard.
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.timeout_ms(ms)
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Sets the body.
    pub fn execute<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Arc<MessageContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.execute = Some(Arc::new(
            move |ctx: Arc<MessageContext>| -> BoxFuture<'static, Result<(), BoxError>> {
                let fut = f(ctx);
                Box::pin(async move { fut.await.map_err(Into::into) })
            },
        ));
        self
    }

    /// Sets a pre-built body.
    pub fn execute_fn(mut self, execute: ExecuteFn) -> Self {
        self.execute = Some(execute);
        self
    }

    /// Validates the descriptor.
    pub fn build(self) -> RegistrationResult<Plugin> {
        let Some(execute) = self.execute else {
            return Err(RegistrationError::MissingExecute {
                id: self.id.unwrap_or_else(|| "<anonymous>".to_owned()),
            });
        };
        let id = self.id.unwrap_or_else(|| gen_hex_id(PLUGIN_ID_LEN));

        let commands = match self.commands {
            None => None,
            Some(list) if list.is_empty() => {
                return Err(RegistrationError::EmptyCommands { id });
            }
            Some(list) => {
                let mut commands = Vec::with_capacity(list.len());
                for command in list {
                    if command.is_empty() {
                        return Err(RegistrationError::InvalidCommand {
                            id,
                            command,
                            reason: "command is empty",
                        });
                    }
                    if command.chars().any(char::is_whitespace) {
                        return Err(RegistrationError::InvalidCommand {
                            id,
                            command,
                            reason: "command contains whitespace",
                        });
                    }
                    let command = command.to_lowercase();
                    if !commands.contains(&command) {
                        commands.push(command);
                    }
                }
                Some(commands)
            }
        };

        Ok(Plugin {
            id,
            desc: self.desc,
            usage: self.usage,
            tags: self.tags,
            commands,
            no_prefix: self.no_prefix,
            check_rule: self.check_rule,
            checks: self.checks,
            timeout_ms: self.timeout_ms,
            disabled: self.disabled,
            execute,
        })
    }
}
