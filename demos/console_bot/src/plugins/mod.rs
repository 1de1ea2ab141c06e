//! Plugins compiled into the console bot.
//!
//! Each module registers itself with `plugin_module!`; `main` only has to
//! call `load_linked_plugins`.

mod chat;
mod log;
mod ping;
