//! sitespy daemon core: the persisted configuration and the notification
//! pipeline.
//!
//! Write path: `ConfigState` mutator -> change notifier -> `ConfigSynchronizer`
//! -> `config.json`. Send path: producer -> `MessageBuffer` ->
//! `NotificationDispatcher` -> `TelegramBot` fan-out.

pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod paths;
pub mod settings;
pub mod state;
pub mod store;
pub mod synchronizer;
pub mod telegram;
