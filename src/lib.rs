//! # Hawkdog Library
//! This crate provides the core logic for the sentinel file watcher: it plants a decoy
//! credentials file, watches it through kernel notifications and alerts over Telegram
//! and email when anything touches it.

pub mod alert;
pub mod canary;
pub mod error;
pub mod logger;
pub mod monitor;
pub mod policy;
pub mod settings;
pub mod watch;
