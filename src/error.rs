//! # Error Module
//! Error types for every stage of the daemon, from configuration loading to
//! alert delivery.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Exit code for a missing or invalid configuration.
pub const EXIT_CONFIG: i32 = 2;

/// Exit code for a fatal runtime error (provisioning or subscription).
pub const EXIT_RUNTIME: i32 = 1;

/// Exit code when the self-test could not deliver through every channel.
pub const EXIT_SELF_TEST: i32 = 3;

/// Errors raised while locating, parsing or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No configuration file could be read.
    #[error("no configuration file found (tried {})", display_paths(.tried))]
    NotFound { tried: Vec<PathBuf> },

    /// The configuration file exists but could not be read.
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid JSON or TOML.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A required field is absent or empty.
    #[error("{0} required")]
    Missing(&'static str),

    /// A field is present but has an unusable value.
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    /// The home directory could not be determined.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while planting the sentinel file.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to gather random bytes for the sentinel token")]
    Random,

    #[error("failed to write sentinel {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to restrict permissions of {}: {source}", .path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Malformed bytes in an inotify read buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated event header at offset {offset} ({remaining} bytes left)")]
    TruncatedHeader { offset: usize, remaining: usize },

    #[error("event at offset {offset} declares {name_len} name bytes but only {remaining} remain")]
    TruncatedName {
        offset: usize,
        name_len: usize,
        remaining: usize,
    },
}

/// Errors raised while subscribing to, or reading from, the event source.
#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("inotify init: {0}")]
    Init(#[source] io::Error),

    #[error("add watch on {}: {source}", .path.display())]
    AddWatch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read inotify: {0}")]
    Read(#[source] io::Error),

    #[error("decode inotify buffer: {0}")]
    Decode(#[from] DecodeError),

    #[error("file watcher: {0}")]
    Watcher(#[from] notify::Error),

    #[error("file watcher stopped delivering events")]
    Disconnected,
}

/// Failure of a single delivery channel. Never fatal.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("{0}")]
    Transport(String),

    #[error("telegram http {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} failed: {status}: {output}")]
    Exit {
        program: String,
        status: String,
        output: String,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Top-level error for the daemon and the self-test.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("ensure sentinel: {0}")]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("notifier setup: {0}")]
    Notifier(#[from] ChannelError),

    #[error("self-test delivery failed: {0}")]
    SelfTest(String),
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => EXIT_CONFIG,
            Error::Provision(_) | Error::Subscription(_) | Error::Notifier(_) => EXIT_RUNTIME,
            Error::SelfTest(_) => EXIT_SELF_TEST,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
