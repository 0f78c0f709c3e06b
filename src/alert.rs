//! # Alert Module
//! Formats alert messages and delivers them over Telegram and email.
//!
//! Both channels are always attempted. A failure on one never stops the other
//! and never propagates to the caller: it is returned in [`Delivery`] and logged.

use crate::error::ChannelError;
use crate::settings::Settings;
use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info};

/// Request timeout of the Telegram call.
pub const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on one mail command invocation.
pub const MAIL_TIMEOUT: Duration = Duration::from_secs(30);

pub const ALERT_TITLE: &str = "hawkdog alert";
pub const TEST_TITLE: &str = "hawkdog test";

/// Host name of this machine, or `unknown`.
pub fn hostname() -> String {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    if host.is_empty() {
        "unknown".to_string()
    } else {
        host
    }
}

/// The text sent on both channels.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub title: &'static str,
    pub path: PathBuf,
    /// `None` for the self-test message.
    pub event: Option<String>,
    pub time: DateTime<Local>,
    pub host: String,
}

impl AlertMessage {
    pub fn alert(path: &Path, event: String, time: DateTime<Local>, host: &str) -> Self {
        AlertMessage {
            title: ALERT_TITLE,
            path: path.to_path_buf(),
            event: Some(event),
            time,
            host: host.to_string(),
        }
    }

    pub fn test(path: &Path, time: DateTime<Local>, host: &str) -> Self {
        AlertMessage {
            title: TEST_TITLE,
            path: path.to_path_buf(),
            event: None,
            time,
            host: host.to_string(),
        }
    }

    pub fn subject(&self) -> &str {
        self.title
    }
}

impl fmt::Display for AlertMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\npath: {}\n", self.title, self.path.display())?;
        if let Some(event) = &self.event {
            writeln!(f, "event: {event}")?;
        }
        write!(
            f,
            "time: {}\nhost: {}",
            self.time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.host
        )
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Telegram Bot API `sendMessage`.
#[derive(Debug, Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: i64,
}

impl TelegramChannel {
    pub fn new(api_base: &str, bot_token: &str, chat_id: i64) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(TELEGRAM_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Transport(e.without_url().to_string()))?;
        Ok(TelegramChannel {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id,
        })
    }

    fn url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    /// Posts `text` to the configured chat.
    pub async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let body = SendMessage {
            chat_id: self.chat_id,
            text,
        };
        // The URL carries the bot token, keep it out of error messages.
        let response = self
            .client
            .post(self.url())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ChannelError::Status {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

/// Local mail submission through an msmtp-compatible command.
#[derive(Debug, Clone)]
pub struct MailChannel {
    program: String,
    account: String,
    from: String,
    to: String,
    timeout: Duration,
}

impl MailChannel {
    pub fn new(program: &str, account: &str, from: &str, to: &str) -> Self {
        MailChannel {
            program: program.to_string(),
            account: account.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            timeout: MAIL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// RFC 822 style text piped to the mail command.
    pub fn compose(&self, subject: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}\n",
            self.from, self.to, subject, body
        )
    }

    /// Runs `<program> -a <account> <to>` with the composed message on stdin.
    pub async fn send(&self, subject: &str, body: &str) -> Result<(), ChannelError> {
        match tokio::time::timeout(self.timeout, self.run(self.compose(subject, body))).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.timeout)),
        }
    }

    async fn run(&self, message: String) -> Result<(), ChannelError> {
        let spawn_error = |source| ChannelError::Spawn {
            program: self.program.clone(),
            source,
        };
        let mut child = Command::new(&self.program)
            .arg("-a")
            .arg(&self.account)
            .arg(&self.to)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that exits without reading closes the pipe early;
            // its exit status carries the real failure.
            let _ = stdin.write_all(message.as_bytes()).await;
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        if output.status.success() {
            return Ok(());
        }
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(ChannelError::Exit {
            program: self.program.clone(),
            status: output.status.to_string(),
            output: combined.trim().to_string(),
        })
    }
}

/// Per channel outcome of one alert.
#[derive(Debug)]
pub struct Delivery {
    pub telegram: Result<(), ChannelError>,
    pub email: Result<(), ChannelError>,
}

impl Delivery {
    pub fn all_sent(&self) -> bool {
        self.telegram.is_ok() && self.email.is_ok()
    }

    /// Writes one log line per channel.
    pub fn log(&self) {
        match &self.telegram {
            Ok(()) => info!("telegram sent"),
            Err(e) => error!("telegram send failed: {}", e),
        }
        match &self.email {
            Ok(()) => info!("email sent"),
            Err(e) => error!("email send failed: {}", e),
        }
    }

    /// Names of the failed channels with their reasons.
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        if let Err(e) = &self.telegram {
            failures.push(format!("telegram: {e}"));
        }
        if let Err(e) = &self.email {
            failures.push(format!("email: {e}"));
        }
        failures
    }
}

/// Sends every alert over both channels.
#[derive(Debug, Clone)]
pub struct Notifier {
    telegram: TelegramChannel,
    mail: MailChannel,
}

impl Notifier {
    pub fn new(telegram: TelegramChannel, mail: MailChannel) -> Self {
        Notifier { telegram, mail }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ChannelError> {
        let telegram = TelegramChannel::new(
            &settings.telegram_api_base,
            &settings.telegram_bot_token,
            settings.telegram_chat_id,
        )?;
        let mail = MailChannel::new(
            &settings.mail_command,
            &settings.msmtp_account,
            &settings.email_from,
            &settings.email_to,
        );
        Ok(Notifier::new(telegram, mail))
    }

    /// Delivers `message` on both channels concurrently and waits for both.
    pub async fn notify(&self, message: &AlertMessage) -> Delivery {
        let text = message.to_string();
        let (telegram, email) = tokio::join!(
            self.telegram.send(&text),
            self.mail.send(message.subject(), &text)
        );
        Delivery { telegram, email }
    }
}
