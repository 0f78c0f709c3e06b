//! Delivery over both channels against a mock Telegram API and stand-in mail commands.

use chrono::Local;
use hawkdog::alert::{AlertMessage, MailChannel, Notifier, TelegramChannel};
use hawkdog::error::{ChannelError, EXIT_SELF_TEST};
use hawkdog::monitor::self_test;
use hawkdog::settings::{ConfigFormat, Settings};
use serde_json::json;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "123:abc";
const SEND_PATH: &str = "/bot123:abc/sendMessage";

fn message() -> AlertMessage {
    AlertMessage::alert(
        Path::new("/home/op/.clawdbot/credentials/aws_creds_cache.ini"),
        "OPEN".to_string(),
        Local::now(),
        "testhost",
    )
}

fn notifier(server: &MockServer, mail_program: &str) -> Notifier {
    Notifier::new(
        TelegramChannel::new(&server.uri(), TOKEN, 42).unwrap(),
        MailChannel::new(mail_program, "idlepig", "hawkdog@example.com", "op@example.com"),
    )
}

fn settings(server: &MockServer, mail_program: &str) -> Settings {
    let text = json!({
        "sentinelPath": "/tmp/hawkdog-test/creds.ini",
        "telegramBotToken": TOKEN,
        "telegramChatId": 42,
        "emailTo": "op@example.com",
        "emailFrom": "hawkdog@example.com",
        "telegramApiBase": server.uri(),
        "mailCommand": mail_program,
    })
    .to_string();
    Settings::parse(&text, ConfigFormat::Json).unwrap()
}

#[tokio::test]
async fn test_both_channels_succeed() {
    let server = MockServer::start().await;
    let msg = message();
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "chat_id": 42, "text": msg.to_string() })))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
        .expect(1)
        .mount(&server)
        .await;

    let delivery = notifier(&server, "true").notify(&msg).await;

    assert!(delivery.telegram.is_ok(), "{:?}", delivery.telegram);
    assert!(delivery.email.is_ok(), "{:?}", delivery.email);
    assert!(delivery.all_sent());
}

#[tokio::test]
async fn test_telegram_failure_does_not_block_email() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("  Internal error \n"))
        .mount(&server)
        .await;

    let delivery = notifier(&server, "true").notify(&message()).await;

    match &delivery.telegram {
        Err(ChannelError::Status { status, body }) => {
            assert_eq!(*status, 500);
            assert_eq!(body, "Internal error");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(delivery.email.is_ok());
}

#[tokio::test]
async fn test_email_failure_does_not_block_telegram() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let delivery = notifier(&server, "false").notify(&message()).await;

    assert!(delivery.telegram.is_ok());
    assert!(matches!(delivery.email, Err(ChannelError::Exit { .. })));
}

#[tokio::test]
async fn test_missing_mail_program_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let delivery = notifier(&server, "/nonexistent/hawkdog-msmtp")
        .notify(&message())
        .await;

    assert!(delivery.telegram.is_ok());
    assert!(matches!(delivery.email, Err(ChannelError::Spawn { .. })));
}

#[tokio::test]
async fn test_transport_error_hides_token() {
    // Nothing listens on port 9 of localhost.
    let channel = TelegramChannel::new("http://127.0.0.1:9", TOKEN, 42).unwrap();
    let err = channel.send("hello").await.unwrap_err();

    assert!(matches!(err, ChannelError::Transport(_)));
    assert!(!err.to_string().contains(TOKEN));
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_mail_command_receives_message() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("message.txt");
    let args = dir.path().join("args.txt");
    let program = script(
        dir.path(),
        "fake-msmtp",
        &format!("echo \"$@\" > {}\ncat > {}", args.display(), out.display()),
    );

    let mail = MailChannel::new(
        program.to_str().unwrap(),
        "idlepig",
        "hawkdog@example.com",
        "op@example.com",
    );
    mail.send("hawkdog alert", "body text").await.unwrap();

    assert_eq!(fs::read_to_string(&args).unwrap(), "-a idlepig op@example.com\n");
    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "From: hawkdog@example.com\nTo: op@example.com\nSubject: hawkdog alert\n\nbody text\n"
    );
}

#[tokio::test]
async fn test_mail_failure_carries_output() {
    let dir = tempfile::tempdir().unwrap();
    let program = script(dir.path(), "broken-msmtp", "echo 'account not found' >&2\nexit 78");

    let mail = MailChannel::new(program.to_str().unwrap(), "nope", "a@x", "b@x");
    match mail.send("s", "b").await {
        Err(ChannelError::Exit { output, .. }) => assert_eq!(output, "account not found"),
        other => panic!("expected exit failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_mail_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let program = script(dir.path(), "hung-msmtp", "sleep 5");

    let mail = MailChannel::new(program.to_str().unwrap(), "idlepig", "a@x", "b@x")
        .with_timeout(Duration::from_millis(200));
    assert!(matches!(
        mail.send("s", "b").await,
        Err(ChannelError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_self_test_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    self_test(&settings(&server, "true")).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let text = body["text"].as_str().unwrap();
    assert!(text.starts_with("hawkdog test\n\npath: /tmp/hawkdog-test/creds.ini\n"));
    assert!(!text.contains("event:"));
}

#[tokio::test]
async fn test_self_test_attempts_both_channels_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let err = self_test(&settings(&server, "false")).await.unwrap_err();

    assert_eq!(err.exit_code(), EXIT_SELF_TEST);
    let text = err.to_string();
    assert!(text.contains("telegram: telegram http 403: Forbidden"), "{text}");
    assert!(text.contains("email:"), "{text}");
}
