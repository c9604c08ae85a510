//! SMTP transport behaviour against a scripted in-process peer.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use courier_common::config::{Encryption, FromConfig, SmtpConfig};
use courier_message::{Attachment, ContentKind, Message};
use courier_smtp::SmtpError;
use courier_transport::{SmtpTransport, Transport, TransportError};

/// A single-session SMTP peer: replies 250 to everything except the
/// greeting (220), DATA (354), and whatever override says otherwise.
/// Returns the command lines and DATA payload it saw.
async fn scripted_peer(
    rcpt_code: u16,
) -> (u16, Arc<Mutex<Vec<String>>>, Arc<Mutex<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let commands = Arc::new(Mutex::new(Vec::new()));
    let payload = Arc::new(Mutex::new(String::new()));

    let seen = Arc::clone(&commands);
    let data = Arc::clone(&payload);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        writer.write_all(b"220 peer ready\r\n").await.expect("write");

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let command = line.trim_end().to_string();
            seen.lock().await.push(command.clone());
            let upper = command.to_ascii_uppercase();

            if upper.starts_with("EHLO") {
                writer
                    .write_all(b"250-peer\r\n250 AUTH LOGIN\r\n")
                    .await
                    .expect("write");
            } else if upper.starts_with("RCPT TO") {
                writer
                    .write_all(format!("{rcpt_code} rcpt\r\n").as_bytes())
                    .await
                    .expect("write");
            } else if upper == "DATA" {
                writer.write_all(b"354 go\r\n").await.expect("write");
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    data.lock().await.push_str(&line);
                }
                writer.write_all(b"250 queued\r\n").await.expect("write");
            } else if upper == "QUIT" {
                writer.write_all(b"221 bye\r\n").await.expect("write");
                return;
            } else {
                writer.write_all(b"250 ok\r\n").await.expect("write");
            }
        }
    });

    (port, commands, payload)
}

fn transport(port: u16) -> SmtpTransport {
    SmtpTransport::new(SmtpConfig {
        host: "127.0.0.1".to_string(),
        port,
        encryption: Encryption::None,
        timeout_secs: 5,
        from: FromConfig::default(),
        ..SmtpConfig::default()
    })
}

fn message() -> Message {
    let mut msg = Message::new(
        "user@example.com",
        "Relay test",
        "Hello over SMTP",
        ContentKind::Text,
    )
    .expect("valid message");
    msg.set_from("Sender <sender@example.com>");
    msg
}

#[tokio::test]
async fn relays_a_complete_message() {
    let (port, commands, payload) = scripted_peer(250).await;

    transport(port).send(&message()).await.expect("delivered");

    let commands = commands.lock().await.clone();
    assert_eq!(commands[0], "EHLO localhost");
    // The envelope sender is the bare mailbox, not the display form.
    assert!(commands.contains(&"MAIL FROM:<sender@example.com>".to_string()));
    assert!(commands.contains(&"RCPT TO:<user@example.com>".to_string()));
    assert_eq!(commands.last(), Some(&"QUIT".to_string()));

    let payload = payload.lock().await.clone();
    assert!(payload.starts_with("From: Sender <sender@example.com>\r\n"));
    assert!(payload.contains("Subject: Relay test\r\n"));
    assert!(payload.contains("\r\n\r\nHello over SMTP"));
}

#[tokio::test]
async fn dkim_signature_leads_the_payload() {
    let (port, _, payload) = scripted_peer(250).await;

    let mut msg = message();
    msg.set_dkim_signature("DKIM-Signature: v=1; a=rsa-sha256; b=zzz");
    transport(port).send(&msg).await.expect("delivered");

    let payload = payload.lock().await.clone();
    assert!(payload.starts_with("DKIM-Signature: v=1; a=rsa-sha256; b=zzz\r\nFrom:"));
}

#[tokio::test]
async fn refused_recipient_fails_the_send() {
    let (port, _, _) = scripted_peer(550).await;

    let err = transport(port)
        .send(&message())
        .await
        .expect_err("refused");
    assert!(matches!(
        err,
        TransportError::Smtp(SmtpError::Protocol {
            expected: 250,
            got: 550,
            ..
        })
    ));
}

#[tokio::test]
async fn missing_attachment_is_fatal_for_smtp() {
    let (port, commands, _) = scripted_peer(250).await;

    let mut msg = message();
    msg.attach(Attachment::new("/nonexistent/report.pdf"));

    let err = transport(port)
        .send(&msg)
        .await
        .expect_err("must not send");
    assert!(matches!(err, TransportError::AttachmentMissing { .. }));

    // The failure happens before any byte reaches the wire.
    assert!(commands.lock().await.is_empty());
}

#[tokio::test]
async fn unset_from_never_reaches_the_wire() {
    let (port, commands, _) = scripted_peer(250).await;

    let msg = Message::new("user@example.com", "Hi", "body", ContentKind::Text)
        .expect("valid message");
    let err = transport(port).send(&msg).await.expect_err("no From");
    assert!(matches!(err, TransportError::Message(_)));
    assert!(commands.lock().await.is_empty());
}
