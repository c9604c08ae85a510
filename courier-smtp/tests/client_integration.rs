//! End-to-end client dialogues against the scripted mock server.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use courier_smtp::auth::cram_md5_response;
use courier_smtp::{Credentials, SmtpClient, SmtpError};
use support::mock_server::MockSmtpServer;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn connect(server: &MockSmtpServer) -> SmtpClient {
    SmtpClient::connect(&server.host(), server.port(), TIMEOUT)
        .await
        .expect("client connects")
}

#[tokio::test]
async fn full_dialogue_with_auth_login() {
    let server = MockSmtpServer::builder()
        .capabilities(&["AUTH LOGIN", "SIZE 10485760"])
        .start()
        .await;

    let mut client = connect(&server).await;
    client.greeting().await.expect("greeting");
    client.ehlo("localhost").await.expect("ehlo");
    assert_eq!(client.auth_mechanisms(), vec!["LOGIN".to_string()]);

    let credentials = Credentials::new("alice", "s3cret");
    client.authenticate(&credentials).await.expect("auth");
    client
        .mail_from("sender@example.com")
        .await
        .expect("mail from");
    client.rcpt_to("user@example.com").await.expect("rcpt to");
    client.data().await.expect("data");
    client
        .send_payload("Subject: Hi\r\n\r\nHello\r\n")
        .await
        .expect("payload accepted");
    client.quit().await;
    assert!(!client.is_connected());

    let commands = server.commands().await;
    assert_eq!(commands[0], "EHLO localhost");
    assert_eq!(commands[1], "AUTH LOGIN");
    assert_eq!(commands[2], BASE64.encode("alice"));
    assert_eq!(commands[3], BASE64.encode("s3cret"));
    assert_eq!(commands[4], "MAIL FROM:<sender@example.com>");
    assert_eq!(commands[5], "RCPT TO:<user@example.com>");
    assert_eq!(commands[6], "DATA");
    assert_eq!(commands[7], "QUIT");
    // The password never crosses the wire in the clear.
    assert!(commands.iter().all(|c| !c.contains("s3cret")));

    let payloads = server.payloads().await;
    assert_eq!(payloads, vec!["Subject: Hi\r\n\r\nHello\r\n".to_string()]);
}

#[tokio::test]
async fn cram_md5_is_preferred_when_advertised() {
    let challenge = BASE64.encode("<1896.697170952@postoffice.reston.mci.net>");
    let server = MockSmtpServer::builder()
        .capabilities(&["AUTH CRAM-MD5 LOGIN"])
        .cram_challenge(challenge.clone())
        .start()
        .await;

    let mut client = connect(&server).await;
    client.greeting().await.expect("greeting");
    client.ehlo("localhost").await.expect("ehlo");

    let credentials = Credentials::new("tim", "tanstaaftanstaaf");
    client.authenticate(&credentials).await.expect("auth");

    let commands = server.commands().await;
    assert_eq!(commands[1], "AUTH CRAM-MD5");
    let expected = cram_md5_response(&credentials, &challenge).expect("response");
    assert_eq!(commands[2], expected);
}

#[tokio::test]
async fn rejected_recipient_is_a_protocol_error() {
    let server = MockSmtpServer::builder()
        .rcpt_to_reply(550, "User unknown")
        .start()
        .await;

    let mut client = connect(&server).await;
    client.greeting().await.expect("greeting");
    client.ehlo("localhost").await.expect("ehlo");
    client
        .mail_from("sender@example.com")
        .await
        .expect("mail from");

    let err = client
        .rcpt_to("ghost@example.com")
        .await
        .expect_err("refused");
    match err {
        SmtpError::Protocol {
            expected,
            got,
            reply,
        } => {
            assert_eq!(expected, 250);
            assert_eq!(got, 550);
            assert!(reply.contains("User unknown"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    // The failed dialogue leaves no live socket behind.
    assert!(!client.is_connected());
}

#[tokio::test]
async fn rejected_credentials_are_an_auth_failure() {
    let server = MockSmtpServer::builder()
        .auth_reply(535, "Authentication credentials invalid")
        .start()
        .await;

    let mut client = connect(&server).await;
    client.greeting().await.expect("greeting");
    client.ehlo("localhost").await.expect("ehlo");

    let err = client
        .authenticate(&Credentials::new("alice", "wrong"))
        .await
        .expect_err("refused");
    assert!(matches!(err, SmtpError::AuthFailed(_)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn dropped_connection_surfaces_as_transport_error() {
    let server = MockSmtpServer::builder().drop_after_commands(2).start().await;

    let mut client = connect(&server).await;
    client.greeting().await.expect("greeting");
    client.ehlo("localhost").await.expect("ehlo");

    let err = client
        .mail_from("sender@example.com")
        .await
        .expect_err("dropped");
    assert!(matches!(
        err,
        SmtpError::ConnectionClosed | SmtpError::Transport(_)
    ));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn starttls_capability_is_detected() {
    let server = MockSmtpServer::builder()
        .capabilities(&["STARTTLS", "AUTH LOGIN"])
        .start()
        .await;

    let mut client = connect(&server).await;
    client.greeting().await.expect("greeting");
    client.ehlo("localhost").await.expect("ehlo");
    assert!(client.supports_starttls());
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockSmtpServer::builder()
        .response_delay(Duration::from_millis(500))
        .start()
        .await;

    let mut client = SmtpClient::connect(&server.host(), server.port(), Duration::from_millis(100))
        .await
        .expect("client connects");

    let err = client.greeting().await.expect_err("timed out");
    assert!(matches!(err, SmtpError::Timeout(_)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn payload_lines_are_dot_stuffed() {
    let server = MockSmtpServer::start_default().await;

    let mut client = connect(&server).await;
    client.greeting().await.expect("greeting");
    client.ehlo("localhost").await.expect("ehlo");
    client.mail_from("a@example.com").await.expect("mail from");
    client.rcpt_to("b@example.com").await.expect("rcpt to");
    client.data().await.expect("data");
    client
        .send_payload("first\r\n.second\r\n..third\r\n")
        .await
        .expect("payload accepted");

    let payloads = server.payloads().await;
    // The server-side reader strips nothing, so the stuffing is visible.
    assert_eq!(payloads[0], "first\r\n..second\r\n...third\r\n");
}
