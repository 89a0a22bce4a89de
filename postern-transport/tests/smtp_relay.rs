use std::sync::{Arc, Mutex};

use postern_common::Secret;
use postern_delivery::{
    ConnectionError, DeliveryError, PermanentError, transport::RelayConnector,
};
use postern_transport::{RelaySecurity, SmtpRelayConnector, SmtpSettings};
use pretty_assertions::assert_eq;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

const MESSAGE: &[u8] =
    b"From: x@yahoo.com\r\nTo: abc@foo.com\r\nSender: me@gmail.com\r\nSubject: hi\r\n\r\nbody\r\n";

/// What the fake relay saw.
#[derive(Debug, Default)]
struct Received {
    recipients: Vec<String>,
    data: Vec<String>,
}

/// A minimal SMTP server. Recipients at `rejected.test` get a 550,
/// recipients at `busy.test` a 451 and messages for `spam.test` are refused
/// with a 554 after DATA. Everything else is accepted.
async fn fake_relay() -> (u16, Arc<Mutex<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received = Arc::new(Mutex::new(Received::default()));

    let shared = Arc::clone(&received);
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(converse(socket, Arc::clone(&shared)));
        }
    });

    (port, received)
}

async fn converse(socket: TcpStream, received: Arc<Mutex<Received>>) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut recipient = None;
    let mut refuse_data = false;

    writer.write_all(b"220 fake.test ESMTP\r\n").await.unwrap();

    while let Ok(Some(line)) = lines.next_line().await {
        let verb = line.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
        let reply: &[u8] = match verb.as_str() {
            "EHLO" | "HELO" => b"250 fake.test\r\n",
            "RCPT" if line.contains("rejected.test") => b"550 5.1.1 No such user\r\n",
            "RCPT" if line.contains("busy.test") => b"451 4.3.0 Try again later\r\n",
            "RCPT" => {
                refuse_data = line.contains("spam.test");
                recipient = line
                    .split_once('<')
                    .and_then(|(_, rest)| rest.split_once('>'))
                    .map(|(address, _)| address.to_string());
                b"250 2.1.5 Ok\r\n"
            }
            "DATA" => {
                writer.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await.unwrap();
                let mut data = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line == "." {
                        break;
                    }
                    data.push_str(&line);
                    data.push('\n');
                }
                if refuse_data {
                    writer.write_all(b"554 5.7.1 Message refused\r\n").await.unwrap();
                    continue;
                }
                let mut received = received.lock().unwrap();
                received.recipients.extend(recipient.take());
                received.data.push(data);
                b"250 2.0.0 Queued\r\n"
            }
            "QUIT" => {
                let _ = writer.write_all(b"221 2.0.0 Bye\r\n").await;
                return;
            }
            _ => b"250 Ok\r\n",
        };

        if writer.write_all(reply).await.is_err() {
            return;
        }
    }
}

fn settings(port: u16) -> SmtpSettings {
    SmtpSettings {
        host: String::from("127.0.0.1"),
        port,
        user: String::new(),
        password: Secret::default(),
        sender: String::from("me@gmail.com"),
        security: RelaySecurity::Plain,
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn test_relay_accepts_message() {
    let (port, received) = fake_relay().await;
    let connector = SmtpRelayConnector::new(settings(port));

    let mut relay = connector.connect().await.unwrap();
    relay.send("me@gmail.com", "abc@foo.com", MESSAGE).await.unwrap();
    relay.disconnect().await.unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.recipients, ["abc@foo.com"]);
    assert!(received.data[0].contains("Sender: me@gmail.com"));
    assert!(received.data[0].contains("body"));
}

#[tokio::test]
async fn test_rejected_recipient_is_permanent() {
    let (port, received) = fake_relay().await;
    let mut relay = SmtpRelayConnector::new(settings(port)).connect().await.unwrap();

    let error = relay
        .send("me@gmail.com", "nobody@rejected.test", MESSAGE)
        .await
        .unwrap_err();

    assert!(
        matches!(
            error,
            DeliveryError::Permanent(PermanentError::InvalidRecipient(_))
        ),
        "{error}"
    );
    assert!(received.lock().unwrap().recipients.is_empty());
}

#[tokio::test]
async fn test_refused_content_is_a_rejected_message() {
    let (port, received) = fake_relay().await;
    let mut relay = SmtpRelayConnector::new(settings(port)).connect().await.unwrap();

    let error = relay
        .send("me@gmail.com", "filter@spam.test", MESSAGE)
        .await
        .unwrap_err();

    assert!(
        matches!(
            error,
            DeliveryError::Permanent(PermanentError::MessageRejected(_))
        ),
        "{error}"
    );
    assert!(received.lock().unwrap().data.is_empty());
}

#[tokio::test]
async fn test_deferred_recipient_is_temporary() {
    let (port, _received) = fake_relay().await;
    let mut relay = SmtpRelayConnector::new(settings(port)).connect().await.unwrap();

    let error = relay
        .send("me@gmail.com", "later@busy.test", MESSAGE)
        .await
        .unwrap_err();

    assert!(matches!(error, DeliveryError::Temporary(_)), "{error}");
}

#[tokio::test]
async fn test_unreachable_relay_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = SmtpRelayConnector::new(settings(port)).connect().await;

    assert!(matches!(result, Err(ConnectionError::Relay(_))));
}
