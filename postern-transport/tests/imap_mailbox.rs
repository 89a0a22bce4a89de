use std::sync::{Arc, Mutex};

use postern_common::Secret;
use postern_delivery::{MailboxError, MessageId, transport::Mailbox};
use postern_transport::{ImapMailbox, ImapSettings};
use pretty_assertions::assert_eq;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

const MESSAGE: &[u8] = b"From: x@yahoo.com\r\nTo: old@dest.com\r\nSubject: hi\r\n\r\nbody\r\n";

/// Commands the fake server received, without their tags.
type Commands = Arc<Mutex<Vec<String>>>;

/// A single-connection IMAP server over plain TCP. The selected folder
/// holds UIDs 7 and 9, but only 7 has content; a fetch of anything else
/// completes without data.
async fn fake_server(accept_login: bool) -> (TcpStream, Commands) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let commands = Commands::default();

    let seen = Arc::clone(&commands);
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        converse(socket, accept_login, seen).await;
    });

    (TcpStream::connect(address).await.unwrap(), commands)
}

async fn converse(socket: TcpStream, accept_login: bool, commands: Commands) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer
        .write_all(b"* OK [CAPABILITY IMAP4rev1] fake.test ready\r\n")
        .await
        .unwrap();

    while let Ok(Some(line)) = lines.next_line().await {
        let Some((tag, command)) = line.split_once(' ') else {
            continue;
        };
        commands.lock().unwrap().push(command.to_string());

        let upper = command.to_ascii_uppercase();
        let mut reply = Vec::new();
        if upper.starts_with("LOGIN") && !accept_login {
            reply.extend_from_slice(
                format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n").as_bytes(),
            );
        } else if upper.starts_with("SELECT") {
            reply.extend_from_slice(
                b"* FLAGS (\\Deleted \\Seen)\r\n* 2 EXISTS\r\n* 0 RECENT\r\n* OK [UIDVALIDITY 1] UIDs valid\r\n",
            );
            reply.extend_from_slice(format!("{tag} OK [READ-WRITE] SELECT completed\r\n").as_bytes());
        } else if upper.starts_with("UID SEARCH") {
            reply.extend_from_slice(b"* SEARCH 7 9\r\n");
            reply.extend_from_slice(format!("{tag} OK SEARCH completed\r\n").as_bytes());
        } else if upper.starts_with("UID FETCH 7 ") {
            reply.extend_from_slice(
                format!("* 1 FETCH (UID 7 BODY[] {{{}}}\r\n", MESSAGE.len()).as_bytes(),
            );
            reply.extend_from_slice(MESSAGE);
            reply.extend_from_slice(b")\r\n");
            reply.extend_from_slice(format!("{tag} OK FETCH completed\r\n").as_bytes());
        } else if upper.starts_with("UID STORE") {
            reply.extend_from_slice(b"* 1 FETCH (UID 7 FLAGS (\\Deleted))\r\n");
            reply.extend_from_slice(format!("{tag} OK STORE completed\r\n").as_bytes());
        } else if upper.starts_with("EXPUNGE") {
            reply.extend_from_slice(b"* 1 EXPUNGE\r\n");
            reply.extend_from_slice(format!("{tag} OK EXPUNGE completed\r\n").as_bytes());
        } else if upper.starts_with("LOGOUT") {
            reply.extend_from_slice(b"* BYE fake.test closing\r\n");
            reply.extend_from_slice(format!("{tag} OK LOGOUT completed\r\n").as_bytes());
            let _ = writer.write_all(&reply).await;
            return;
        } else {
            reply.extend_from_slice(format!("{tag} OK completed\r\n").as_bytes());
        }

        if writer.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn settings() -> ImapSettings {
    ImapSettings {
        host: String::from("127.0.0.1"),
        port: 0,
        user: String::from("me@yahoo.com"),
        password: Secret::from("app-password"),
        folder: String::from("INBOX"),
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn test_session_commands() {
    let (stream, commands) = fake_server(true).await;
    let mut mailbox = ImapMailbox::login(stream, &settings()).await.unwrap();

    let mut ids = mailbox.list_message_ids().await.unwrap();
    ids.sort_by_key(|id| id.as_str().parse::<u32>().unwrap());
    assert_eq!(ids, [MessageId::from(7), MessageId::from(9)]);

    let content = mailbox.fetch_raw(&MessageId::from(7)).await.unwrap();
    assert_eq!(content, MESSAGE);

    mailbox.mark_deleted(&MessageId::from(7)).await.unwrap();
    mailbox.expunge().await.unwrap();
    Box::new(mailbox).disconnect().await.unwrap();

    let commands = commands.lock().unwrap().clone();
    assert_eq!(commands.len(), 7, "{commands:?}");
    assert!(commands[0].starts_with("LOGIN"), "{commands:?}");
    assert!(commands[0].contains("me@yahoo.com"), "{commands:?}");
    assert!(commands[1].starts_with("SELECT"), "{commands:?}");
    assert!(commands[1].contains("INBOX"), "{commands:?}");
    assert_eq!(
        commands[2..].to_vec(),
        [
            "UID SEARCH ALL",
            "UID FETCH 7 BODY.PEEK[]",
            "UID STORE 7 +FLAGS (\\Deleted)",
            "EXPUNGE",
            "LOGOUT",
        ]
    );
}

#[tokio::test]
async fn test_fetch_of_missing_message() {
    let (stream, commands) = fake_server(true).await;
    let mut mailbox = ImapMailbox::login(stream, &settings()).await.unwrap();

    let error = mailbox.fetch_raw(&MessageId::from(9)).await.unwrap_err();

    assert!(
        matches!(
            error,
            MailboxError::Fetch { ref id, ref reason }
                if *id == MessageId::from(9) && reason == "no such message"
        ),
        "{error}"
    );
    assert!(
        commands
            .lock()
            .unwrap()
            .contains(&String::from("UID FETCH 9 BODY.PEEK[]"))
    );
}

#[tokio::test]
async fn test_rejected_login() {
    let (stream, commands) = fake_server(false).await;

    let error = ImapMailbox::login(stream, &settings()).await.unwrap_err();

    assert!(error.contains("Login as me@yahoo.com failed"), "{error}");
    // No folder is selected after a refused login
    assert_eq!(commands.lock().unwrap().len(), 1);
}
