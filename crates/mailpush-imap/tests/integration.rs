//! Integration tests for the IMAP client.
//!
//! A scripted server on a loopback socket plays the server side of a full
//! login, select, idle and fetch cycle.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use mailpush_imap::connection::connect;
use mailpush_imap::{Client, Config, Push, Response, STOP_WAIT_SERVER_PUSH, Security, SeqNum};

const HEADER: &[u8] = b"Subject: hello\r\nFrom: YAMB <mail@test.adp>\r\n\r\n";

/// Serves one connection, answering commands in order and recording them.
async fn scripted_server(listener: TcpListener) -> Vec<String> {
    let (socket, _) = listener.accept().await.unwrap();
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut seen = Vec::new();

    write.write_all(b"* OK [CAPABILITY IMAP4rev1 IDLE] ready\r\n").await.unwrap();

    while let Some(line) = lines.next_line().await.unwrap() {
        seen.push(line.clone());
        let (tag, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match rest.split(' ').next().unwrap_or_default() {
            "LOGIN" => write.write_all(format!("{tag} OK logged in\r\n").as_bytes()).await.unwrap(),
            "SELECT" => {
                write.write_all(b"* 3084 EXISTS\r\n").await.unwrap();
                write.write_all(format!("{tag} OK [READ-WRITE] done\r\n").as_bytes()).await.unwrap();
            }
            "IDLE" => {
                write.write_all(b"+ idling\r\n* 3085 EXISTS\r\n").await.unwrap();
            }
            "FETCH" => {
                let literal = format!("* 3085 FETCH (BODY[HEADER] {{{}}}\r\n", HEADER.len());
                write.write_all(literal.as_bytes()).await.unwrap();
                write.write_all(HEADER).await.unwrap();
                write.write_all(b")\r\n").await.unwrap();
                write.write_all(format!("{tag} OK FETCH done\r\n").as_bytes()).await.unwrap();
            }
            "LOGOUT" => {
                write.write_all(b"* BYE logging out\r\n").await.unwrap();
                write.write_all(format!("{tag} OK bye\r\n").as_bytes()).await.unwrap();
                break;
            }
            _ if line == "DONE" => {
                write.write_all(b"A0002 OK IDLE terminated\r\n").await.unwrap();
            }
            _ => write.write_all(format!("{tag} BAD unknown\r\n").as_bytes()).await.unwrap(),
        }
    }

    seen
}

#[tokio::test]
async fn test_full_push_cycle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(scripted_server(listener));

    let config = Config::new("127.0.0.1")
        .security(Security::Plaintext)
        .port(port);
    let stream = connect(&config).await.unwrap();
    let client = Client::from_stream(stream).await.unwrap();
    assert!(client.supports_idle());

    let client = client.login("email@none.bot", "secret").await.unwrap();
    let mut client = client.select("INBOX").await.unwrap();
    assert_eq!(client.mailbox(), "INBOX");

    let mut idle = client.idle(Duration::from_secs(60)).await.unwrap();
    let push = idle.wait().await.unwrap();
    let late = idle.done().await.unwrap();
    assert!(late.is_empty());

    let Push::SizeChanged(seq) = push else {
        panic!("expected a size change, got {push:?}");
    };
    assert_eq!(seq, SeqNum::new(3085).unwrap());

    let header = client.fetch_header(seq).await.unwrap().unwrap();
    assert_eq!(header, HEADER);

    client.logout().await.unwrap();

    let seen = server.await.unwrap();
    let done = seen.iter().position(|l| l == "DONE").unwrap();
    let fetch = seen.iter().position(|l| l.contains("FETCH")).unwrap();
    assert!(done < fetch, "DONE must precede FETCH: {seen:?}");
}

#[test]
fn test_sentinel_marker_classification() {
    assert_eq!(Push::classify(STOP_WAIT_SERVER_PUSH.as_bytes()), Push::Sentinel);
    assert!(matches!(
        Response::parse(b"* 3085 EXISTS\r\n").unwrap(),
        Response::Untagged(mailpush_imap::Untagged::Exists(3085))
    ));
}
