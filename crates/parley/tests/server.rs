//! End-to-end tests: a real server on loopback, driven by bare TCP and UDP
//! clients that speak the wire formats by hand.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parley::{DatagramConfig, ParleyServer};
use parley_protocol::{Datagram, Message, MessageId, datagram};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

struct Addrs {
    stream: SocketAddr,
    datagram: SocketAddr,
}

async fn start(config: DatagramConfig) -> Addrs {
    let server = ParleyServer::builder()
        .bind("127.0.0.1")
        .port(0)
        .datagram(config)
        .build()
        .await
        .expect("server binds");
    let addrs = Addrs {
        stream: server.stream_addr().unwrap(),
        datagram: server.datagram_addr().unwrap(),
    };
    tokio::spawn(server.run());
    addrs
}

fn fast() -> DatagramConfig {
    DatagramConfig {
        timeout: Duration::from_millis(100),
        max_retries: 3,
    }
}

// ---------------------------------------------------------------------------
// Stream client
// ---------------------------------------------------------------------------

struct LineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write line");
    }

    /// Next line, terminator included.
    async fn line(&mut self) -> String {
        let mut line = String::new();
        timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for line")
            .expect("read line");
        line
    }

    async fn auth(&mut self, username: &str, display_name: &str) {
        self.send(&format!("AUTH {username} AS {display_name} USING secret"))
            .await;
        assert_eq!(self.line().await, "REPLY OK IS Welcome to the server\r\n");
    }
}

// ---------------------------------------------------------------------------
// Datagram client
// ---------------------------------------------------------------------------

struct DatagramClient {
    socket: UdpSocket,
    server: SocketAddr,
    next_id: MessageId,
}

impl DatagramClient {
    async fn open(server: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("client bind");
        Self {
            socket,
            server,
            next_id: 0,
        }
    }

    async fn send(&mut self, message: Message) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        self.send_frame(&Datagram::payload(id, message)).await;
        id
    }

    async fn send_frame(&self, frame: &Datagram) {
        let bytes = datagram::encode(frame).expect("valid frame");
        self.socket
            .send_to(&bytes, self.server)
            .await
            .expect("client send");
    }

    async fn frame(&self) -> (Datagram, SocketAddr) {
        let mut buf = [0u8; 2048];
        let (len, from) = timeout(WAIT, self.socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for datagram")
            .expect("client recv");
        (datagram::decode(&buf[..len]).expect("valid datagram"), from)
    }

    /// Next application message, confirmed back to whichever socket sent
    /// it. That socket becomes the destination for everything after.
    async fn next(&mut self) -> Message {
        loop {
            match self.frame().await {
                (Datagram::Confirm { .. }, _) => continue,
                (Datagram::Payload { id, message, .. }, from) => {
                    self.server = from;
                    self.send_frame(&Datagram::Confirm { ref_id: id }).await;
                    return message;
                }
            }
        }
    }

    async fn auth(&mut self, username: &str, display_name: &str) -> Message {
        self.send(Message::Auth {
            username: username.into(),
            display_name: display_name.into(),
            secret: "x".into(),
        })
        .await;
        self.next().await
    }
}

fn chat(display_name: &str, content: &str) -> Message {
    Message::Chat {
        display_name: display_name.into(),
        content: content.into(),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_second_datagram_client_cannot_take_username() {
    let addrs = start(fast()).await;

    let mut alice = DatagramClient::open(addrs.datagram).await;
    assert_eq!(
        alice.auth("alice", "Alice").await,
        Message::reply(true, "Welcome to the server")
    );
    assert_ne!(alice.server, addrs.datagram, "reply comes from a dedicated socket");
    assert_eq!(alice.next().await, Message::notice("Alice has joined general"));

    let mut impostor = DatagramClient::open(addrs.datagram).await;
    assert_eq!(
        impostor.auth("alice", "Eve").await,
        Message::reply(false, "Invalid auth attempt")
    );
    assert_eq!(impostor.server, addrs.datagram, "no migration on a rejected auth");

    // Still in Auth, so another name works.
    assert_eq!(
        impostor.auth("eve", "Eve").await,
        Message::reply(true, "Welcome to the server")
    );
}

#[tokio::test]
async fn test_unresponsive_datagram_peer_is_torn_down() {
    let addrs = start(DatagramConfig::default()).await;

    let mut alice = DatagramClient::open(addrs.datagram).await;
    alice.auth("alice", "Alice").await;
    alice.next().await;

    let mut bob = LineClient::connect(addrs.stream).await;
    bob.send("AUTH bob AS Bob USING secret").await;
    assert_eq!(bob.line().await, "REPLY OK IS Welcome to the server\r\n");
    assert_eq!(alice.next().await, Message::notice("Bob has joined general"));
    assert_eq!(bob.line().await, "MSG FROM Server IS Bob has joined general\r\n");

    // Alice goes silent: the chat is sent once and retransmitted three times.
    let started = Instant::now();
    bob.send("MSG FROM Bob IS ping").await;
    let mut ids = Vec::new();
    while ids.len() < 4 {
        if let (Datagram::Payload { id, message, .. }, _) = alice.frame().await {
            if message == chat("Bob", "ping") {
                ids.push(id);
            }
        }
    }
    assert!(ids.iter().all(|&id| id == ids[0]), "retransmissions reuse the id");

    assert_eq!(bob.line().await, "MSG FROM Server IS Alice has left general\r\n");

    // Four 250 ms waits for a confirm that never comes.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1000), "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2000), "gave up after {elapsed:?}");
}

#[tokio::test]
async fn test_stream_join_announces_to_channel() {
    let addrs = start(fast()).await;

    let mut carol = LineClient::connect(addrs.stream).await;
    carol.auth("carol", "Carol").await;
    assert_eq!(carol.line().await, "MSG FROM Server IS Carol has joined general\r\n");

    let mut bob = LineClient::connect(addrs.stream).await;
    bob.auth("bob", "Bob").await;
    assert_eq!(bob.line().await, "MSG FROM Server IS Bob has joined general\r\n");
    assert_eq!(carol.line().await, "MSG FROM Server IS Bob has joined general\r\n");

    bob.send("JOIN general AS Bob").await;
    assert_eq!(bob.line().await, "REPLY OK IS Welcome to the channel\r\n");
    assert_eq!(bob.line().await, "MSG FROM Server IS Bob has joined general\r\n");

    assert_eq!(carol.line().await, "MSG FROM Server IS Bob has left general\r\n");
    assert_eq!(carol.line().await, "MSG FROM Server IS Bob has joined general\r\n");
}

#[tokio::test]
async fn test_unknown_stream_line_gets_error_then_bye() {
    let addrs = start(fast()).await;

    let mut client = LineClient::connect(addrs.stream).await;
    client.send("FOO BAR").await;

    let mut rest = String::new();
    timeout(WAIT, client.reader.read_to_string(&mut rest))
        .await
        .expect("server closes the connection")
        .expect("read to end");
    assert_eq!(
        rest,
        "ERR FROM Server IS Unknown message type: FOO BAR\r\nBYE\r\n"
    );
}

#[tokio::test]
async fn test_chat_crosses_transports() {
    let addrs = start(fast()).await;

    let mut alice = DatagramClient::open(addrs.datagram).await;
    alice.auth("alice", "Alice").await;
    alice.next().await;

    let mut bob = LineClient::connect(addrs.stream).await;
    bob.auth("bob", "Bob").await;
    assert_eq!(alice.next().await, Message::notice("Bob has joined general"));
    bob.line().await;

    bob.send("MSG FROM Bob IS hello alice").await;
    assert_eq!(alice.next().await, chat("Bob", "hello alice"));

    alice.send(chat("Alice", "hello bob")).await;
    assert_eq!(bob.line().await, "MSG FROM Alice IS hello bob\r\n");
}

#[tokio::test]
async fn test_duplicate_datagram_delivered_once() {
    let addrs = start(fast()).await;

    let mut alice = DatagramClient::open(addrs.datagram).await;
    alice.auth("alice", "Alice").await;
    alice.next().await;

    let mut bob = LineClient::connect(addrs.stream).await;
    bob.auth("bob", "Bob").await;
    alice.next().await;
    bob.line().await;

    // Same id twice, as if our confirm had been lost.
    let id = alice.send(chat("Alice", "once")).await;
    alice
        .send_frame(&Datagram::payload(id, chat("Alice", "once")))
        .await;
    alice.send(chat("Alice", "twice")).await;

    assert_eq!(bob.line().await, "MSG FROM Alice IS once\r\n");
    assert_eq!(bob.line().await, "MSG FROM Alice IS twice\r\n");
}

#[tokio::test]
async fn test_datagram_bye_ends_session_and_frees_username() {
    let addrs = start(fast()).await;

    let mut alice = DatagramClient::open(addrs.datagram).await;
    alice.auth("alice", "Alice").await;
    alice.next().await;

    let mut bob = LineClient::connect(addrs.stream).await;
    bob.auth("bob", "Bob").await;
    alice.next().await;
    bob.line().await;

    alice.send(Message::Bye).await;
    assert_eq!(bob.line().await, "MSG FROM Server IS Alice has left general\r\n");
    // Deregistration follows the notice.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut again = DatagramClient::open(addrs.datagram).await;
    assert_eq!(
        again.auth("alice", "Alice").await,
        Message::reply(true, "Welcome to the server")
    );
}

#[tokio::test]
async fn test_no_channel_traffic_between_error_and_bye() {
    let addrs = start(DatagramConfig {
        timeout: Duration::from_millis(300),
        max_retries: 5,
    })
    .await;

    let mut alice = DatagramClient::open(addrs.datagram).await;
    alice.auth("alice", "Alice").await;
    alice.next().await;

    let mut bob = LineClient::connect(addrs.stream).await;
    bob.auth("bob", "Bob").await;
    alice.next().await;
    bob.line().await;

    let mut carol = LineClient::connect(addrs.stream).await;
    carol.auth("carol", "Carol").await;
    alice.next().await;
    bob.line().await;
    carol.line().await;

    // A second AUTH once open ends Alice's session.
    alice
        .send(Message::Auth {
            username: "alice".into(),
            display_name: "Alice".into(),
            secret: "x".into(),
        })
        .await;
    let (err_id, from) = loop {
        if let (Datagram::Payload { id, message, .. }, from) = alice.frame().await {
            assert_eq!(message, Message::server_error("No action for AUTH in state open"));
            break (id, from);
        }
    };
    assert_eq!(carol.line().await, "MSG FROM Server IS Alice has left general\r\n");

    // Channel traffic while the ERR is still unconfirmed.
    bob.send("MSG FROM Bob IS late").await;
    assert_eq!(carol.line().await, "MSG FROM Bob IS late\r\n");

    alice.server = from;
    alice.send_frame(&Datagram::Confirm { ref_id: err_id }).await;
    let last = loop {
        match alice.frame().await {
            (Datagram::Payload { id, .. }, _) if id == err_id => continue,
            (Datagram::Payload { message, .. }, _) => break message,
            (Datagram::Confirm { .. }, _) => continue,
        }
    };
    assert_eq!(last, Message::Bye);
}
