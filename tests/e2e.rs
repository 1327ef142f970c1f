//! End-to-end scenarios from spec.md §8: a real client process and a
//! real server process, talking over loopback TCP, relaying an ordinary
//! SOCKS5 user agent's bytes to and from a real target socket.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use fsocks::core::client;
use fsocks::core::communication::socks::{Address, ClientGreeting, Message, Reply, ServerGreeting};
use fsocks::core::crypto::fuzz::{codec, symmetric};
use fsocks::core::crypto::FuzzChain;
use fsocks::core::communication::Frame;
use fsocks::core::server;
use fsocks::Config;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local_addr")
        .port()
}

/// A bare TCP echo service, standing in for an arbitrary target the
/// server demultiplexer CONNECTs out to.
async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo listener");
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    if socket.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    port
}

async fn connect_with_retry(addr: &str) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("could not connect to {addr}");
}

/// Drives an unmodified SOCKS5 CONNECT through the full client → tunnel
/// → server → target path, relays ten round-trip chunks, and confirms
/// the half-close propagates — spec.md §8 scenario 6.
#[tokio::test]
async fn connect_relay_and_close_round_trip_through_the_tunnel() {
    let echo_port = spawn_echo_server().await;

    let tunnel_port = free_port();
    let socks_port = free_port();
    let password = "integration test password";

    let server_cfg = Config {
        client_host: "127.0.0.1".into(),
        client_port: 0,
        server_host: "127.0.0.1".into(),
        server_port: tunnel_port,
        password: password.into(),
        timeout_seconds: 6,
    };
    tokio::spawn(server::run(server_cfg));

    let client_cfg = Config {
        client_host: "127.0.0.1".into(),
        client_port: socks_port,
        server_host: "127.0.0.1".into(),
        server_port: tunnel_port,
        password: password.into(),
        timeout_seconds: 6,
    };
    tokio::spawn(client::run(client_cfg));

    let mut user = connect_with_retry(&format!("127.0.0.1:{socks_port}")).await;

    let greeting = ClientGreeting {
        methods: vec![0x00],
    };
    user.write_all(&greeting.serialize()).await.unwrap();
    let mut greeting_reply = [0u8; 2];
    user.read_exact(&mut greeting_reply).await.unwrap();
    assert_eq!(greeting_reply, ServerGreeting::no_auth().serialize());

    let request = Message::request(Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)), echo_port);
    user.write_all(&request.serialize()).await.unwrap();

    let reply = Message::read_from(&mut user).await.unwrap();
    assert_eq!(reply.reply_code(), Some(Reply::Succeeded));

    for i in 0..10u8 {
        let payload = vec![i; 37];
        user.write_all(&payload).await.unwrap();
        let mut echoed = vec![0u8; payload.len()];
        user.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, payload);
    }

    // half-close: the user agent's EOF should propagate as CLOSE(user_id)
    // to the server, which tears down the target connection. Nothing on
    // this end can observe that directly, but the tunnel must stay alive
    // for a second, unrelated session, which we confirm below.
    drop(user);

    let mut second_user = connect_with_retry(&format!("127.0.0.1:{socks_port}")).await;
    second_user.write_all(&greeting.serialize()).await.unwrap();
    let mut second_greeting_reply = [0u8; 2];
    second_user.read_exact(&mut second_greeting_reply).await.unwrap();
    assert_eq!(second_greeting_reply, ServerGreeting::no_auth().serialize());

    let request = Message::request(Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)), echo_port);
    second_user.write_all(&request.serialize()).await.unwrap();
    let reply = Message::read_from(&mut second_user).await.unwrap();
    assert_eq!(reply.reply_code(), Some(Reply::Succeeded));

    second_user.write_all(b"still alive").await.unwrap();
    let mut echoed = vec![0u8; b"still alive".len()];
    second_user.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"still alive");
}

/// A CONNECT to a target that refuses the connection gets a
/// NETWORK_UNREACHABLE reply and no channel is kept open (§4.7).
#[tokio::test]
async fn connect_to_a_closed_port_reports_network_unreachable() {
    // bind-then-drop to get a port nothing is listening on.
    let dead_port = free_port();

    let tunnel_port = free_port();
    let socks_port = free_port();
    let password = "another test password";

    let server_cfg = Config {
        client_host: "127.0.0.1".into(),
        client_port: 0,
        server_host: "127.0.0.1".into(),
        server_port: tunnel_port,
        password: password.into(),
        timeout_seconds: 6,
    };
    tokio::spawn(server::run(server_cfg));

    let client_cfg = Config {
        client_host: "127.0.0.1".into(),
        client_port: socks_port,
        server_host: "127.0.0.1".into(),
        server_port: tunnel_port,
        password: password.into(),
        timeout_seconds: 6,
    };
    tokio::spawn(client::run(client_cfg));

    let mut user = connect_with_retry(&format!("127.0.0.1:{socks_port}")).await;
    user.write_all(&ClientGreeting { methods: vec![0x00] }.serialize())
        .await
        .unwrap();
    let mut greeting_reply = [0u8; 2];
    user.read_exact(&mut greeting_reply).await.unwrap();

    let request = Message::request(Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)), dead_port);
    user.write_all(&request.serialize()).await.unwrap();

    let reply = Message::read_from(&mut user).await.unwrap();
    assert_eq!(reply.reply_code(), Some(Reply::NetworkUnreachable));
}

/// spec.md §8 scenario 5: a negotiated `[XOR(0x91), Base64]` chain
/// round-trips a RELAYING frame exactly, independent of any socket I/O.
#[test]
fn negotiated_xor_base64_chain_roundtrips_a_relaying_frame() {
    let chain = FuzzChain::new(vec![
        Box::new(symmetric::Xor::new(0x91)),
        Box::new(codec::Base64),
    ]);

    let frame = Frame::Relaying {
        src: 3,
        dst: 5,
        payload: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
    };

    let encoded = chain.encrypt(&frame.serialize());
    let decoded = chain.decrypt(&encoded).expect("chain decrypt");
    let parsed = Frame::deserialize(&decoded).expect("frame deserialize");

    match parsed {
        Frame::Relaying { src, dst, payload } => {
            assert_eq!((src, dst), (3, 5));
            assert_eq!(payload, b"GET / HTTP/1.1\r\n\r\n");
        }
        other => panic!("wrong variant: {other:?}"),
    }
}
