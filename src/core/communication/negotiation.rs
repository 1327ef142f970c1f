//! The Hello/HandShake exchange that establishes a tunnel's fuzz chain
//! (§4.5 of spec.md). Runs once, before any REQUEST/REPLY/RELAYING/CLOSE
//! frame is exchanged, and entirely under the outer cipher.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::crypto::fuzz::{codec, symmetric};
use crate::core::crypto::{FuzzChain, OuterCipher};
use crate::core::error::{Error, ErrorKind, Result};

use super::framing::{encode, EType};
use super::message::{Frame, HandshakeChain};

/// Maximum acceptable clock skew, in seconds, between the server's HELLO
/// timestamp and the one echoed back in the client's HANDSHAKE.
const MAX_HANDSHAKE_DELAY_SECS: u64 = 100;

/// The full set of transforms a client offers, each with a freshly
/// generated random key. Order matters only in that it becomes the
/// server's selection pool; it is not the order the selected chain will
/// run in (that's whatever order the server keeps from this list).
fn offerable_transforms() -> Vec<Box<dyn crate::core::crypto::fuzz::Transform>> {
    vec![
        Box::new(symmetric::Xor::random()),
        Box::new(symmetric::RailFence::random()),
        Box::new(symmetric::AtBash),
        Box::new(codec::Base64),
        Box::new(codec::Base32),
        Box::new(codec::Base16),
        Box::new(codec::Base85),
        Box::new(codec::XxEncode),
        Box::new(codec::UuEncode),
    ]
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

async fn write_frame_encrypted<W: AsyncWrite + Unpin>(
    w: &mut W,
    frame: &Frame,
    cipher: &OuterCipher,
) -> Result<()> {
    let body = cipher.encrypt(&frame.serialize());
    let wire = encode(EType::Outer, &body);
    w.write_all(&wire).await.map_err(Error::from)
}

async fn read_frame_encrypted<R: AsyncRead + Unpin>(
    r: &mut R,
    cipher: &OuterCipher,
) -> Result<Frame> {
    let mut header = [0u8; 6];
    r.read_exact(&mut header).await.map_err(Error::from)?;
    let etype = u16::from_be_bytes([header[0], header[1]]);
    if etype != EType::Outer as u16 {
        return Err(protocol_error("expected outer-cipher frame during negotiation"));
    }
    let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    let mut body = vec![0u8; length];
    r.read_exact(&mut body).await.map_err(Error::from)?;
    let plain = cipher.decrypt(&body)?;
    Frame::deserialize(&plain)
}

fn protocol_error(msg: &str) -> Error {
    Error::wrapped(ErrorKind::Protocol, msg.to_owned())
}

fn unexpected_frame(what: &str) -> Error {
    protocol_error(&format!("unexpected frame during negotiation: expected {}", what))
}

/// Runs the client side of negotiation (client is the one who speaks
/// first) and returns the fuzz chain both sides install for the rest of
/// the tunnel's life.
pub async fn client_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    password: &str,
) -> Result<FuzzChain> {
    let cipher = OuterCipher::new(password);

    write_frame_encrypted(
        stream,
        &Frame::Hello {
            timestamp: now_secs(),
        },
        &cipher,
    )
    .await?;

    let server_hello = read_frame_encrypted(stream, &cipher).await?;
    let server_timestamp = match server_hello {
        Frame::Hello { timestamp } => timestamp,
        _ => return Err(unexpected_frame("HELLO")),
    };

    let offered = FuzzChain::new(offerable_transforms());
    write_frame_encrypted(
        stream,
        &Frame::Handshake {
            timestamp: server_timestamp,
            chain: HandshakeChain::from_chain(&offered),
        },
        &cipher,
    )
    .await?;

    let reply = read_frame_encrypted(stream, &cipher).await?;
    match reply {
        Frame::Handshake { chain, .. } => chain.into_chain(),
        _ => Err(unexpected_frame("HANDSHAKE")),
    }
}

/// Runs the server side of negotiation. `select` picks the subset of the
/// client's offered chain to install; the default policy (§4.5) keeps
/// the first two entries.
pub async fn server_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    password: &str,
) -> Result<FuzzChain> {
    server_handshake_with_policy(stream, password, |offered| offered.select_prefix(2)).await
}

pub async fn server_handshake_with_policy<S, F>(
    stream: &mut S,
    password: &str,
    select: F,
) -> Result<FuzzChain>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(FuzzChain) -> FuzzChain,
{
    let cipher = OuterCipher::new(password);

    let client_hello = read_frame_encrypted(stream, &cipher).await?;
    match client_hello {
        Frame::Hello { .. } => {}
        _ => return Err(unexpected_frame("HELLO")),
    };

    let server_timestamp = now_secs();
    write_frame_encrypted(
        stream,
        &Frame::Hello {
            timestamp: server_timestamp,
        },
        &cipher,
    )
    .await?;

    let client_handshake = read_frame_encrypted(stream, &cipher).await?;
    let (received_timestamp, offered_chain) = match client_handshake {
        Frame::Handshake { timestamp, chain } => (timestamp, chain.into_chain()?),
        _ => return Err(unexpected_frame("HANDSHAKE")),
    };

    let delay = received_timestamp
        .checked_sub(server_timestamp)
        .ok_or_else(|| protocol_error("handshake timestamp precedes server's HELLO"))?;
    if delay > MAX_HANDSHAKE_DELAY_SECS {
        return Err(protocol_error("handshake timestamp outside acceptable window"));
    }

    let selected = select(offered_chain);
    if selected.is_empty() {
        return Err(protocol_error("empty fuzz chain selection"));
    }

    write_frame_encrypted(
        stream,
        &Frame::Handshake {
            timestamp: server_timestamp,
            chain: HandshakeChain::from_chain(&selected),
        },
        &cipher,
    )
    .await?;

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_and_server_agree_on_the_same_chain() {
        let (mut client_side, mut server_side) = duplex(64 * 1024);

        let client = tokio::spawn(async move {
            client_handshake(&mut client_side, "correct horse battery staple").await
        });
        let server = tokio::spawn(async move {
            server_handshake(&mut server_side, "correct horse battery staple").await
        });

        let (client_chain, server_chain) = tokio::join!(client, server);
        let client_chain = client_chain.unwrap().expect("client handshake");
        let server_chain = server_chain.unwrap().expect("server handshake");

        assert_eq!(client_chain.len(), 2);
        assert_eq!(server_chain.len(), 2);

        let data = b"after the handshake, both sides encrypt the same way";
        assert_eq!(client_chain.encrypt(data), server_chain.encrypt(data));
    }

    #[tokio::test]
    async fn mismatched_passwords_fail_the_handshake() {
        let (mut client_side, mut server_side) = duplex(64 * 1024);

        let client =
            tokio::spawn(async move { client_handshake(&mut client_side, "pw-a").await });
        let server =
            tokio::spawn(async move { server_handshake(&mut server_side, "pw-b").await });

        let (client_res, server_res) = tokio::join!(client, server);
        assert!(client_res.unwrap().is_err() || server_res.unwrap().is_err());
    }
}
