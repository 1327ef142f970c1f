//! Shared plumbing for the post-handshake half of a tunnel: a single
//! writer task serializes concurrent sends from many channel pumps, and
//! a small reader helper decodes fuzz-chain-wrapped wire frames back
//! into [`Frame`]s.
//!
//! Negotiation itself (the pre-handshake, outer-cipher-wrapped half)
//! lives in [`super::communication::negotiation`] — by the time a
//! [`TunnelSender`] exists, the fuzz chain is already installed.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use tracing::warn;

use crate::core::crypto::FuzzChain;
use crate::core::error::{Error, ErrorKind, Result};

use super::communication::framing::{encode, EType, Reassembler};
use super::communication::message::Frame;

/// A cheap, cloneable handle used by every channel pump to push frames
/// onto the tunnel's single write half without interleaving partial
/// writes from different tasks.
#[derive(Clone)]
pub struct TunnelSender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl TunnelSender {
    pub fn send(&self, frame: &Frame, fuzz: &FuzzChain) -> Result<()> {
        let body = fuzz.encrypt(&frame.serialize());
        let wire = encode(EType::Fuzzed, &body);
        self.tx
            .send(wire)
            .map_err(|_| Error::simple(ErrorKind::Network))
    }
}

/// Spawns the task that owns the tunnel's write half, and returns a
/// handle other tasks can clone to queue frames onto it.
pub fn spawn_writer<W>(mut write_half: W) -> TunnelSender
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        while let Some(wire) = rx.recv().await {
            if write_half.write_all(&wire).await.is_err() {
                break;
            }
        }
    });
    TunnelSender { tx }
}

/// Reads one socket-level chunk and returns every [`Frame`] it completed
/// (zero or more). Returns `Err` when the tunnel's read half hits EOF or
/// a post-handshake frame arrives still wrapped in the outer cipher
/// (which would mean the peer never finished negotiating).
pub async fn read_frames<R>(
    read_half: &mut R,
    reassembler: &mut Reassembler,
    fuzz: &FuzzChain,
) -> Result<Vec<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    let n = read_half.read(&mut buf).await?;
    if n == 0 {
        return Err(Error::simple(ErrorKind::Network));
    }

    let wires = reassembler.push(&buf[..n])?;
    let mut frames = Vec::with_capacity(wires.len());
    for wire in wires {
        match wire.etype {
            EType::Fuzzed => {
                // §4.8: a fuzz-chain decrypt failure drops only the
                // offending frame; it must not cascade into tearing down
                // the whole tunnel the way a framing/protocol error does.
                let plain = match fuzz.decrypt(&wire.body) {
                    Ok(plain) => plain,
                    Err(e) if e.kind() == ErrorKind::Fuzz => {
                        warn!(error = %e, "dropping frame: fuzz chain could not decode it");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                frames.push(Frame::deserialize(&plain)?);
            }
            EType::Outer => return Err(Error::simple(ErrorKind::Protocol)),
        }
    }
    Ok(frames)
}
