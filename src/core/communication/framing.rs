//! The outer wire frame (`etype:u16, length:u32, body`) and the
//! incremental reassembly state machine that recovers frame boundaries
//! from arbitrary-sized, possibly-coalesced TCP reads (§4.3 of spec.md).

use crate::core::error::{Error, ErrorKind, Result};

/// `etype` discriminates which cipher layer a frame's body is wrapped
/// in: the outer cipher before a tunnel finishes negotiating, the fuzz
/// chain after.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EType {
    Outer,
    Fuzzed,
}

impl EType {
    fn to_u16(self) -> u16 {
        match self {
            EType::Outer => 0,
            EType::Fuzzed => 1,
        }
    }

    fn from_u16(v: u16) -> Result<Self> {
        match v {
            0 => Ok(EType::Outer),
            1 => Ok(EType::Fuzzed),
            _ => Err(Error::wrapped(
                ErrorKind::Protocol,
                format!("unknown etype {}", v),
            )),
        }
    }
}

/// A complete wire frame, header parsed out but body still ciphertext.
#[derive(Debug, Clone)]
pub struct WireFrame {
    pub etype: EType,
    pub body: Vec<u8>,
}

/// Wraps `body` (already the outer-cipher or fuzz-chain output of an
/// inner frame) in the `etype:u16, length:u32` header.
pub fn encode(etype: EType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + body.len());
    out.extend_from_slice(&etype.to_u16().to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

const HEADER_LEN: usize = 6;

/// Drives the reassembly state machine described in §4.3: accepts
/// arbitrarily-sized chunks from a TCP stream (may split a frame across
/// many reads, or coalesce several frames into one) and yields complete
/// [`WireFrame`]s as they become available.
///
/// Internally this just accumulates every unconsumed byte in `buf` and
/// peels a frame off the front whenever `buf` holds a full header plus
/// `length` more bytes — the three cases §4.3 spells out (`need = 0`,
/// `need > 0`, `need < 0`) fall out of looping that check rather than
/// needing to be handled as distinct branches.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler::default()
    }

    /// Feeds one chunk of bytes read from the socket, returning every
    /// frame the chunk completed (zero, one, or many, in order).
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<WireFrame>> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }
            let length = u32::from_be_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]])
                as usize;
            let total = HEADER_LEN + length;
            if self.buf.len() < total {
                break;
            }
            let rest = self.buf.split_off(total);
            let complete = std::mem::replace(&mut self.buf, rest);
            frames.push(parse_complete_frame(&complete)?);
        }
        Ok(frames)
    }
}

fn parse_complete_frame(data: &[u8]) -> Result<WireFrame> {
    let etype = EType::from_u16(u16::from_be_bytes([data[0], data[1]]))?;
    Ok(WireFrame {
        etype,
        body: data[HEADER_LEN..].to_vec(),
    })
}
