//! An ordered sequence of [`Transform`]s applied together, plus the wire
//! format used to describe that sequence to the other end of the tunnel.
//!
//! Wire format, repeated for each transform in the chain and terminated
//! by a zero `name_len`:
//!
//! ```text
//! name_len: u8
//! name:     [u8; name_len]   (only present if name_len > 0)
//! key_len:  u8
//! key:      [u8; key_len]
//! ```

use super::{construct, Result, Transform};
use crate::core::error::{Error, ErrorKind};

pub struct FuzzChain {
    transforms: Vec<Box<dyn Transform>>,
}

impl FuzzChain {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        FuzzChain { transforms }
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Consumes the chain, keeping only its first `n` transforms, in the
    /// same application order. Used by the server side of negotiation to
    /// pick a subset of the client's offered chain (§4.5).
    pub fn select_prefix(mut self, n: usize) -> FuzzChain {
        self.transforms.truncate(n);
        self
    }

    /// Applies every transform in order.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        self.transforms
            .iter()
            .fold(data.to_vec(), |acc, t| t.encrypt(&acc))
    }

    /// Applies every transform's inverse in reverse order.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.transforms
            .iter()
            .rev()
            .try_fold(data.to_vec(), |acc, t| t.decrypt(&acc))
    }

    /// Serializes the chain's name/key records, in application order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for t in &self.transforms {
            let name = t.name().as_bytes();
            let key = t.key();
            out.push(name.len() as u8);
            out.extend_from_slice(name);
            out.push(key.len() as u8);
            out.extend_from_slice(&key);
        }
        out.push(0);
        out
    }

    /// Parses a chain out of a byte slice, returning the chain and the
    /// number of bytes consumed. Empty chains are a protocol error: a
    /// tunnel must negotiate at least one transform (`Plain` if nothing
    /// else) so that the frame codec's output is never ambiguous with
    /// uninterpreted bytes.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize)> {
        let mut pos = 0;
        let mut transforms = Vec::new();

        loop {
            let name_len = *data
                .get(pos)
                .ok_or_else(|| truncated("fuzz chain name length"))?;
            pos += 1;
            if name_len == 0 {
                break;
            }

            let name_end = pos + name_len as usize;
            let name_bytes = data
                .get(pos..name_end)
                .ok_or_else(|| truncated("fuzz chain name"))?;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|e| Error::wrapped(ErrorKind::Protocol, e))?;
            pos = name_end;

            let key_len = *data
                .get(pos)
                .ok_or_else(|| truncated("fuzz chain key length"))?;
            pos += 1;
            let key_end = pos + key_len as usize;
            let key = data.get(pos..key_end).ok_or_else(|| truncated("fuzz chain key"))?;
            pos = key_end;

            transforms.push(construct(name, key)?);
        }

        if transforms.is_empty() {
            return Err(Error::simple(ErrorKind::Protocol));
        }

        Ok((FuzzChain::new(transforms), pos))
    }
}

fn truncated(what: &str) -> Error {
    Error::wrapped(ErrorKind::Protocol, format!("truncated {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::fuzz::{codec, symmetric};

    fn sample_chain() -> FuzzChain {
        FuzzChain::new(vec![
            Box::new(symmetric::Xor::new(0x42)),
            Box::new(codec::Base64),
            Box::new(symmetric::RailFence::new(3)),
        ])
    }

    #[test]
    fn roundtrips_data_through_every_transform() {
        let chain = sample_chain();
        let data = b"the quick brown fox jumps over the lazy dog";
        let encrypted = chain.encrypt(data);
        let decrypted = chain.decrypt(&encrypted).expect("decrypt");
        assert_eq!(decrypted, data);
    }

    #[test]
    fn serialize_then_deserialize_reconstructs_an_equivalent_chain() {
        let chain = sample_chain();
        let wire = chain.serialize();
        let (parsed, consumed) = FuzzChain::deserialize(&wire).expect("deserialize");
        assert_eq!(consumed, wire.len());

        let data = b"round trip me";
        let a = chain.encrypt(data);
        let b = parsed.encrypt(data);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_empty_chain() {
        let wire = vec![0u8];
        assert!(FuzzChain::deserialize(&wire).is_err());
    }

    #[test]
    fn rejects_unknown_transform_name() {
        let mut wire = vec![7];
        wire.extend_from_slice(b"Bogus!!");
        wire.push(0); // key_len
        wire.push(0); // terminator
        assert!(FuzzChain::deserialize(&wire).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let wire = vec![3, b'X', b'O'];
        assert!(FuzzChain::deserialize(&wire).is_err());
    }
}
