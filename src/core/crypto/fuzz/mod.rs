//! Fuzz transforms: small, reversible byte-level re-encodings chained
//! together to obfuscate the shape of a frame before it hits the outer
//! cipher (see §4.1 of spec.md).
//!
//! Transforms are looked up by name through [`construct`] rather than by
//! reflection: each concrete type registers a constructor closure in the
//! static `REGISTRY` table, keyed by its `NAME`.

pub mod chain;
pub mod codec;
pub mod symmetric;

pub use chain::FuzzChain;

use crate::core::error::{Error, ErrorKind};

pub type Result<T> = std::result::Result<T, Error>;

/// A single reversible byte transform, identified by name and carrying
/// whatever key material it was constructed with.
///
/// `from_key` is deliberately not part of this trait: it returns `Self`,
/// which isn't object-safe, and every transform needs to be stored as a
/// `Box<dyn Transform>` in a [`FuzzChain`]. Each concrete type exposes
/// `from_key` as an inherent associated function instead, and the
/// [`registry`] ties name strings to it.
pub trait Transform: Send + Sync {
    /// Name used on the wire and in the registry, e.g. `"XOR"`.
    fn name(&self) -> &'static str;

    /// Key material, empty for keyless transforms.
    fn key(&self) -> Vec<u8>;

    fn encrypt(&self, data: &[u8]) -> Vec<u8>;

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// A protocol error raised when key material doesn't fit the shape a
/// transform expects (wrong length, or a symbol outside a codec's
/// alphabet during decode).
pub fn bad_key(name: &str) -> Error {
    Error::wrapped(ErrorKind::Protocol, format!("{}: bad key material", name))
}

/// A fuzz error raised when a codec transform can't decode its input —
/// dropped per-frame post-handshake rather than tearing down the tunnel.
pub fn decode_error(name: &str, cause: &dyn std::fmt::Display) -> Error {
    Error::wrapped(ErrorKind::Fuzz, format!("{}: {}", name, cause))
}

/// Constructs a boxed transform from its wire name and key bytes.
/// Returns a `Protocol` error for an unrecognized name.
pub fn construct(name: &str, key: &[u8]) -> Result<Box<dyn Transform>> {
    for entry in REGISTRY {
        if entry.0 == name {
            return (entry.1)(key);
        }
    }
    Err(Error::wrapped(
        ErrorKind::Protocol,
        format!("unknown fuzz transform: {}", name),
    ))
}

type Constructor = fn(&[u8]) -> Result<Box<dyn Transform>>;

static REGISTRY: &[(&str, Constructor)] = &[
    (symmetric::Xor::NAME, |k| {
        symmetric::Xor::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
    (symmetric::RailFence::NAME, |k| {
        symmetric::RailFence::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
    (symmetric::AtBash::NAME, |k| {
        symmetric::AtBash::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
    (codec::Plain::NAME, |k| {
        codec::Plain::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
    (codec::Base16::NAME, |k| {
        codec::Base16::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
    (codec::Base32::NAME, |k| {
        codec::Base32::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
    (codec::Base64::NAME, |k| {
        codec::Base64::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
    (codec::Base85::NAME, |k| {
        codec::Base85::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
    (codec::XxEncode::NAME, |k| {
        codec::XxEncode::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
    (codec::UuEncode::NAME, |k| {
        codec::UuEncode::from_key(k).map(|t| Box::new(t) as Box<dyn Transform>)
    }),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_constructs_every_known_name() {
        for (name, _) in REGISTRY {
            construct(name, &[]).unwrap_or_else(|_| panic!("{} should construct", name));
        }
    }

    #[test]
    fn registry_rejects_unknown_name() {
        assert!(construct("NotATransform", &[]).is_err());
    }
}
