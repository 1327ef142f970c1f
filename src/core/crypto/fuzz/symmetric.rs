//! Fuzz transforms keyed by a small integer, as opposed to the codecs in
//! [`super::codec`], which carry no key at all.

use rand_core::{OsRng, RngCore};

use super::Transform;

/// `b ^ k` for every byte, with a single-byte key. Its own inverse.
pub struct Xor {
    key: u8,
}

impl Xor {
    pub const NAME: &'static str = "XOR";

    pub fn new(key: u8) -> Self {
        Xor { key }
    }

    /// Builds a `XOR` transform with a fresh random key.
    pub fn random() -> Self {
        Xor::new((OsRng.next_u32() & 0xFF) as u8)
    }

    fn codec(&self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ self.key).collect()
    }
}

impl Transform for Xor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn key(&self) -> Vec<u8> {
        vec![self.key]
    }

    fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        self.codec(data)
    }

    fn decrypt(&self, data: &[u8]) -> super::Result<Vec<u8>> {
        Ok(self.codec(data))
    }
}

impl Xor {
    pub fn from_key(key: &[u8]) -> super::Result<Self> {
        match key {
            [k] => Ok(Xor::new(*k)),
            [] => Ok(Xor::random()),
            _ => Err(super::bad_key(Self::NAME)),
        }
    }
}

/// Classic zig-zag rail fence transposition cipher, keyed by the number
/// of rails. Per spec §4.1, a key that isn't strictly between `1` and
/// `len(data)` makes the transform the identity, for that input only —
/// the key itself is still whatever was negotiated.
pub struct RailFence {
    rails: u16,
}

impl RailFence {
    pub const NAME: &'static str = "RailFence";

    pub fn new(rails: u16) -> Self {
        RailFence { rails }
    }

    /// Builds a `RailFence` transform with a fresh random rail count
    /// in `[2, 10]`, matching the Python original's `randint(1, 10)`
    /// bias towards rail counts that are actually reasonable.
    pub fn random() -> Self {
        RailFence::new((OsRng.next_u32() % 9 + 2) as u16)
    }

    fn reasonable(&self, len: usize) -> bool {
        self.rails > 1 && (self.rails as usize) < len
    }

    /// Returns, for each output position, the index of the input byte
    /// that lands there — i.e. the fence's zig-zag read order.
    fn fence_order(&self, len: usize) -> Vec<usize> {
        let rails = self.rails as usize;
        let mut zigzag = Vec::with_capacity(rails.max(1) * 2);
        zigzag.extend(0..rails);
        zigzag.extend((1..rails.saturating_sub(1)).rev());
        if zigzag.is_empty() {
            zigzag.push(0);
        }

        let mut rows: Vec<Vec<usize>> = vec![Vec::new(); rails];
        for n in 0..len {
            let rail = zigzag[n % zigzag.len()];
            rows[rail].push(n);
        }
        rows.into_iter().flatten().collect()
    }
}

impl Transform for RailFence {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn key(&self) -> Vec<u8> {
        self.rails.to_be_bytes().to_vec()
    }

    fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        if !self.reasonable(data.len()) {
            return data.to_vec();
        }
        let order = self.fence_order(data.len());
        order.into_iter().map(|i| data[i]).collect()
    }

    fn decrypt(&self, data: &[u8]) -> super::Result<Vec<u8>> {
        if !self.reasonable(data.len()) {
            return Ok(data.to_vec());
        }
        let order = self.fence_order(data.len());
        let mut out = vec![0u8; data.len()];
        for (fenced_pos, original_pos) in order.into_iter().enumerate() {
            out[original_pos] = data[fenced_pos];
        }
        Ok(out)
    }
}

impl RailFence {
    pub fn from_key(key: &[u8]) -> super::Result<Self> {
        match key {
            [hi, lo] => Ok(RailFence::new(u16::from_be_bytes([*hi, *lo]))),
            [] => Ok(RailFence::random()),
            _ => Err(super::bad_key(Self::NAME)),
        }
    }
}

/// `b ↦ 0xFF - b`. Its own inverse.
pub struct AtBash;

impl AtBash {
    pub const NAME: &'static str = "AtBash";
}

impl Transform for AtBash {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn key(&self) -> Vec<u8> {
        Vec::new()
    }

    fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| 0xFF - *b).collect()
    }

    fn decrypt(&self, data: &[u8]) -> super::Result<Vec<u8>> {
        Ok(self.encrypt(data))
    }
}

impl AtBash {
    pub fn from_key(_key: &[u8]) -> super::Result<Self> {
        Ok(AtBash)
    }
}
