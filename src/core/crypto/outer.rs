//! The outer envelope cipher: AES-256-CBC keyed by SHA-256(password),
//! used only for the handshake phase before a tunnel and its peer have
//! negotiated a fuzz chain (see §4.2 of spec.md).

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};

type Enc = cbc::Encryptor<aes::Aes256>;
type Dec = cbc::Decryptor<aes::Aes256>;

const BLOCK_SIZE: usize = 16;

/// Symmetric AES-256-CBC envelope: a fresh random IV is prepended to
/// every ciphertext, and the key is derived once from the password.
pub struct OuterCipher {
    key: [u8; 32],
}

impl OuterCipher {
    pub fn new(password: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        let key: [u8; 32] = hasher.finalize().into();
        OuterCipher { key }
    }

    /// Encrypts `data`, returning `IV || ciphertext`.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut iv);

        let encryptor = Enc::new(&self.key.into(), &iv.into());
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(data);

        let mut out = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Splits the leading IV off `data` and decrypts the remainder.
    pub fn decrypt(&self, data: &[u8]) -> crate::core::error::Result<Vec<u8>> {
        if data.len() < BLOCK_SIZE {
            return Err(Error::simple(ErrorKind::Protocol));
        }
        let (iv, ciphertext) = data.split_at(BLOCK_SIZE);

        let decryptor = Dec::new(&self.key.into(), iv.into());
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| Error::wrapped(ErrorKind::Protocol, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_arbitrary_length_payloads() {
        let cipher = OuterCipher::new("correct horse battery staple");
        for data in [
            &b""[..],
            b"short",
            b"exactly sixteen!",
            &vec![0x42u8; 1000],
        ] {
            let encrypted = cipher.encrypt(data);
            let decrypted = cipher.decrypt(&encrypted).expect("decrypt");
            assert_eq!(decrypted, data);
        }
    }

    #[test]
    fn same_plaintext_encrypts_differently_each_time() {
        let cipher = OuterCipher::new("pw");
        let a = cipher.encrypt(b"hello, world");
        let b = cipher.encrypt(b"hello, world");
        assert_ne!(a, b, "IV should be fresh per call");
    }

    #[test]
    fn different_passwords_do_not_interoperate() {
        let a = OuterCipher::new("pw-a");
        let b = OuterCipher::new("pw-b");
        let encrypted = a.encrypt(b"secret");
        assert!(b.decrypt(&encrypted).is_err());
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let cipher = OuterCipher::new("pw");
        assert!(cipher.decrypt(&[0u8; 4]).is_err());
    }
}
