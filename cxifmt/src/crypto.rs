//! Hashing and RSA-2048 signing of NCCH-embedded structures.
//!
//! Every signable region (Access Descriptor, NCCH header) is signed with
//! PKCS#1v1.5 RSA-2048/SHA-256 when a signing key is supplied on the command
//! line. Without one, the signature field is filled with `0xFF`, matching the
//! reference tool's behavior when no crypto backend is available.

use rsa::pkcs1v15::SigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};

use crate::error::{BuildResult, SigningError};

pub const SIGNATURE_SIZE: usize = 0x100;

/// Computes the SHA-256 digest of a byte slice.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 0x20] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// A loaded RSA-2048 private key used to sign NCCH structures, or nothing if
/// the caller did not provide one.
pub enum Signer {
    None,
    Key(Box<RsaPrivateKey>),
}

impl Signer {
    pub fn none() -> Self {
        Signer::None
    }

    /// Parses a PKCS#8 PEM-encoded RSA-2048 private key.
    pub fn from_pkcs8_pem(pem: &str) -> BuildResult<Self> {
        use rsa::pkcs8::DecodePrivateKey;
        let key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(SigningError::Pkcs8)?;
        if key.size() != 256 {
            return Err(SigningError::WrongKeySize.into());
        }
        Ok(Signer::Key(Box::new(key)))
    }

    /// Signs `data` with PKCS#1v1.5/SHA-256, or returns an all-`0xFF` filler
    /// signature if no key was configured.
    pub fn sign(&self, data: &[u8]) -> BuildResult<[u8; SIGNATURE_SIZE]> {
        match self {
            Signer::None => Ok([0xFFu8; SIGNATURE_SIZE]),
            Signer::Key(key) => {
                let signing_key = SigningKey::<Sha256>::new(key.as_ref().clone());
                let mut rng = rand::thread_rng();
                let sig = signing_key.sign_with_rng(&mut rng, data);
                let bytes = sig.to_bytes();
                let mut out = [0u8; SIGNATURE_SIZE];
                if bytes.len() != SIGNATURE_SIZE {
                    return Err(SigningError::WrongKeySize.into());
                }
                out.copy_from_slice(&bytes);
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty() {
        let digest = sha256(&[]);
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }

    #[test]
    fn no_key_fills_with_ff() {
        let signer = Signer::none();
        let sig = signer.sign(b"anything").unwrap();
        assert!(sig.iter().all(|b| *b == 0xFF));
    }
}
