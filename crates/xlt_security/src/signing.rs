//! RSA-PKCS1v15-SHA256 package signing for distributed update packages
//! (`spec.md` §4.4, §4.6). Grounded on `casparian_security::signing`'s
//! `sha256` helper and `cf_security::signing`'s sign/verify shape; the
//! algorithm itself diverges from the teacher's Ed25519 because the
//! specification names RSA-PKCS1v15-SHA256 explicitly.

use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Digest;

use crate::error::{Result, SecurityError};

pub const DEFAULT_KEY_BITS: usize = 2048;

pub struct KeyPair {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

impl KeyPair {
    pub fn generate(bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Writes the key pair to disk. The private key is written with
    /// owner-only permissions; the public key is world-readable.
    #[cfg(unix)]
    pub fn save_to_files(&self, private_path: impl AsRef<Path>, public_path: impl AsRef<Path>) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let private_pem = self.private.to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)?;
        std::fs::write(private_path.as_ref(), private_pem.as_bytes())?;
        std::fs::set_permissions(private_path.as_ref(), std::fs::Permissions::from_mode(0o600))?;

        let public_pem = self.public.to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)?;
        std::fs::write(public_path.as_ref(), public_pem)?;
        std::fs::set_permissions(public_path.as_ref(), std::fs::Permissions::from_mode(0o644))?;

        Ok(())
    }
}

pub fn load_private_key(path: impl AsRef<Path>) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)?;
    Ok(RsaPrivateKey::from_pkcs1_pem(&pem)?)
}

pub fn load_public_key(path: impl AsRef<Path>) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)?;
    Ok(RsaPublicKey::from_pkcs1_pem(&pem)?)
}

/// Signs `data` with RSA-PKCS1v15-SHA256, returning the raw signature bytes.
pub fn sign(private_key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key.sign(data);
    Ok(signature.to_vec())
}

/// Verifies an RSA-PKCS1v15-SHA256 signature, mapping any failure to
/// [`SecurityError::InvalidSignature`].
pub fn verify(public_key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let signature =
        Signature::try_from(signature).map_err(|_| SecurityError::InvalidSignature)?;
    verifying_key.verify(data, &signature).map_err(|_| SecurityError::InvalidSignature)
}

/// Hex-encoded SHA-256 digest of `data`, used wherever the spec calls for a
/// plain content hash rather than a signature (e.g. the update package's
/// advertised checksum).
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trips() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let data = b"update-package-contents";
        let signature = sign(&keys.private, data).unwrap();
        assert!(verify(&keys.public, data, &signature).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_data() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let signature = sign(&keys.private, b"original").unwrap();
        assert!(verify(&keys.public, b"tampered", &signature).is_err());
    }

    #[test]
    fn verify_rejects_signature_from_a_different_key() {
        let keys_a = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let keys_b = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let signature = sign(&keys_a.private, b"data").unwrap();
        assert!(verify(&keys_b.public, b"data", &signature).is_err());
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde"
        );
    }

    #[cfg(unix)]
    #[test]
    fn save_to_files_sets_owner_only_permissions_on_private_key() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let private_path = dir.path().join("update.key");
        let public_path = dir.path().join("update.pub");
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        keys.save_to_files(&private_path, &public_path).unwrap();

        let mode = std::fs::metadata(&private_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
