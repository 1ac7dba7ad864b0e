//! Signing capability and the router's own identity
//!
//! Collaborators never see secret keys; they get a [`SigningCapability`]
//! (sign with our identity) and a [`SignatureVerifier`] (check someone
//! else's). [`Identity`] backs the first, [`Ed25519Verifier`] the second.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keypair::{self, EncryptionKey, IdentityKey};
use super::RouterId;

/// Errors loading or creating the router identity. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Failed to read keyfile: {0}")]
    Read(String),

    #[error("Failed to write keyfile: {0}")]
    Write(String),

    #[error("Corrupt keyfile: {0}")]
    Corrupt(String),
}

/// Sign with the local identity.
pub trait SigningCapability: Send + Sync {
    fn router_id(&self) -> RouterId;

    fn sign(&self, msg: &[u8]) -> Vec<u8>;

    /// X25519 public key advertised next to the identity
    fn encryption_public(&self) -> [u8; 32];
}

/// Check a signature made by another router.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signer: &RouterId, msg: &[u8], sig: &[u8]) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, signer: &RouterId, msg: &[u8], sig: &[u8]) -> bool {
        keypair::verify(signer, msg, sig)
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeyFile {
    identity_seed: String,
    encryption_secret: String,
}

fn decode_key(field: &str, value: &str) -> Result<[u8; 32], IdentityError> {
    let bytes = hex::decode(value).map_err(|e| IdentityError::Corrupt(format!("{field}: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| IdentityError::Corrupt(format!("{field}: expected 32 bytes")))
}

/// The router's own key material.
#[derive(Debug)]
pub struct Identity {
    identity: IdentityKey,
    encryption: EncryptionKey,
}

impl Identity {
    pub fn generate() -> Self {
        Self {
            identity: IdentityKey::generate(),
            encryption: EncryptionKey::generate(),
        }
    }

    pub fn from_keys(identity: IdentityKey, encryption: EncryptionKey) -> Self {
        Self {
            identity,
            encryption,
        }
    }

    /// Load the keyfile at `path`, creating it with fresh keys if absent.
    ///
    /// A keyfile that exists but cannot be read or parsed is an error; it is
    /// never silently replaced.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        if !path.exists() {
            let identity = Self::generate();
            identity.save(path)?;
            info!(router = %identity.router_id(), path = %path.display(), "generated new identity");
            return Ok(identity);
        }
        Self::load(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| IdentityError::Read(e.to_string()))?;
        let file: KeyFile =
            serde_json::from_str(&contents).map_err(|e| IdentityError::Corrupt(e.to_string()))?;
        let mut seed = decode_key("identity_seed", &file.identity_seed)?;
        let mut secret = decode_key("encryption_secret", &file.encryption_secret)?;
        let identity = Self {
            identity: IdentityKey::from_seed(seed),
            encryption: EncryptionKey::from_bytes(secret),
        };
        seed.zeroize();
        secret.zeroize();
        Ok(identity)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IdentityError> {
        let path = path.as_ref();
        let file = KeyFile {
            identity_seed: hex::encode(self.identity.seed()),
            encryption_secret: hex::encode(self.encryption.secret_bytes()),
        };
        let contents =
            serde_json::to_string_pretty(&file).map_err(|e| IdentityError::Write(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| IdentityError::Write(e.to_string()))?;
            }
        }
        std::fs::write(path, contents).map_err(|e| IdentityError::Write(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| IdentityError::Write(e.to_string()))?;
        }
        Ok(())
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity
    }

    pub fn encryption(&self) -> &EncryptionKey {
        &self.encryption
    }
}

impl SigningCapability for Identity {
    fn router_id(&self) -> RouterId {
        self.identity.router_id()
    }

    fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.identity.sign(msg)
    }

    fn encryption_public(&self) -> [u8; 32] {
        self.encryption.public()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_generate_persists_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("identity.json");

        let first = Identity::load_or_generate(&path).unwrap();
        assert!(path.exists());
        let second = Identity::load_or_generate(&path).unwrap();
        assert_eq!(first.router_id(), second.router_id());
        assert_eq!(first.encryption_public(), second.encryption_public());
    }

    #[test]
    fn test_corrupt_keyfile_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, "{\"identity_seed\":\"zz\",\"encryption_secret\":\"00\"}").unwrap();
        assert!(matches!(
            Identity::load_or_generate(&path),
            Err(IdentityError::Corrupt(_))
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Identity::load(&path),
            Err(IdentityError::Corrupt(_))
        ));
    }

    #[test]
    fn test_verifier_accepts_own_signature() {
        let identity = Identity::generate();
        let sig = identity.sign(b"payload");
        assert!(Ed25519Verifier.verify(&identity.router_id(), b"payload", &sig));
        assert!(!Ed25519Verifier.verify(&identity.router_id(), b"payloaD", &sig));
    }
}
