/// Security envelope: identity, signing, session keys, payload AEAD.
///
/// One long-lived RSA-2048 keypair per client identifies it to peers.
/// Each session gets its own AES-256 key, minted by the accepting side
/// and carried to the dialer RSA-OAEP-wrapped; payload protection is
/// AES-256-GCM with a fresh random 96-bit nonce per message. Nonce
/// reuse under one key breaks GCM, so there is no counter anywhere;
/// every nonce comes straight from the CSPRNG.
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use asinka_wire::SealedPayload;

use crate::error::AsinkaError;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;
/// GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;
/// Identity keypair modulus size in bits.
pub const IDENTITY_BITS: usize = 2048;

/// Symmetric key protecting one session's payloads.
///
/// Zeroized on drop; never logged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    /// Build from raw bytes; must be exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AsinkaError> {
        if bytes.len() != KEY_SIZE {
            return Err(AsinkaError::Crypto(format!(
                "session key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Holds the identity keypair and performs every cryptographic
/// operation the core needs. Immutable after construction; safe to
/// call from any task.
pub struct SecurityEnvelope {
    private_key: RsaPrivateKey,
    signing_key: SigningKey<Sha256>,
    public_key_der: Vec<u8>,
}

impl SecurityEnvelope {
    /// Generate a fresh RSA-2048 identity.
    pub fn generate() -> Result<Self, AsinkaError> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, IDENTITY_BITS)
            .map_err(|e| AsinkaError::Crypto(format!("keypair generation failed: {e}")))?;
        Self::from_private_key(private_key)
    }

    /// Wrap an existing keypair (key storage is an external concern).
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, AsinkaError> {
        let public_key_der = private_key
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| AsinkaError::Crypto(format!("public key encoding failed: {e}")))?
            .as_bytes()
            .to_vec();
        let signing_key = SigningKey::<Sha256>::new(private_key.clone());
        Ok(Self {
            private_key,
            signing_key,
            public_key_der,
        })
    }

    /// This identity's public key, PKCS#1 DER.
    pub fn identity_public_key(&self) -> &[u8] {
        &self.public_key_der
    }

    /// Sign with the identity key (RSASSA-PKCS1-v1_5, SHA-256).
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, AsinkaError> {
        let signature = self
            .signing_key
            .try_sign(data)
            .map_err(|e| AsinkaError::Crypto(format!("signing failed: {e}")))?;
        Ok(signature.to_vec())
    }

    /// Verify a peer's signature. Returns `false` on any failure,
    /// including malformed key or signature bytes.
    pub fn verify(&self, data: &[u8], signature: &[u8], peer_public_key: &[u8]) -> bool {
        let Ok(public_key) = RsaPublicKey::from_pkcs1_der(peer_public_key) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(public_key)
            .verify(data, &signature)
            .is_ok()
    }

    /// Mint a fresh 256-bit session key from the CSPRNG.
    pub fn generate_session_key() -> SessionKey {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        SessionKey { bytes }
    }

    /// Encrypt a payload under a session key. Fresh random nonce.
    pub fn seal(&self, plaintext: &[u8], key: &SessionKey) -> Result<SealedPayload, AsinkaError> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| AsinkaError::Crypto("encryption failed".into()))?;

        Ok(SealedPayload {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Decrypt a sealed payload. Fails on tag mismatch or bad input.
    pub fn open(&self, sealed: &SealedPayload, key: &SessionKey) -> Result<Vec<u8>, AsinkaError> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
            .map_err(|_| AsinkaError::Crypto("decryption failed: authentication error".into()))
    }

    /// Wrap a session key to a recipient's identity key (RSA-OAEP-SHA-256).
    pub fn wrap_session_key(
        &self,
        key: &SessionKey,
        recipient_public_key: &[u8],
    ) -> Result<Vec<u8>, AsinkaError> {
        let public_key = RsaPublicKey::from_pkcs1_der(recipient_public_key)
            .map_err(|e| AsinkaError::Crypto(format!("invalid recipient key: {e}")))?;
        public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_bytes())
            .map_err(|e| AsinkaError::Crypto(format!("session key wrap failed: {e}")))
    }

    /// Unwrap a session key addressed to this identity.
    pub fn unwrap_session_key(&self, wrapped: &[u8]) -> Result<SessionKey, AsinkaError> {
        let bytes = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|e| AsinkaError::Crypto(format!("session key unwrap failed: {e}")))?;
        SessionKey::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for SecurityEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityEnvelope")
            .field("public_key_der", &self.public_key_der.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    /// RSA keygen is expensive; share two identities across the module.
    fn alice() -> &'static SecurityEnvelope {
        static ENVELOPE: OnceLock<SecurityEnvelope> = OnceLock::new();
        ENVELOPE.get_or_init(|| SecurityEnvelope::generate().expect("keygen"))
    }

    fn bob() -> &'static SecurityEnvelope {
        static ENVELOPE: OnceLock<SecurityEnvelope> = OnceLock::new();
        ENVELOPE.get_or_init(|| SecurityEnvelope::generate().expect("keygen"))
    }

    #[test]
    fn sign_verifies_with_own_key() {
        let data = b"handshake transcript";
        let signature = alice().sign(data).expect("sign");
        assert!(alice().verify(data, &signature, alice().identity_public_key()));
    }

    #[test]
    fn verify_rejects_tampered_data() {
        let signature = alice().sign(b"original").expect("sign");
        assert!(!alice().verify(b"tampered", &signature, alice().identity_public_key()));
    }

    #[test]
    fn verify_rejects_wrong_signer() {
        let signature = alice().sign(b"data").expect("sign");
        assert!(!bob().verify(b"data", &signature, bob().identity_public_key()));
    }

    #[test]
    fn verify_rejects_garbage_key() {
        let signature = alice().sign(b"data").expect("sign");
        assert!(!alice().verify(b"data", &signature, b"not a der key"));
    }

    #[test]
    fn verify_rejects_garbage_signature() {
        assert!(!alice().verify(b"data", b"junk", alice().identity_public_key()));
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = SecurityEnvelope::generate_session_key();
        let plaintext = b"object update payload";

        let sealed = alice().seal(plaintext, &key).expect("seal");
        let opened = alice().open(&sealed, &key).expect("open");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn seal_open_empty_payload() {
        let key = SecurityEnvelope::generate_session_key();
        let sealed = alice().seal(b"", &key).expect("seal");
        assert_eq!(alice().open(&sealed, &key).expect("open"), b"");
    }

    #[test]
    fn open_wrong_key_fails() {
        let key = SecurityEnvelope::generate_session_key();
        let other = SecurityEnvelope::generate_session_key();

        let sealed = alice().seal(b"secret", &key).expect("seal");
        assert!(alice().open(&sealed, &other).is_err());
    }

    #[test]
    fn open_tampered_ciphertext_fails() {
        let key = SecurityEnvelope::generate_session_key();
        let mut sealed = alice().seal(b"secret", &key).expect("seal");
        if let Some(byte) = sealed.ciphertext.first_mut() {
            *byte ^= 0xFF;
        }
        assert!(alice().open(&sealed, &key).is_err());
    }

    #[test]
    fn open_tampered_nonce_fails() {
        let key = SecurityEnvelope::generate_session_key();
        let mut sealed = alice().seal(b"secret", &key).expect("seal");
        sealed.nonce[0] ^= 0xFF;
        assert!(alice().open(&sealed, &key).is_err());
    }

    #[test]
    fn nonces_are_fresh_per_message() {
        let key = SecurityEnvelope::generate_session_key();
        let a = alice().seal(b"same message", &key).expect("seal");
        let b = alice().seal(b"same message", &key).expect("seal");
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn ciphertext_overhead_is_tag_size() {
        let key = SecurityEnvelope::generate_session_key();
        let plaintext = b"sixteen byte tag";
        let sealed = alice().seal(plaintext, &key).expect("seal");
        assert_eq!(sealed.ciphertext.len(), plaintext.len() + 16);
    }

    #[test]
    fn session_key_wrap_roundtrip() {
        let key = SecurityEnvelope::generate_session_key();

        // Alice wraps for Bob; Bob unwraps.
        let wrapped = alice()
            .wrap_session_key(&key, bob().identity_public_key())
            .expect("wrap");
        let unwrapped = bob().unwrap_session_key(&wrapped).expect("unwrap");
        assert_eq!(unwrapped.as_bytes(), key.as_bytes());
    }

    #[test]
    fn unwrap_with_wrong_identity_fails() {
        let key = SecurityEnvelope::generate_session_key();
        let wrapped = alice()
            .wrap_session_key(&key, bob().identity_public_key())
            .expect("wrap");
        assert!(alice().unwrap_session_key(&wrapped).is_err());
    }

    #[test]
    fn session_key_from_bytes_validates_length() {
        assert!(SessionKey::from_bytes(&[0u8; 32]).is_ok());
        assert!(SessionKey::from_bytes(&[0u8; 16]).is_err());
        assert!(SessionKey::from_bytes(&[]).is_err());
    }

    #[test]
    fn session_key_debug_redacted() {
        let key = SecurityEnvelope::generate_session_key();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn public_key_is_stable() {
        assert_eq!(alice().identity_public_key(), alice().identity_public_key());
        assert_ne!(alice().identity_public_key(), bob().identity_public_key());
    }
}
