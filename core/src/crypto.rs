// Crypto oracle facade. The committee treats hashing and signing as external
// primitives; everything in the core goes through this module.

use crate::types::{Digest, PublicKey, Signature};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

/// 32-byte digest of arbitrary bytes.
pub fn digest(data: &[u8]) -> Digest {
    Digest::from_bytes(*blake3::hash(data).as_bytes())
}

/// Merkle combiner: two digests in, one digest out.
pub fn combine(left: &Digest, right: &Digest) -> Digest {
    let mut buffer = [0u8; 64];
    buffer[..32].copy_from_slice(left.as_bytes());
    buffer[32..].copy_from_slice(right.as_bytes());
    digest(&buffer)
}

/// Fold a digest with a computor's public key as salt: `hash(pk || digest)`.
/// Votes commit to salted digests so they cannot be replayed across signers.
pub fn salted_digest(salt: &PublicKey, value: &Digest) -> Digest {
    let mut buffer = [0u8; 64];
    buffer[..32].copy_from_slice(salt.as_bytes());
    buffer[32..].copy_from_slice(value.as_bytes());
    digest(&buffer)
}

/// Same fold for the 8-byte resource-testing digest.
pub fn salted_u64(salt: &PublicKey, value: u64) -> u64 {
    let mut buffer = [0u8; 40];
    buffer[..32].copy_from_slice(salt.as_bytes());
    buffer[32..].copy_from_slice(&value.to_le_bytes());
    let d = digest(&buffer);
    u64::from_le_bytes(d.as_bytes()[..8].try_into().unwrap())
}

/// Hash a `u64` in place, used when folding solution scores.
pub fn rehash_u64(value: u64) -> u64 {
    let d = digest(&value.to_le_bytes());
    u64::from_le_bytes(d.as_bytes()[..8].try_into().unwrap())
}

/// 32-bit fingerprint for the dejavu dedup filter.
pub fn fingerprint32(data: &[u8]) -> u32 {
    let d = digest(data);
    u32::from_le_bytes(d.as_bytes()[..4].try_into().unwrap())
}

/// Expand a seed digest into a keystream of arbitrary length (message
/// gamma).
pub fn expand(seed: &Digest, length: usize) -> Vec<u8> {
    let mut out = vec![0u8; length];
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.finalize_xof().fill(&mut out);
    out
}

/// Shared-key placeholder for the message gamma. Deployments bind the real
/// key agreement behind the crypto oracle; anonymous senders use the
/// all-zero secret.
pub fn shared_secret(source: &PublicKey, destination: &PublicKey) -> Digest {
    if source.is_zero() {
        return Digest::ZERO;
    }
    let mut buffer = [0u8; 64];
    buffer[..32].copy_from_slice(source.as_bytes());
    buffer[32..].copy_from_slice(destination.as_bytes());
    digest(&buffer)
}

/// Signing identity. Signatures cover a 32-byte digest produced by the hash
/// oracle, never the raw message.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut csprng);
        KeyPair { signing_key }
    }

    /// Deterministic identity from a 32-byte seed (computor seeds, tests).
    pub fn from_seed(seed: [u8; 32]) -> Self {
        KeyPair {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message_digest: &Digest) -> Signature {
        let signature = self.signing_key.sign(message_digest.as_bytes());
        Signature::from_bytes(signature.to_bytes())
    }
}

impl PublicKey {
    pub fn verify(&self, message_digest: &Digest, signature: &Signature) -> bool {
        if let Ok(verifying_key) = VerifyingKey::from_bytes(self.as_bytes()) {
            let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
            return verifying_key
                .verify(message_digest.as_bytes(), &sig)
                .is_ok();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let keypair = KeyPair::generate();
        let d = digest(b"tick payload");

        let signature = keypair.sign(&d);
        assert!(keypair.public_key().verify(&d, &signature));

        let other = digest(b"different payload");
        assert!(!keypair.public_key().verify(&other, &signature));
    }

    #[test]
    fn combine_is_order_sensitive() {
        let a = digest(b"a");
        let b = digest(b"b");
        assert_ne!(combine(&a, &b), combine(&b, &a));
    }

    #[test]
    fn salted_digest_differs_per_salt() {
        let value = digest(b"spectrum root");
        let salt_a = KeyPair::from_seed([1u8; 32]).public_key();
        let salt_b = KeyPair::from_seed([2u8; 32]).public_key();
        assert_ne!(salted_digest(&salt_a, &value), salted_digest(&salt_b, &value));
    }
}
