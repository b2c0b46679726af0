//! Secret encryption abstraction.

use crate::Result;

/// Protects webhook secrets at rest.
///
/// Implementations must be deterministic in the round trip
/// (`decrypt(encrypt(x)) == x`) and must never log plaintext.
pub trait SecretCipher: Send + Sync {
    /// Encrypt a plaintext secret into a storable text form.
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Decrypt a value produced by [`SecretCipher::encrypt`].
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}
