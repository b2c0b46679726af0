//! HMAC-SHA256 delivery signatures (`sha256=<hex>`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Sign `body` with `secret`, producing the header value a sender would use.
pub fn sign(secret: &[u8], body: &[u8]) -> hookline_core::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| hookline_core::Error::Crypto(e.to_string()))?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a delivery signature. The digest comparison is constant-time.
pub fn verify(secret: &[u8], body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };
    let Some(sig_hex) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}
