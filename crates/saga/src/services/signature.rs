//! Payment signature verification.
//!
//! The provider signs `"{provider_order_id}|{provider_payment_id}"` with
//! HMAC-SHA256 keyed by the shared key secret and sends the hex digest.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &str, provider_order_id: &str, provider_payment_id: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(provider_order_id.as_bytes());
    mac.update(b"|");
    mac.update(provider_payment_id.as_bytes());
    Some(mac)
}

/// Hex-encoded signature the provider would send for this pair.
pub fn sign(provider_order_id: &str, provider_payment_id: &str, secret: &str) -> String {
    keyed(secret, provider_order_id, provider_payment_id)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Checks `signature` against the expected digest in constant time.
///
/// Malformed hex is a mismatch, not an error.
pub fn verify_signature(
    provider_order_id: &str,
    provider_payment_id: &str,
    signature: &str,
    secret: &str,
) -> bool {
    let Ok(given) = hex::decode(signature.trim()) else {
        return false;
    };
    keyed(secret, provider_order_id, provider_payment_id)
        .is_some_and(|mac| mac.verify_slice(&given).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let sig = sign("order_1", "pay_1", "secret");
        assert_eq!(sig.len(), 64);
        assert!(verify_signature("order_1", "pay_1", &sig, "secret"));
    }

    #[test]
    fn test_rejects_tampering() {
        let sig = sign("order_1", "pay_1", "secret");
        assert!(!verify_signature("order_1", "pay_2", &sig, "secret"));
        assert!(!verify_signature("order_2", "pay_1", &sig, "secret"));
        assert!(!verify_signature("order_1", "pay_1", &sig, "other"));
        assert!(!verify_signature("order_1", "pay_1", "not-hex", "secret"));
        assert!(!verify_signature("order_1", "pay_1", "", "secret"));
    }

    #[test]
    fn test_uppercase_hex_is_accepted() {
        let sig = sign("order_1", "pay_1", "secret").to_uppercase();
        assert!(verify_signature("order_1", "pay_1", &sig, "secret"));
    }
}
