//! HMAC-SHA256 helpers shared by the provider clients.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex-encoded signature in constant time.
pub fn verify_hex(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Parses a `t=<unix>,v1=<hex>[,v1=<hex>...]` signature header.
pub fn parse_timestamped_header(header: &str) -> Option<(i64, Vec<&str>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    match timestamp {
        Some(ts) if !signatures.is_empty() => Some((ts, signatures)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let sig = sign_hex("secret", b"order_1|pay_1");
        assert_eq!(sig.len(), 64);
        assert!(verify_hex("secret", b"order_1|pay_1", &sig));
        assert!(!verify_hex("other", b"order_1|pay_1", &sig));
        assert!(!verify_hex("secret", b"order_1|pay_2", &sig));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        assert!(!verify_hex("secret", b"body", "not-hex"));
        assert!(!verify_hex("secret", b"body", ""));
    }

    #[test]
    fn parses_stripe_style_header() {
        let (ts, sigs) = parse_timestamped_header("t=1700000000,v1=abc,v0=zzz,v1=def").unwrap();
        assert_eq!(ts, 1_700_000_000);
        assert_eq!(sigs, vec!["abc", "def"]);
        assert!(parse_timestamped_header("v1=abc").is_none());
        assert!(parse_timestamped_header("t=1700000000").is_none());
    }
}
