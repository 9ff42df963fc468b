use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of the request body.
///
/// The receiver recomputes the digest over the raw body with the shared
/// secret and compares it against the `X-Webhook-Signature` header.
#[must_use]
pub fn sign_body(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_rfc_4231_test_case_2() {
        let signature = sign_body("Jefe", "what do ya want for nothing?");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_changes_with_body_and_secret() {
        let base = sign_body("secret", "{\"event\":\"status_update\"}");
        assert_ne!(base, sign_body("secret", "{\"event\":\"trade_opened\"}"));
        assert_ne!(base, sign_body("other", "{\"event\":\"status_update\"}"));
        assert_eq!(base.len(), 64);
    }
}
