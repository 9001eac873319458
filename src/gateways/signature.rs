//! Gateway authentication tokens.
//!
//! Razorpay authenticates callbacks with an HMAC-SHA256 over
//! `"{order_id}|{payment_id}"`; PhonePe signs requests with a salted
//! SHA-256 carried in the `X-VERIFY` header. Cashfree sends static
//! credentials as headers and computes nothing client-side.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase-hex HMAC-SHA256 over `"{order_id}|{payment_id}"`.
pub fn razorpay_signature(
    secret: &str,
    order_id: &str,
    payment_id: &str,
) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::ConfigurationError("razorpay key secret".to_string()))?;
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Recomputes the Razorpay signature and compares it byte-for-byte against
/// the gateway-supplied value. A mismatch is a forged or corrupted
/// callback, never a soft failure.
pub fn verify_razorpay_signature(
    secret: &str,
    order_id: &str,
    payment_id: &str,
    supplied: &str,
) -> Result<bool, ServiceError> {
    let expected = razorpay_signature(secret, order_id, payment_id)?;
    Ok(constant_time_eq(&expected, supplied))
}

/// PhonePe `X-VERIFY` token: lowercase-hex SHA-256 over the input
/// concatenated with the salt key, then `###` and the salt index.
///
/// For pay requests the input is the base64 request payload followed by
/// the API path; for status checks it is the API path alone.
pub fn phonepe_x_verify(input: &str, salt_key: &str, salt_index: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.update(salt_key.as_bytes());
    format!("{}###{}", hex::encode(hasher.finalize()), salt_index)
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference digests generated with an independent HMAC/SHA-256
    // implementation.
    const RAZORPAY_REFERENCE: &str =
        "cfc6e0f2e32822904b796b5df47e2ee609369df63c1aa22773a9690cee48b5c0";

    #[test]
    fn razorpay_signature_matches_reference_digest() {
        let sig = razorpay_signature(
            "test_secret_key",
            "order_IluGWxBm9U8zJ8",
            "pay_29QQoUBi66xm2f",
        )
        .unwrap();
        assert_eq!(sig, RAZORPAY_REFERENCE);
    }

    #[test]
    fn razorpay_verification_accepts_the_genuine_signature() {
        assert!(verify_razorpay_signature(
            "test_secret_key",
            "order_IluGWxBm9U8zJ8",
            "pay_29QQoUBi66xm2f",
            RAZORPAY_REFERENCE,
        )
        .unwrap());
    }

    #[test]
    fn mutating_either_id_breaks_verification() {
        // Last character of the payment id flipped
        assert!(!verify_razorpay_signature(
            "test_secret_key",
            "order_IluGWxBm9U8zJ8",
            "pay_29QQoUBi66xm2g",
            RAZORPAY_REFERENCE,
        )
        .unwrap());

        // First character of the order id flipped
        assert!(!verify_razorpay_signature(
            "test_secret_key",
            "Order_IluGWxBm9U8zJ8",
            "pay_29QQoUBi66xm2f",
            RAZORPAY_REFERENCE,
        )
        .unwrap());
    }

    #[test]
    fn phonepe_pay_checksum_matches_reference_digest() {
        let token = phonepe_x_verify("abc123/pg/v1/pay", "salt-key-001", "1");
        assert_eq!(
            token,
            "7cd226a39cb8b6f94c0d313a34f8533dffe8d92bde90d9da457089b12dd996e7###1"
        );
    }

    #[test]
    fn phonepe_status_checksum_matches_reference_digest() {
        let token = phonepe_x_verify("/pg/v1/status/MERCHANT1/TXN42", "salt-key-001", "1");
        assert_eq!(
            token,
            "e21bdf9e10c70c066494b20660d539b817f00ba7f78685a528bc116ab166b001###1"
        );
    }

    #[test]
    fn constant_time_eq_rejects_unequal_lengths() {
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("abcd", "abcd"));
    }
}
