use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Header the payment processor puts its signature in.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// How a delivery was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// The signature matched the configured secret.
    Verified,
    /// No secret is configured, the payload was taken as-is.
    Degraded,
}

/// Parsed `t=...,v1=...` header.
#[derive(Debug, Default)]
struct SignatureHeader<'a> {
    timestamp: Option<i64>,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> SignatureHeader<'_> {
    let mut parsed = SignatureHeader::default();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => parsed.timestamp = v.parse().ok(),
            Some(("v1", v)) => parsed.signatures.push(v),
            _ => {}
        }
    }
    parsed
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Produces a header value the way the processor does. Used by tests and local tooling.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
    let digest = mac_for(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
}

/// Checks a delivery against the signing secret.
///
/// With no secret configured every payload is accepted as [`Trust::Degraded`].
pub fn verify(
    secret: Option<&str>,
    header: Option<&str>,
    payload: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<Trust, WebhookError> {
    let Some(secret) = secret else {
        return Ok(Trust::Degraded);
    };
    let header = header.ok_or(WebhookError::MissingSignature)?;
    let parsed = parse_header(header);
    let timestamp = parsed.timestamp.ok_or(WebhookError::InvalidSignature)?;
    if parsed.signatures.is_empty() {
        return Err(WebhookError::InvalidSignature);
    }

    let mac = mac_for(secret, timestamp, payload)?;
    let matched = parsed.signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(WebhookError::InvalidSignature);
    }

    if (now - timestamp).abs() > tolerance_secs {
        return Err(WebhookError::StaleSignature);
    }

    Ok(Trust::Verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    #[test]
    fn accepts_valid_signature() {
        let header = sign(SECRET, 1_700_000_000, BODY).unwrap();
        let trust = assert_ok!(verify(Some(SECRET), Some(&header), BODY, 1_700_000_010, 300));
        assert_eq!(trust, Trust::Verified);
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign(SECRET, 1_700_000_000, BODY).unwrap();
        let err = assert_err!(verify(
            Some(SECRET),
            Some(&header),
            br#"{"id":"evt_2"}"#,
            1_700_000_000,
            300
        ));
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign("whsec_other", 1_700_000_000, BODY).unwrap();
        assert_err!(verify(Some(SECRET), Some(&header), BODY, 1_700_000_000, 300));
    }

    #[test]
    fn rejects_missing_header_when_secret_set() {
        let err = assert_err!(verify(Some(SECRET), None, BODY, 0, 300));
        assert!(matches!(err, WebhookError::MissingSignature));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign(SECRET, 1_700_000_000, BODY).unwrap();
        let err = assert_err!(verify(Some(SECRET), Some(&header), BODY, 1_700_000_301, 300));
        assert!(matches!(err, WebhookError::StaleSignature));
    }

    #[test]
    fn any_rotated_signature_may_match() {
        let good = sign(SECRET, 42, BODY).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t=42,v1=deadbeef,v1={good_sig}");
        assert_ok!(verify(Some(SECRET), Some(&header), BODY, 42, 300));
    }

    #[test]
    fn garbage_header_is_invalid() {
        let err = assert_err!(verify(Some(SECRET), Some("nonsense"), BODY, 0, 300));
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[test]
    fn empty_secret_still_signs_and_verifies() {
        let header = assert_ok!(sign("", 7, BODY));
        assert_ok!(verify(Some(""), Some(&header), BODY, 7, 300));
        assert_err!(verify(Some(SECRET), Some(&header), BODY, 7, 300));
    }

    #[test]
    fn no_secret_degrades_trust() {
        let trust = assert_ok!(verify(None, None, BODY, 0, 300));
        assert_eq!(trust, Trust::Degraded);
    }
}
