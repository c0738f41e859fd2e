//! Session tokens and the time-based one-time password used at login.
//!
//! The brokerage login is a two-factor flow: static credentials plus a
//! 30-second TOTP derived from a shared base32 secret (RFC 6238, HMAC-SHA1,
//! 6 digits). The resulting token set is held as process-wide state inside
//! the provider and replaced wholesale on re-login; there is no explicit
//! expiry tracking — an authorization failure on a data call is the signal
//! that the session has lapsed.

use std::time::{SystemTime, UNIX_EPOCH};

use feed_common::{FeedError, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Time step of the one-time-password algorithm, in seconds.
const TOTP_STEP_SECS: u64 = 30;
/// Number of digits in a generated one-time code.
const TOTP_DIGITS: u32 = 6;

/// Token set returned by a successful login.
///
/// The brokerage hands back a triple; the data vendor only fills
/// `auth_token` and leaves the rest empty.
#[derive(Debug, Clone, Default)]
pub struct SessionTokens {
    /// Bearer token attached to data calls.
    pub auth_token: String,
    /// Feed token for the streaming endpoints (unused by the poller).
    pub feed_token: String,
    /// Refresh token, forwarded on profile lookups.
    pub refresh_token: String,
}

impl SessionTokens {
    /// Token set consisting of a single bearer token.
    pub fn bearer(token: String) -> Self {
        SessionTokens {
            auth_token: token,
            ..SessionTokens::default()
        }
    }
}

/// Generate the current one-time code for a base32-encoded shared secret.
pub fn totp_now(secret: &str) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| FeedError::Auth(format!("System clock before Unix epoch: {}", e)))?
        .as_secs();
    totp_at(secret, now)
}

/// Generate the one-time code for a secret at a given Unix time.
///
/// - secret: base32-encoded shared secret (RFC 4648, padding optional).
/// - unix_time: seconds since the Unix epoch.
/// - Returns: the 6-digit, zero-padded code for that 30-second window.
pub fn totp_at(secret: &str, unix_time: u64) -> Result<String> {
    let normalized = secret.trim().trim_end_matches('=').to_ascii_uppercase();
    let key = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &normalized)
        .ok_or_else(|| FeedError::Auth("TOTP secret is not valid base32".to_string()))?;

    let counter = unix_time / TOTP_STEP_SECS;
    let mut mac = HmacSha1::new_from_slice(&key)
        .map_err(|e| FeedError::Auth(format!("TOTP key rejected: {}", e)))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // RFC 4226 dynamic truncation.
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let code = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    Ok(format!("{:0width$}", code % 10u32.pow(TOTP_DIGITS), width = TOTP_DIGITS as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B reference secret ("12345678901234567890" in base32),
    // with the published SHA-1 codes truncated to 6 digits.
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn matches_rfc6238_reference_vectors() {
        assert_eq!(totp_at(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(totp_at(RFC_SECRET, 1111111109).unwrap(), "081804");
        assert_eq!(totp_at(RFC_SECRET, 1234567890).unwrap(), "005924");
    }

    #[test]
    fn code_is_stable_within_a_time_step() {
        assert_eq!(
            totp_at(RFC_SECRET, 1111111109).unwrap(),
            totp_at(RFC_SECRET, 1111111100).unwrap()
        );
    }

    #[test]
    fn padded_and_lowercase_secrets_are_accepted() {
        assert_eq!(totp_at("gezdgnbvgy3tqojqgezdgnbvgy3tqojq==", 59).unwrap(), "287082");
    }

    #[test]
    fn garbage_secret_is_rejected() {
        assert!(matches!(totp_at("not base32!", 59), Err(FeedError::Auth(_))));
    }
}
