//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! Used with the `authorization_code` grant: the verifier stays with the app
//! and is sent in the token exchange, the S256 challenge goes into the
//! realm's authorization URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Generate a random code verifier.
///
/// 64 random bytes encoded as URL-safe base64 without padding: 86 characters,
/// inside RFC 7636's 43..=128 range.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the realm authorization URL for an S256 PKCE sign-in.
///
/// `state` is the caller's opaque CSRF value, echoed back on the redirect.
pub fn build_authorization_url(
    config: &ClientConfig,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> Result<Url> {
    let endpoint = config.environment().authorize_endpoint();
    Url::parse_with_params(
        &endpoint,
        &[
            ("client_id", config.client_id()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", "openid offline_access"),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
            ("state", state),
        ],
    )
    .map_err(|e| Error::InvalidConfig(format!("authorization url for {endpoint}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;

    #[test]
    fn verifier_length_within_rfc_range() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 86);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier must be URL-safe base64: {verifier}"
        );
    }

    #[test]
    fn verifiers_differ() {
        assert_ne!(generate_verifier(), generate_verifier());
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") in base64url
        assert_eq!(
            compute_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }

    #[test]
    fn authorization_url_targets_realm() {
        let config = ClientConfig::new(Environment::Qa1, "tidepool-mobile").unwrap();
        let challenge = compute_challenge("verifier");
        let url = build_authorization_url(&config, "org.tidepool:/cb", "xyz", &challenge).unwrap();

        assert_eq!(url.host_str(), Some("auth.qa1.tidepool.org"));
        assert_eq!(url.path(), "/realms/qa1/protocol/openid-connect/auth");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("client_id".into(), "tidepool-mobile".into())));
        assert!(pairs.contains(&("redirect_uri".into(), "org.tidepool:/cb".into())));
        assert!(pairs.contains(&("code_challenge".into(), challenge)));
        assert!(pairs.contains(&("code_challenge_method".into(), "S256".into())));
        assert!(pairs.contains(&("state".into(), "xyz".into())));
    }
}
