//! OAuth 1.0a request signing for the streaming endpoint.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use crate::config::Credentials;
use crate::error::StreamError;

type HmacSha1 = Hmac<Sha1>;

/// Signs requests with user-context credentials.
#[derive(Debug, Clone)]
pub struct OAuthSigner {
    credentials: Credentials,
}

impl OAuthSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Build the `Authorization` header for a request.
    ///
    /// `params` are the query and form parameters of the request; they take
    /// part in the signature but are not copied into the header.
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<String, StreamError> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| StreamError::OAuth(format!("Failed to get timestamp: {e}")))?
            .as_secs()
            .to_string();

        self.sign_with(method, url, params, &generate_nonce(), &timestamp)
    }

    fn sign_with(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, StreamError> {
        let oauth_params = [
            ("oauth_consumer_key", self.credentials.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp),
            ("oauth_token", self.credentials.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        // Signature covers the encoded pairs sorted by key, then value
        let mut encoded: Vec<(String, String)> = oauth_params
            .iter()
            .chain(params.iter())
            .map(|(k, v)| (percent_encode(k), percent_encode(v)))
            .collect();
        encoded.sort();

        let param_string = encoded
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let base_string = format!(
            "{}&{}&{}",
            method.to_uppercase(),
            percent_encode(url),
            percent_encode(&param_string)
        );

        let signing_key = format!(
            "{}&{}",
            percent_encode(&self.credentials.consumer_secret),
            percent_encode(&self.credentials.access_secret)
        );

        let signature = hmac_sha1(&signing_key, &base_string)?;

        let header = oauth_params
            .iter()
            .chain(std::iter::once(&("oauth_signature", signature.as_str())))
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("OAuth {header}"))
    }
}

/// RFC 3986 encoding: everything but `A-Z a-z 0-9 - . _ ~` is escaped.
pub fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hmac_sha1(key: &str, data: &str) -> Result<String, StreamError> {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| StreamError::OAuth(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}
