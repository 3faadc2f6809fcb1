//! Application-only bearer token exchange (OAuth 2 client credentials).

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::TokenError;

pub const TOKEN_ENDPOINT: &str = "https://api.twitter.com/oauth2/token";

/// A bearer token for read-only API calls.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken([redacted])")
    }
}

/// Decoded body of the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenResponse {
    Success(BearerToken),
    ApiError(String),
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    token_type: Option<Value>,
    access_token: Option<Value>,
    errors: Option<Value>,
}

impl TokenResponse {
    pub fn decode(body: &[u8]) -> Self {
        let raw: RawTokenResponse = match serde_json::from_slice(body) {
            Ok(raw) => raw,
            Err(e) => return Self::Malformed(format!("invalid JSON: {e}")),
        };

        if let Some(errors) = raw.errors {
            return Self::ApiError(describe_errors(&errors));
        }

        match raw.token_type.as_ref().and_then(Value::as_str) {
            Some("bearer") => {}
            Some(other) => return Self::Malformed(format!("invalid token type: {other}")),
            None => return Self::Malformed("token type missing".to_string()),
        }

        match raw.access_token {
            Some(Value::String(token)) => Self::Success(BearerToken(token)),
            _ => Self::Malformed("access token not present in response".to_string()),
        }
    }

    pub fn into_result(self) -> Result<BearerToken, TokenError> {
        match self {
            Self::Success(token) => Ok(token),
            Self::ApiError(message) => Err(TokenError::Api(message)),
            Self::Malformed(message) => Err(TokenError::Malformed(message)),
        }
    }
}

/// A single `{"message": ...}` entry yields its message, anything else is
/// rendered as JSON.
fn describe_errors(errors: &Value) -> String {
    if let Some([only]) = errors.as_array().map(Vec::as_slice) {
        if let Some(message) = only.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    format!("failed to obtain token: {errors}")
}

/// Exchange API key and secret for a bearer token.
pub async fn obtain_bearer_token(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    api_secret: &str,
) -> Result<BearerToken, TokenError> {
    let response = client
        .post(endpoint)
        .basic_auth(api_key, Some(api_secret))
        .form(&[("grant_type", "client_credentials")])
        .send()
        .await?;

    // Error payloads come with non-2xx statuses, so decode regardless
    let body = response.bytes().await?;
    TokenResponse::decode(&body).into_result()
}
