//! Basic credentials and API-key bearer token exchange

use std::time::Duration;

use serde::Deserialize;

const TOKEN_PATH: &str = "/identity/token";
const APIKEY_GRANT: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// `USER:PASSWORD` credentials for HTTP basic authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::str::FromStr for BasicAuth {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((user, password)) if !user.is_empty() => Ok(Self {
                username: user.to_string(),
                password: password.to_string(),
            }),
            _ => Err(AuthError::MalformedBasic),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Token endpoint URL: the configured endpoint, with the token path appended
/// when only a host is given.
#[must_use]
pub fn token_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.ends_with(TOKEN_PATH) {
        endpoint.to_string()
    } else {
        format!("{endpoint}{TOKEN_PATH}")
    }
}

/// Exchange an API key for an access token.
///
/// # Errors
///
/// Returns error if the endpoint cannot be reached, rejects the key or
/// answers without an access token.
pub fn fetch_bearer_token(endpoint: &str, api_key: &str) -> Result<String, AuthError> {
    let url = token_url(endpoint);
    tracing::debug!(url = %url, "requesting bearer token");

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AuthError::Token(e.to_string()))?;

    let response = client
        .post(&url)
        .header("Accept", "application/json")
        .form(&[("grant_type", APIKEY_GRANT), ("apikey", api_key)])
        .send()
        .map_err(|e| AuthError::Token(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Token(format!("token endpoint returned {status}")));
    }
    let token: TokenResponse = response
        .json()
        .map_err(|e| AuthError::Token(format!("unexpected token response: {e}")))?;
    Ok(token.access_token)
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid auth value, expected USER:PASSWORD")]
    MalformedBasic,
    #[error("Problem getting bearer token: {0}")]
    Token(String),
}
