//! Request signing.
//!
//! Three security levels are supported:
//! 1. Public: query string only
//! 2. Key-authenticated: query string plus the `X-MBX-APIKEY` header
//! 3. Signed: key header, a `timestamp` parameter, and a trailing
//!    `signature` parameter holding the hex HMAC-SHA256 of the exact query
//!    string that precedes it
//!
//! The signer only describes requests; [`crate::ExchangeClient`] sends them.

use crate::error::{RestError, RestResult};
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

// =============================================================================
// Credentials
// =============================================================================

/// API key pair.
///
/// Both halves live in zeroizing buffers and never appear in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    api_key: Zeroizing<String>,
    api_secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: Zeroizing::new(api_key.into()),
            api_secret: Zeroizing::new(api_secret.into()),
        }
    }

    /// Load the key pair from two environment variables.
    pub fn from_env(key_var: &str, secret_var: &str) -> RestResult<Self> {
        let api_key =
            std::env::var(key_var).map_err(|_| RestError::EnvVarNotFound(key_var.to_string()))?;
        let api_secret = std::env::var(secret_var)
            .map_err(|_| RestError::EnvVarNotFound(secret_var.to_string()))?;
        Ok(Self::new(api_key.trim(), api_secret.trim()))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn api_secret(&self) -> &[u8] {
        self.api_secret.as_bytes()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key_hint: String = self.api_key.chars().take(4).collect();
        f.debug_struct("Credentials")
            .field("api_key", &format_args!("{key_hint}***"))
            .field("api_secret", &format_args!("<redacted>"))
            .finish()
    }
}

// =============================================================================
// Request description
// =============================================================================

/// Everything needed to issue one HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub base_url: String,
    pub path: String,
    /// Encoded query string without the leading `?` (may be empty).
    pub query: String,
    pub headers: Vec<(String, String)>,
}

impl RequestDescriptor {
    /// Full request URL.
    pub fn url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.query.is_empty() {
            format!("{base}{}", self.path)
        } else {
            format!("{base}{}?{}", self.path, self.query)
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// =============================================================================
// Signer
// =============================================================================

/// Builds request descriptors against one API host.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    base_url: String,
    credentials: Option<Credentials>,
}

impl RequestSigner {
    /// Signer for public endpoints only.
    pub fn public_only(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: None,
        }
    }

    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: Some(credentials),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Unauthenticated request. Parameters keep caller order.
    pub fn public(&self, method: Method, path: &str, params: &[(&str, &str)]) -> RequestDescriptor {
        RequestDescriptor {
            method,
            base_url: self.base_url.clone(),
            path: path.to_string(),
            query: build_query(params),
            headers: Vec::new(),
        }
    }

    /// Request carrying the API key header.
    pub fn keyed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> RestResult<RequestDescriptor> {
        let credentials = self.require_credentials(path)?;
        let mut request = self.public(method, path, params);
        request
            .headers
            .push((API_KEY_HEADER.to_string(), credentials.api_key().to_string()));
        Ok(request)
    }

    /// Signed request stamped with the current wall-clock time.
    pub fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> RestResult<RequestDescriptor> {
        self.signed_at(method, path, params, chrono::Utc::now().timestamp_millis())
    }

    /// Signed request with an explicit timestamp (ms).
    pub fn signed_at(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        timestamp_ms: i64,
    ) -> RestResult<RequestDescriptor> {
        let credentials = self.require_credentials(path)?;
        let mut request = self.keyed(method, path, params)?;

        let timestamp = timestamp_ms.to_string();
        if !request.query.is_empty() {
            request.query.push('&');
        }
        request.query.push_str("timestamp=");
        request.query.push_str(&timestamp);

        let signature = sign(credentials.api_secret(), &request.query)?;
        request.query.push_str("&signature=");
        request.query.push_str(&signature);

        Ok(request)
    }

    fn require_credentials(&self, path: &str) -> RestResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| RestError::MissingCredentials(path.to_string()))
    }
}

/// Lower-case hex HMAC-SHA256 of `payload`.
fn sign(secret: &[u8], payload: &str) -> RestResult<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| RestError::Signing(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn build_query(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode a query component.
///
/// Leaves `A-Z a-z 0-9 - _ . ! ~ * ' ( )` as is and encodes every other
/// UTF-8 byte as `%XX`, matching JavaScript's `encodeURIComponent`.
pub fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // Published example key pair from the exchange API documentation.
    const DOC_API_KEY: &str = "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A";
    const DOC_SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";

    fn doc_signer() -> RequestSigner {
        RequestSigner::new(
            "https://api.binance.com",
            Credentials::new(DOC_API_KEY, DOC_SECRET),
        )
    }

    const ORDER_PARAMS: &[(&str, &str)] = &[
        ("symbol", "LTCBTC"),
        ("side", "BUY"),
        ("type", "LIMIT"),
        ("timeInForce", "GTC"),
        ("quantity", "1"),
        ("price", "0.1"),
        ("recvWindow", "5000"),
    ];

    #[test]
    fn test_signed_matches_documented_vector() {
        let request = doc_signer()
            .signed_at(Method::POST, "/api/v3/order", ORDER_PARAMS, 1499827319559)
            .unwrap();

        assert_eq!(
            request.query,
            "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1\
             &recvWindow=5000&timestamp=1499827319559\
             &signature=c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
        assert_eq!(request.header(API_KEY_HEADER), Some(DOC_API_KEY));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let signer = doc_signer();
        let a = signer
            .signed_at(Method::GET, "/api/v3/account", &[], 1_700_000_000_000)
            .unwrap();
        let b = signer
            .signed_at(Method::GET, "/api/v3/account", &[], 1_700_000_000_000)
            .unwrap();
        assert_eq!(a, b);
        assert!(a.query.starts_with("timestamp=1700000000000&signature="));
        // 32-byte digest, lower-case hex
        let signature = a.query.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_public_request_has_no_headers() {
        let request = doc_signer().public(
            Method::GET,
            "/api/v3/ticker/24hr",
            &[("symbol", "BNBBTC")],
        );
        assert!(request.headers.is_empty());
        assert_eq!(
            request.url(),
            "https://api.binance.com/api/v3/ticker/24hr?symbol=BNBBTC"
        );
    }

    #[test]
    fn test_keyed_request_without_credentials_fails() {
        let signer = RequestSigner::public_only("https://api.binance.com");
        let err = signer
            .keyed(Method::POST, "/api/v3/userDataStream", &[])
            .unwrap_err();
        assert!(matches!(err, RestError::MissingCredentials(_)));
    }

    #[test]
    fn test_encode_component_matches_uri_component_rules() {
        assert_eq!(encode_component("AZaz09-_.!~*'()"), "AZaz09-_.!~*'()");
        assert_eq!(encode_component("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(encode_component("[\"BTCUSDT\"]"), "%5B%22BTCUSDT%22%5D");
        assert_eq!(encode_component("é"), "%C3%A9");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", Credentials::new(DOC_API_KEY, DOC_SECRET));
        assert!(!rendered.contains(DOC_SECRET));
        assert!(!rendered.contains(DOC_API_KEY));
        assert!(rendered.contains("vmPU***"));
    }
}
