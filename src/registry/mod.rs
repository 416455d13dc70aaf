//! Address registry client
//!
//! Pool startup can fetch a pre-registered address block from a remote
//! registry service. The API is a small JSON-over-HTTP surface:
//! `login` yields an auth token, `registerAddresses` claims a named
//! block, and `getAddresses` fetches an existing one. The endpoint for
//! each call is selected by an explicit [`Endpoint`] value; behavior is
//! never derived from call-site identity.

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::RegistryError;

/// HTTP request timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry API operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Exchange credentials for an auth token
    Login,
    /// Register a named address block, allocating addresses
    RegisterAddresses,
    /// Fetch the addresses of an existing block
    GetAddresses,
}

impl Endpoint {
    /// URL path segment for the operation
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::RegisterAddresses => "registerAddresses",
            Self::GetAddresses => "getAddresses",
        }
    }

    /// HTTP method for the operation
    #[must_use]
    pub const fn method(self) -> Method {
        match self {
            Self::Login | Self::RegisterAddresses => Method::POST,
            Self::GetAddresses => Method::GET,
        }
    }

    /// Whether the request must carry the auth token
    #[must_use]
    pub const fn requires_token(self) -> bool {
        !matches!(self, Self::Login)
    }
}

/// Response envelope shared by all registry endpoints
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    /// Application-level error message, if any
    error: Option<String>,
    /// Auth token (login only)
    #[serde(rename = "auth-token")]
    auth_token: Option<String>,
    /// Address block contents
    addresses: Option<Vec<String>>,
}

/// Client for the address registry service
pub struct RegistryClient {
    base_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
    token: Mutex<Option<String>>,
}

impl RegistryClient {
    /// Create a client for the registry at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base: String = base_url.into();
        Self {
            base_url: base.trim_end_matches('/').to_string(),
            client: Client::builder(TokioExecutor::new()).build_http(),
            token: Mutex::new(None),
        }
    }

    /// Authenticate and store the auth token for subsequent calls.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NoToken` when the server accepts the
    /// credentials but omits the token.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), RegistryError> {
        let body = serde_json::json!({
            "username": username,
            "password": password,
        });
        let resp = self.send(Endpoint::Login, body).await?;
        let token = resp.auth_token.ok_or(RegistryError::NoToken)?;
        *self.token.lock() = Some(token);
        debug!("Registry login successful");
        Ok(())
    }

    /// Register a named block of `count` addresses.
    ///
    /// # Errors
    ///
    /// Fails when the server reports an error (e.g. the block already
    /// exists) or the response carries no addresses.
    pub async fn register_addresses(
        &self,
        block: &str,
        count: usize,
    ) -> Result<Vec<Ipv4Addr>, RegistryError> {
        let body = serde_json::json!({
            "poolName": block,
            "count": count,
        });
        let resp = self.send(Endpoint::RegisterAddresses, body).await?;
        parse_addresses(resp)
    }

    /// Fetch the addresses of an existing block.
    pub async fn get_addresses(&self, block: &str) -> Result<Vec<Ipv4Addr>, RegistryError> {
        let body = serde_json::json!({ "poolName": block });
        let resp = self.send(Endpoint::GetAddresses, body).await?;
        parse_addresses(resp)
    }

    /// Register the block, falling back to fetching it when the
    /// registration is rejected (block already claimed).
    pub async fn fetch_block(
        &self,
        block: &str,
        count: usize,
    ) -> Result<Vec<Ipv4Addr>, RegistryError> {
        match self.register_addresses(block, count).await {
            Ok(addrs) => Ok(addrs),
            Err(RegistryError::Api(msg)) => {
                info!(
                    "Registration of block '{}' rejected ({}), fetching existing addresses",
                    block, msg
                );
                self.get_addresses(block).await
            }
            Err(e) => Err(e),
        }
    }

    /// Send one API request and decode the response envelope
    async fn send(
        &self,
        endpoint: Endpoint,
        mut body: serde_json::Value,
    ) -> Result<ApiEnvelope, RegistryError> {
        if endpoint.requires_token() {
            if let Some(token) = self.token.lock().clone() {
                body["auth-token"] = serde_json::Value::String(token);
            }
        }

        let uri = format!("{}/{}", self.base_url, endpoint.path());
        let body_json = serde_json::to_string(&body)?;

        let req = Request::builder()
            .method(endpoint.method())
            .uri(&uri)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body_json)))?;

        debug!("Registry request: {} {}", endpoint.path(), uri);

        let resp = tokio::time::timeout(HTTP_TIMEOUT, self.client.request(req))
            .await
            .map_err(|_| RegistryError::Network("request timeout".into()))?
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        let (parts, body) = resp.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| RegistryError::Network(e.to_string()))?
            .to_bytes();

        // 400s may still carry a structured error body worth surfacing.
        if let Ok(envelope) = serde_json::from_slice::<ApiEnvelope>(&bytes) {
            if let Some(error) = envelope.error {
                return Err(RegistryError::Api(error));
            }
            if parts.status.is_success() {
                return Ok(envelope);
            }
        } else if parts.status.is_success() {
            return Err(RegistryError::InvalidResponse(
                "server did not send back valid JSON".into(),
            ));
        }

        Err(RegistryError::Status {
            status: parts.status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.lock().is_some())
            .finish()
    }
}

/// Extract and parse the address list from a response envelope
fn parse_addresses(envelope: ApiEnvelope) -> Result<Vec<Ipv4Addr>, RegistryError> {
    let literals = envelope
        .addresses
        .ok_or_else(|| RegistryError::InvalidResponse("response lacks 'addresses'".into()))?;

    literals
        .iter()
        .map(|s| {
            s.parse().map_err(|_| {
                RegistryError::InvalidResponse(format!("'{s}' is not an IPv4 address"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_dispatch_table() {
        assert_eq!(Endpoint::Login.path(), "login");
        assert_eq!(Endpoint::RegisterAddresses.path(), "registerAddresses");
        assert_eq!(Endpoint::GetAddresses.path(), "getAddresses");

        assert_eq!(Endpoint::Login.method(), Method::POST);
        assert_eq!(Endpoint::GetAddresses.method(), Method::GET);

        assert!(!Endpoint::Login.requires_token());
        assert!(Endpoint::RegisterAddresses.requires_token());
        assert!(Endpoint::GetAddresses.requires_token());
    }

    #[test]
    fn test_parse_addresses() {
        let envelope: ApiEnvelope =
            serde_json::from_str(r#"{"addresses": ["10.0.0.5", "10.0.0.6"]}"#).unwrap();
        let addrs = parse_addresses(envelope).unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0], Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn test_parse_addresses_missing_field() {
        let envelope: ApiEnvelope = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            parse_addresses(envelope),
            Err(RegistryError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_addresses_bad_literal() {
        let envelope: ApiEnvelope =
            serde_json::from_str(r#"{"addresses": ["not-an-ip"]}"#).unwrap();
        assert!(parse_addresses(envelope).is_err());
    }

    #[test]
    fn test_base_url_normalization() {
        let client = RegistryClient::new("http://registry.local:8000///");
        assert_eq!(client.base_url, "http://registry.local:8000");
    }

    #[tokio::test]
    async fn test_login_against_local_stub() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Minimal one-shot HTTP server speaking just enough for login.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            let body = r#"{"auth-token": "tok-123"}"#;
            let resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(resp.as_bytes()).await.unwrap();
        });

        let client = RegistryClient::new(format!("http://{addr}"));
        client.login("admin", "password").await.unwrap();
        assert!(client.token.lock().is_some());

        server.await.unwrap();
    }
}
