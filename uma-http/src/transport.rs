//! A [`CounterpartyTransport`] that talks to other VASPs over HTTP.
//!
//! [`HttpTransport`] performs the three outbound exchanges of the handshake:
//! key discovery at `/.well-known/lnurlpubkey`, the LNURLp `GET`, and the
//! PayRequest `POST` to the receiver's callback.
//!
//! ## Error Handling
//!
//! - Requests that exceed the timeout map to [`TransportError::Timeout`]
//! - Non-200 answers carrying a UMA error body map to [`TransportError::Rejected`]
//! - Other non-200 answers map to [`TransportError::Status`]
//! - Undecodable key bundles map to [`TransportError::InvalidResponse`]
//! - Bodies larger than the configured cap map to [`TransportError::InvalidResponse`]

use std::fmt::Display;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use uma::error::UmaError;
use uma::keys::PubKeyResponse;
use uma::proto::scheme_for_domain;
use uma::transport::{CounterpartyTransport, TransportError};
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::constants::{CONTENT_TYPE_JSON, LNURLPUBKEY_PATH};

/// Default cap on counterparty response bodies: 1 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// HTTP client for counterparty VASPs.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    /// Shared Reqwest HTTP client
    client: Client,
    /// Optional per-request timeout
    timeout: Option<Duration>,
    /// Largest response body read before giving up
    max_body_bytes: usize,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            client: Client::default(),
            timeout: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl HttpTransport {
    /// Creates a transport with a default client and no timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `client` for all requests.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Caps the size of response bodies read from counterparties.
    #[must_use]
    pub const fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// URL of `vasp_domain`'s published key bundle.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the domain cannot form a URL.
    pub fn pubkey_url(vasp_domain: &str) -> Result<Url, TransportError> {
        let raw = format!("{}://{vasp_domain}{LNURLPUBKEY_PATH}", scheme_for_domain(vasp_domain));
        Url::parse(&raw).map_err(|e| TransportError::Network(format!("invalid vasp domain {vasp_domain}: {e}")))
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "uma.http.get", skip(self), fields(url = %url), err)
    )]
    async fn get_bytes(&self, url: &Url, context: &'static str) -> Result<Vec<u8>, TransportError> {
        let req = self.client.get(url.clone()).header(ACCEPT, CONTENT_TYPE_JSON);
        self.send(req, context).await
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "uma.http.post", skip(self, body), fields(url = %url), err)
    )]
    async fn post_bytes(
        &self,
        url: &Url,
        context: &'static str,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        let req = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(ACCEPT, CONTENT_TYPE_JSON)
            .body(body);
        self.send(req, context).await
    }

    /// Applies the timeout, sends, and maps the answer.
    ///
    /// `context` is a human-readable identifier used in error messages (e.g. `"GET lnurlp"`).
    async fn send(
        &self,
        mut req: RequestBuilder,
        context: &'static str,
    ) -> Result<Vec<u8>, TransportError> {
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req.send().await.map_err(|e| request_error(context, &e))?;

        let status = http_response.status();
        let result = match self.read_body(http_response, context).await {
            Ok(bytes) if status == StatusCode::OK => Ok(bytes),
            Ok(bytes) => {
                let body = String::from_utf8_lossy(&bytes).into_owned();
                Err(UmaError::from_response_body(&body).map_or(
                    TransportError::Status {
                        status: status.as_u16(),
                        body,
                    },
                    TransportError::Rejected,
                ))
            }
            Err(err) => Err(err),
        };

        record_failure(context, &result);
        result
    }

    /// Reads the body, refusing to buffer more than the configured cap.
    async fn read_body(
        &self,
        mut http_response: reqwest::Response,
        context: &'static str,
    ) -> Result<Vec<u8>, TransportError> {
        let too_large = || {
            TransportError::InvalidResponse(format!(
                "{context}: body exceeds {} bytes",
                self.max_body_bytes
            ))
        };
        if http_response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(too_large());
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = http_response
            .chunk()
            .await
            .map_err(|e| request_error(context, &e))?
        {
            if bytes.len() + chunk.len() > self.max_body_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

#[async_trait::async_trait]
impl CounterpartyTransport for HttpTransport {
    async fn fetch_public_keys(&self, vasp_domain: &str) -> Result<PubKeyResponse, TransportError> {
        let url = Self::pubkey_url(vasp_domain)?;
        let body = self.get_bytes(&url, "GET lnurlpubkey").await?;
        serde_json::from_slice(&body)
            .map_err(|e| TransportError::InvalidResponse(format!("GET lnurlpubkey: {e}")))
    }

    async fn send_lnurlp_request(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        self.get_bytes(url, "GET lnurlp").await
    }

    async fn send_pay_request(
        &self,
        callback: &Url,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        self.post_bytes(callback, "POST payreq", body).await
    }
}

fn request_error(context: &'static str, err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(format!("{context}: {err}"))
    } else {
        TransportError::Network(format!("{context}: {err}"))
    }
}

/// Logs a failed exchange. Noop if telemetry feature is off.
#[cfg(feature = "telemetry")]
fn record_failure<R, E: Display>(context: &'static str, result: &Result<R, E>) {
    if let Err(err) = result {
        tracing::event!(tracing::Level::WARN, error = %err, context, "request to counterparty failed");
    }
}

/// Logs a failed exchange. Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
const fn record_failure<R, E: Display>(_context: &'static str, _result: &Result<R, E>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use uma::error::FailureReason;
    use uma::keys::VaspSigningKey;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_domain(server: &MockServer) -> String {
        format!("localhost:{}", server.address().port())
    }

    #[test]
    fn pubkey_urls_follow_the_domain_scheme() {
        assert_eq!(
            HttpTransport::pubkey_url("receive.example.com").unwrap().as_str(),
            "https://receive.example.com/.well-known/lnurlpubkey"
        );
        assert_eq!(
            HttpTransport::pubkey_url("localhost:8080").unwrap().as_str(),
            "http://localhost:8080/.well-known/lnurlpubkey"
        );
    }

    #[tokio::test]
    async fn fetches_published_keys() {
        let server = MockServer::start().await;
        let key = VaspSigningKey::from_bytes(&[7; 32]).unwrap().public_key_hex();
        let bundle = PubKeyResponse::new(key.clone(), key);
        Mock::given(method("GET"))
            .and(path(LNURLPUBKEY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(&bundle))
            .expect(1)
            .mount(&server)
            .await;

        let fetched = HttpTransport::new()
            .fetch_public_keys(&local_domain(&server))
            .await
            .unwrap();
        assert_eq!(fetched, bundle);
    }

    #[tokio::test]
    async fn undecodable_key_bundles_are_invalid_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LNURLPUBKEY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"signingPubKey\":1}"))
            .mount(&server)
            .await;

        let err = HttpTransport::new()
            .fetch_public_keys(&local_domain(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
        assert_eq!(
            err.into_uma_error(FailureReason::KeyDiscoveryFailed).reason(),
            FailureReason::MalformedMessage
        );
    }

    #[tokio::test]
    async fn lnurlp_get_returns_the_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/lnurlp/$bob"))
            .and(query_param("nonce", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"tag\":\"payRequest\"}"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/.well-known/lnurlp/$bob?nonce=42", server.uri())).unwrap();
        let body = HttpTransport::new().send_lnurlp_request(&url).await.unwrap();
        assert_eq!(body, b"{\"tag\":\"payRequest\"}");
    }

    #[tokio::test]
    async fn uma_error_bodies_surface_as_rejections() {
        let server = MockServer::start().await;
        let remote = UmaError::new(FailureReason::ComplianceRejected, "vetoed");
        Mock::given(method("POST"))
            .and(path("/api/uma/payreq/u1"))
            .and(header("content-type", CONTENT_TYPE_JSON))
            .and(body_string("{}"))
            .respond_with(ResponseTemplate::new(403).set_body_json(remote.to_response_body()))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/api/uma/payreq/u1", server.uri())).unwrap();
        let err = HttpTransport::new()
            .send_pay_request(&url, b"{}".to_vec())
            .await
            .unwrap_err();
        match err {
            TransportError::Rejected(e) => assert_eq!(e, remote),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_failures_keep_their_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/.well-known/lnurlp/$bob", server.uri())).unwrap();
        let err = HttpTransport::new().send_lnurlp_request(&url).await.unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/.well-known/lnurlp/$bob", server.uri())).unwrap();
        let err = HttpTransport::new()
            .with_max_body_bytes(1024)
            .send_lnurlp_request(&url)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)), "{err:?}");

        let body = HttpTransport::new().send_lnurlp_request(&url).await.unwrap();
        assert_eq!(body.len(), 2048);
    }

    #[tokio::test]
    async fn slow_counterparties_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/.well-known/lnurlp/$bob", server.uri())).unwrap();
        let err = HttpTransport::new()
            .with_timeout(Duration::from_millis(50))
            .send_lnurlp_request(&url)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "{err:?}");
    }
}
