//! Axum route handlers for the receiving VASP.
//!
//! Exposes the UMA receiving surface: LNURLp discovery (with a plain LNURL
//! fallback for wallets that do not speak UMA), the PayRequest callbacks, the
//! UTXO callback, key publication, the UMA configuration document, and the
//! node operator webhook.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use uma::UmaError;
use uma::handshake::ReceivingVasp;
use uma::keys::PubKeyResponse;
use uma::proto::version::supported_major_versions;
use uma::proto::{LnurlInvoiceResponse, LnurlpRequest, PayReqResponse};
use uma::webhook::{WEBHOOK_SIGNATURE_HEADER, verify_and_parse_webhook};
use uma_http::constants::{
    LNURL_PAYREQ_PATH, LNURLP_PATH, LNURLPUBKEY_PATH, PAYREQ_PATH, UMA_CONFIGURATION_PATH,
    UTXO_CALLBACK_PATH,
};
use url::Url;

use crate::error::VaspError;

/// Shared application state of the server.
#[derive(Debug)]
pub struct AppState {
    receiver: ReceivingVasp,
    webhook_secret: Option<String>,
}

impl AppState {
    /// Wraps `receiver`; webhooks are refused until a secret is set.
    #[must_use]
    pub const fn new(receiver: ReceivingVasp) -> Self {
        Self {
            receiver,
            webhook_secret: None,
        }
    }

    /// Enables webhooks authenticated with `secret`.
    #[must_use]
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Rebuilds the absolute URL a counterparty requested.
    ///
    /// The authority is this VASP's domain rather than the `Host` header, so
    /// the receiver address seen by the handshake is always our own.
    fn request_url(&self, uri: &Uri) -> Result<Url, UmaError> {
        let path = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
        let raw = format!("{}{path}", self.receiver.identity().base_url());
        Url::parse(&raw).map_err(|e| UmaError::malformed("url", e.to_string()))
    }
}

/// Shared handle to [`AppState`].
pub type VaspState = Arc<AppState>;

/// Document served at `/.well-known/uma-configuration`.
#[derive(Debug, Clone, Serialize)]
pub struct UmaConfiguration {
    /// Protocol major versions this VASP speaks.
    pub uma_major_versions: Vec<u16>,
}

/// `GET /.well-known/lnurlp/{username}` - Answers an LNURLp discovery request.
///
/// Requests without any UMA query parameter get a plain LNURL pay offer.
/// Requests carrying some of them are parsed strictly as UMA.
///
/// # Errors
///
/// Returns the handshake failure mapped to its HTTP status.
pub async fn get_lnurlp(
    State(state): State<VaspState>,
    Path(username): Path<String>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, VaspError> {
    let url = state.request_url(&uri)?;
    if !LnurlpRequest::has_uma_parameters(&url) {
        let offer = state.receiver.handle_plain_lnurlp_request(&username).await?;
        return Ok(Json(offer).into_response());
    }
    let response = state.receiver.handle_lnurlp_request(&url).await?;
    Ok(Json(response).into_response())
}

/// `GET /api/lnurl/payreq/{user_id}?amount=<msats>` - Issues an invoice to a
/// plain LNURL wallet.
///
/// # Errors
///
/// Returns 400 for a missing or non-numeric amount, otherwise the handshake
/// failure mapped to its HTTP status.
pub async fn get_plain_pay_request(
    State(state): State<VaspState>,
    Path(user_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<LnurlInvoiceResponse>, VaspError> {
    let amount_msats = params
        .get("amount")
        .ok_or_else(|| UmaError::malformed("amount", "missing amount"))?
        .parse::<u64>()
        .map_err(|e| UmaError::malformed("amount", e.to_string()))?;
    let response = state
        .receiver
        .handle_plain_pay_request(&user_id, amount_msats)
        .await?;
    Ok(Json(response))
}

/// `POST /api/uma/payreq/{user_id}` - Answers a PayRequest with a signed invoice.
///
/// The body is passed through untouched so the codec parses it strictly.
///
/// # Errors
///
/// Returns the handshake failure mapped to its HTTP status.
pub async fn post_pay_request(
    State(state): State<VaspState>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<Json<PayReqResponse>, VaspError> {
    let response = state.receiver.handle_pay_request(&user_id, &body).await?;
    Ok(Json(response))
}

/// `POST /api/uma/utxoCallback?txId=<id>` - Accepts a counterparty's signed
/// report of the UTXOs a settled payment used.
///
/// # Errors
///
/// Returns the handshake failure mapped to its HTTP status.
pub async fn post_utxo_callback(
    State(state): State<VaspState>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, VaspError> {
    state
        .receiver
        .handle_post_transaction_callback(params.get("txId").map(String::as_str), &body)
        .await?;
    Ok(Json(serde_json::json!({ "status": "OK" })))
}

/// `GET /.well-known/lnurlpubkey` - Publishes this VASP's keys.
pub async fn get_pub_keys(State(state): State<VaspState>) -> Json<PubKeyResponse> {
    Json(state.receiver.pub_key_response())
}

/// `GET /.well-known/uma-configuration` - Advertises supported versions.
pub async fn get_uma_configuration() -> Json<UmaConfiguration> {
    Json(UmaConfiguration {
        uma_major_versions: supported_major_versions().to_vec(),
    })
}

/// `POST /api/webhooks` - Accepts a signed node operator webhook.
///
/// # Errors
///
/// Returns 404 when webhooks are disabled, 401 when the signature header is
/// missing or wrong, and 400 for an unreadable event.
pub async fn post_webhook(
    State(state): State<VaspState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, VaspError> {
    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or(VaspError::WebhooksDisabled)?;
    let digest = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(VaspError::MissingHeader(WEBHOOK_SIGNATURE_HEADER))?;
    let event = verify_and_parse_webhook(&body, digest, secret)?;
    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.event_id,
        entity_id = %event.entity_id,
        "received webhook"
    );
    Ok(Json(serde_json::json!({ "status": "OK" })))
}

/// Builds the router of the receiving VASP.
pub fn vasp_router(state: VaspState) -> axum::Router {
    axum::Router::new()
        .route(&format!("{LNURLP_PATH}{{username}}"), get(get_lnurlp))
        .route(&format!("{PAYREQ_PATH}{{user_id}}"), post(post_pay_request))
        .route(
            &format!("{LNURL_PAYREQ_PATH}{{user_id}}"),
            get(get_plain_pay_request),
        )
        .route(UTXO_CALLBACK_PATH, post(post_utxo_callback))
        .route(LNURLPUBKEY_PATH, get(get_pub_keys))
        .route(UMA_CONFIGURATION_PATH, get(get_uma_configuration))
        .route("/api/webhooks", post(post_webhook))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use uma::config::VaspIdentity;
    use uma::handshake::KeyResolver;
    use uma::FailureReason;
    use uma::keys::{VaspSigningKey, generate_nonce, parse_public_key};
    use uma::nonce::InMemoryNonceValidator;
    use uma::proto::{
        CompliancePayerData, KycStatus, PayRequest, PayerData, PostTransactionCallback,
        SignedMessage, UmaAddress,
    };
    use uma::services::UtxoWithAmount;
    use uma::pubkey_cache::{InMemoryPublicKeyCache, PublicKeyCache};
    use uma::timestamp::UnixTimestamp;
    use uma::transport::{CounterpartyTransport, TransportError};

    use super::*;
    use crate::config::VaspConfig;
    use crate::demo::{BlockListCompliance, ConfiguredUsers, PlaceholderInvoices};

    const RECEIVER: &str = "localhost:8080";
    const SENDER: &str = "pay.example.com";

    /// Transport that knows no counterparty; keys are pre-seeded in the cache.
    #[derive(Debug)]
    struct Offline;

    #[async_trait::async_trait]
    impl CounterpartyTransport for Offline {
        async fn fetch_public_keys(&self, vasp_domain: &str) -> Result<PubKeyResponse, TransportError> {
            Err(TransportError::Network(format!("{vasp_domain} unreachable")))
        }

        async fn send_lnurlp_request(&self, _url: &Url) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Network("offline".into()))
        }

        async fn send_pay_request(&self, _callback: &Url, _body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Network("offline".into()))
        }
    }

    fn sender_key() -> VaspSigningKey {
        VaspSigningKey::from_bytes(&[0x11; 32]).unwrap()
    }

    fn router(webhook_secret: Option<&str>) -> axum::Router {
        let config = VaspConfig::from_toml(
            r#"
            [[currencies]]
            code = "SAT"
            name = "Satoshis"
            symbol = "SAT"
            multiplier = 1000
            minSendable = 1
            maxSendable = 100000000

            [[users]]
            id = "u-bob"
            uma_user_name = "bob"
            kyc_status = "VERIFIED"
            "#,
            |_| None,
        )
        .unwrap();

        let cache = Arc::new(InMemoryPublicKeyCache::new());
        let sender_pub = sender_key().public_key_hex();
        cache.add_public_key_for_vasp(SENDER, PubKeyResponse::new(sender_pub.clone(), sender_pub));

        let identity = VaspIdentity::new(RECEIVER, VaspSigningKey::from_bytes(&[0x22; 32]).unwrap());
        let receiver = ReceivingVasp::new(
            identity,
            KeyResolver::new(cache, Arc::new(Offline), Duration::from_secs(1)),
            Arc::new(InMemoryNonceValidator::default()),
            Arc::new(ConfiguredUsers::from_config(&config).unwrap()),
            Arc::new(BlockListCompliance::default()),
            Arc::new(PlaceholderInvoices::default()),
        );
        let state = match webhook_secret {
            Some(secret) => AppState::new(receiver).with_webhook_secret(secret),
            None => AppState::new(receiver),
        };
        vasp_router(Arc::new(state))
    }

    fn lnurlp_path(receiver_address: &str) -> String {
        let mut request = LnurlpRequest::new(
            UmaAddress::parse(receiver_address).unwrap(),
            SENDER,
            generate_nonce(),
            UnixTimestamp::now(),
        );
        request.sign_with(&sender_key());
        let url = request.encode_to_url().unwrap();
        format!("{}?{}", url.path(), url.query().unwrap_or_default())
    }

    async fn send(router: axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn publishes_keys_and_configuration() {
        let (status, body) = send(
            router(None),
            Request::get(LNURLPUBKEY_PATH).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["signingPubKey"],
            VaspSigningKey::from_bytes(&[0x22; 32]).unwrap().public_key_hex()
        );

        let (status, body) = send(
            router(None),
            Request::get(UMA_CONFIGURATION_PATH).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uma_major_versions"], serde_json::json!([0]));
    }

    #[tokio::test]
    async fn answers_a_signed_lnurlp_request() {
        let path = lnurlp_path(&format!("$bob@{RECEIVER}"));
        let (status, body) = send(router(None), Request::get(path).body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["tag"], "payRequest");
        assert_eq!(body["callback"], format!("http://{RECEIVER}/api/uma/payreq/u-bob"));
        assert_eq!(body["compliance"]["receiverIdentifier"], format!("$bob@{RECEIVER}"));
    }

    #[tokio::test]
    async fn replayed_lnurlp_request_is_a_conflict() {
        let router = router(None);
        let path = lnurlp_path(&format!("$bob@{RECEIVER}"));
        let first = send(router.clone(), Request::get(&path).body(Body::empty()).unwrap()).await;
        assert_eq!(first.0, StatusCode::OK);

        let (status, body) = send(router, Request::get(&path).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["reason"], FailureReason::NonceReplay.as_str());
        assert_eq!(body["field"], "nonce");
    }

    #[tokio::test]
    async fn unknown_users_are_not_found() {
        let path = lnurlp_path(&format!("$carol@{RECEIVER}"));
        let (status, body) = send(router(None), Request::get(path).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["reason"], "user_not_found");
    }

    #[tokio::test]
    async fn partially_signed_lnurlp_requests_are_malformed() {
        let (status, body) = send(
            router(None),
            Request::get("/.well-known/lnurlp/bob?nonce=1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "malformed_message");
    }

    #[tokio::test]
    async fn plain_lnurlp_requests_get_a_plain_offer() {
        let (status, body) = send(
            router(None),
            Request::get("/.well-known/lnurlp/bob").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["tag"], "payRequest");
        assert_eq!(body["callback"], format!("http://{RECEIVER}/api/lnurl/payreq/u-bob"));
        assert_eq!(body["minSendable"], 1_000);
        assert!(body.get("compliance").is_none());
    }

    #[tokio::test]
    async fn plain_pay_requests_return_an_invoice() {
        let (status, body) = send(
            router(None),
            Request::get("/api/lnurl/payreq/u-bob?amount=5000").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["pr"].as_str().unwrap().starts_with("lnbcrt5000msat"));
        assert_eq!(body["routes"], serde_json::json!([]));

        let (status, body) = send(
            router(None),
            Request::get("/api/lnurl/payreq/u-bob").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "amount");
    }

    fn signed_pay_request(nonce: &str) -> Vec<u8> {
        let mut request = PayRequest {
            currency: "SAT".to_owned(),
            amount: 1_000,
            payer_data: PayerData {
                identifier: format!("$alice@{SENDER}"),
                name: Some("Alice".to_owned()),
                email: None,
                compliance: CompliancePayerData {
                    utxos: Vec::new(),
                    node_pub_key: None,
                    kyc_status: KycStatus::Verified,
                    travel_rule_info: None,
                    signature: String::new(),
                    signature_nonce: nonce.to_owned(),
                    signature_timestamp: UnixTimestamp::now(),
                    utxo_callback: format!("https://{SENDER}/api/uma/utxoCallback"),
                },
            },
        };
        request.sign_with(&sender_key());
        serde_json::to_vec(&request).unwrap()
    }

    #[tokio::test]
    async fn signed_pay_requests_return_a_signed_invoice() {
        let (status, body) = send(
            router(None),
            Request::post("/api/uma/payreq/u-bob")
                .header("content-type", "application/json")
                .body(Body::from(signed_pay_request(&generate_nonce())))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let response: PayReqResponse = serde_json::from_value(body).unwrap();
        assert!(response.encoded_invoice.starts_with("lnbcrt1000000msat"));
        assert_eq!(response.compliance.payee_identifier, format!("$bob@{RECEIVER}"));
        assert!(response
            .compliance
            .utxo_callback
            .starts_with(&format!("http://{RECEIVER}/api/uma/utxoCallback?txId=")));
        let receiver_key = VaspSigningKey::from_bytes(&[0x22; 32]).unwrap().public_key_hex();
        assert!(response.verify_with(&parse_public_key(&receiver_key).unwrap()));
    }

    fn utxo_callback(key: &VaspSigningKey) -> Vec<u8> {
        let mut callback = PostTransactionCallback {
            utxos: vec![UtxoWithAmount {
                utxo: "ab12:0".to_owned(),
                amount: 1_000_000,
            }],
            vasp_domain: SENDER.to_owned(),
            signature: String::new(),
            signature_nonce: generate_nonce(),
            signature_timestamp: UnixTimestamp::now(),
        };
        callback.sign_with(key);
        serde_json::to_vec(&callback).unwrap()
    }

    #[tokio::test]
    async fn signed_utxo_callbacks_are_accepted() {
        let (status, body) = send(
            router(None),
            Request::post("/api/uma/utxoCallback?txId=tx-1")
                .header("content-type", "application/json")
                .body(Body::from(utxo_callback(&sender_key())))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "OK");
    }

    #[tokio::test]
    async fn forged_utxo_callbacks_are_refused() {
        let forger = VaspSigningKey::from_bytes(&[0x44; 32]).unwrap();
        let (status, _) = send(
            router(None),
            Request::post("/api/uma/utxoCallback?txId=tx-1")
                .header("content-type", "application/json")
                .body(Body::from(utxo_callback(&forger)))
                .unwrap(),
        )
        .await;
        // the cached key is evicted and rediscovery has no network
        assert_eq!(status, StatusCode::FAILED_DEPENDENCY);
    }

    #[tokio::test]
    async fn garbage_pay_requests_are_malformed() {
        let (status, body) = send(
            router(None),
            Request::post("/api/uma/payreq/u-bob")
                .header("content-type", "application/json")
                .body(Body::from("{\"currency\":"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "malformed_message");
    }

    const WEBHOOK_BODY: &str = r#"{"event_type": "NODE_STATUS", "event_id": "1615c8be5aa44e429eba700db2ed8ca5", "timestamp": "2023-05-17T23:56:47.874449+00:00", "entity_id": "lightning_node:01882c25-157a-f96b-0000-362d42b64397"}"#;
    const WEBHOOK_DIGEST: &str = "62a8829aeb48b4142533520b1f7f86cdb1ee7d718bf3ea15bc1c662d4c453b74";
    const WEBHOOK_SECRET: &str = "3gZ5oQQUASYmqQNuEk0KambNMVkOADDItIJjzUlAWjX";

    fn webhook(digest: Option<&str>) -> Request<Body> {
        let builder = Request::post("/api/webhooks");
        let builder = match digest {
            Some(d) => builder.header(WEBHOOK_SIGNATURE_HEADER, d),
            None => builder,
        };
        builder.body(Body::from(WEBHOOK_BODY)).unwrap()
    }

    #[tokio::test]
    async fn signed_webhooks_are_accepted() {
        let (status, body) = send(router(Some(WEBHOOK_SECRET)), webhook(Some(WEBHOOK_DIGEST))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
    }

    #[tokio::test]
    async fn unsigned_or_forged_webhooks_are_refused() {
        let (status, _) = send(router(Some(WEBHOOK_SECRET)), webhook(None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let forged = "a".repeat(64);
        let (status, _) = send(router(Some(WEBHOOK_SECRET)), webhook(Some(&forged))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(router(None), webhook(Some(WEBHOOK_DIGEST))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
