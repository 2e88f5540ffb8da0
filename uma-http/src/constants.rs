//! Well-known paths and header values of the UMA HTTP surface.

/// Path at which a VASP publishes its [`PubKeyResponse`](uma::keys::PubKeyResponse).
pub const LNURLPUBKEY_PATH: &str = "/.well-known/lnurlpubkey";

/// Path prefix of LNURLp discovery requests.
pub const LNURLP_PATH: &str = uma::proto::lnurlp::LNURLP_PATH;

/// Path at which a VASP describes its UMA endpoints.
pub const UMA_CONFIGURATION_PATH: &str = "/.well-known/uma-configuration";

/// Path prefix of PayRequest callbacks; the receiving user's id follows.
pub const PAYREQ_PATH: &str = uma::proto::payreq::PAYREQ_PATH;

/// Path prefix of plain LNURL pay callbacks; the receiving user's id follows.
pub const LNURL_PAYREQ_PATH: &str = uma::proto::payreq::LNURL_PAYREQ_PATH;

/// Path of the UTXO callback.
pub const UTXO_CALLBACK_PATH: &str = uma::proto::payreq::UTXO_CALLBACK_PATH;

/// Content type of every UMA request and response body.
pub const CONTENT_TYPE_JSON: &str = "application/json";
