//! The signed post-transaction callback a VASP sends to its counterparty's
//! `utxoCallback` URL once a payment settled.

use serde::{Deserialize, Serialize};

use super::{SignedMessage, join_payload, json_error, require_non_empty, require_payload_field};
use crate::error::UmaError;
use crate::services::UtxoWithAmount;
use crate::timestamp::UnixTimestamp;

/// Channel UTXOs a settled payment moved over, signed by the reporting VASP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostTransactionCallback {
    /// UTXOs and the millisatoshis moved over each.
    pub utxos: Vec<UtxoWithAmount>,
    /// Domain of the reporting VASP, used to fetch its public keys.
    pub vasp_domain: String,
    /// Hex signature over `vaspDomain|signatureNonce|signatureTimestamp`.
    pub signature: String,
    /// Replay-protection nonce.
    pub signature_nonce: String,
    /// Signing time.
    pub signature_timestamp: UnixTimestamp,
}

impl PostTransactionCallback {
    /// Parses and structurally validates a callback body.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error naming the offending field.
    pub fn parse(body: &[u8]) -> Result<Self, UmaError> {
        let callback: Self = serde_json::from_slice(body).map_err(|e| json_error(&e))?;
        callback.validate()?;
        Ok(callback)
    }

    /// Checks field domains that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error naming the offending field.
    pub fn validate(&self) -> Result<(), UmaError> {
        require_payload_field(&self.vasp_domain, "vaspDomain")?;
        require_non_empty(&self.signature, "signature")?;
        require_payload_field(&self.signature_nonce, "signatureNonce")?;
        if let Some(bad) = self.utxos.iter().find(|u| !u.utxo.contains(':')) {
            return Err(UmaError::malformed(
                "utxos",
                format!("{} is not <txid>:<output>", bad.utxo),
            ));
        }
        Ok(())
    }
}

impl SignedMessage for PostTransactionCallback {
    fn signable_payload(&self) -> String {
        join_payload(&[
            &self.vasp_domain,
            &self.signature_nonce,
            &self.signature_timestamp.to_string(),
        ])
    }

    fn signature(&self) -> &str {
        &self.signature
    }

    fn set_signature(&mut self, signature: String) {
        self.signature = signature;
    }

    fn nonce(&self) -> &str {
        &self.signature_nonce
    }

    fn timestamp(&self) -> UnixTimestamp {
        self.signature_timestamp
    }

    fn signer_domain(&self) -> &str {
        &self.vasp_domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::parse_public_key;
    use crate::keys::tests::test_key;

    fn callback() -> PostTransactionCallback {
        PostTransactionCallback {
            utxos: vec![UtxoWithAmount {
                utxo: "ab12:0".to_owned(),
                amount: 1_000_000,
            }],
            vasp_domain: "pay.example.com".to_owned(),
            signature: String::new(),
            signature_nonce: "99".to_owned(),
            signature_timestamp: UnixTimestamp::from_secs(1_700_000_020),
        }
    }

    #[test]
    fn signature_covers_domain_nonce_and_time() {
        let key = test_key(0x11);
        let public = parse_public_key(&key.public_key_hex()).unwrap();
        let mut cb = callback();
        cb.sign_with(&key);
        assert_eq!(cb.signable_payload(), "pay.example.com|99|1700000020");

        let parsed = PostTransactionCallback::parse(&serde_json::to_vec(&cb).unwrap()).unwrap();
        assert!(parsed.verify_with(&public));
        assert_eq!(parsed.signer_domain(), "pay.example.com");
    }

    #[test]
    fn malformed_utxos_are_rejected() {
        let mut cb = callback();
        cb.signature = "ab".to_owned();
        cb.utxos[0].utxo = "no-output-index".to_owned();
        let err = PostTransactionCallback::parse(&serde_json::to_vec(&cb).unwrap()).unwrap_err();
        assert_eq!(err.field(), Some("utxos"));
    }
}
