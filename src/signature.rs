//! HMAC-SHA512 verification of gateway callbacks.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;

use crate::callback::TransactionObj;

type HmacSha512 = Hmac<Sha512>;

/// Concatenate the signed fields of a transaction in the gateway's order.
///
/// The order is fixed by the gateway; any change here rejects every
/// legitimate callback. Missing fields contribute an empty string.
pub fn canonical_string(obj: &TransactionObj) -> String {
    fn field<T: ToString>(value: &Option<T>) -> String {
        value.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    let order_id = obj.order.as_ref().and_then(|order| order.id);
    let source = obj.source_data.clone().unwrap_or_default();

    [
        field(&obj.amount_cents),
        field(&obj.created_at),
        field(&obj.currency),
        field(&obj.error_occured),
        field(&obj.has_parent_transaction),
        field(&obj.id),
        field(&obj.integration_id),
        field(&obj.is_3d_secure),
        field(&obj.is_auth),
        field(&obj.is_capture),
        field(&obj.is_refunded),
        field(&obj.is_standalone_payment),
        field(&obj.is_voided),
        field(&order_id),
        field(&obj.owner),
        field(&obj.pending),
        field(&source.pan),
        field(&source.sub_type),
        field(&source.kind),
        field(&obj.success),
    ]
    .concat()
}

/// Checks callback signatures against the shared HMAC secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    mac: HmacSha512,
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Result<Self, InvalidLength> {
        Ok(Self {
            mac: HmacSha512::new_from_slice(secret.as_bytes())?,
        })
    }

    /// Lowercase hex signature of a transaction.
    pub fn sign(&self, obj: &TransactionObj) -> String {
        hex::encode(self.digest(obj))
    }

    /// Whether `signature` (hex, any case) matches the transaction.
    /// Comparison is constant-time.
    pub fn verify(&self, obj: &TransactionObj, signature: &str) -> bool {
        let Ok(provided) = hex::decode(signature.trim()) else {
            return false;
        };
        let expected = self.digest(obj);
        expected.as_slice().ct_eq(&provided).into()
    }

    fn digest(&self, obj: &TransactionObj) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(canonical_string(obj).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}
