//! Typed schema of the gateway's transaction-processed callback.
//!
//! Fields the gateway sends beyond these are ignored. Only the fields that
//! take part in the signature are optional; the webhook decides what a
//! missing `obj` or correlation key means.

use serde::{Deserialize, Serialize};

use crate::model::PaymentId;

/// Body of a transaction callback: `{"type": "TRANSACTION", "obj": {...}}`.
///
/// Some gateway configurations embed the signature in the body instead of
/// the `hmac` query parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionCallback {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub obj: Option<TransactionObj>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionObj {
    pub id: Option<i64>,
    pub amount_cents: Option<i64>,
    pub created_at: Option<String>,
    pub currency: Option<String>,
    pub error_occured: Option<bool>,
    pub has_parent_transaction: Option<bool>,
    pub integration_id: Option<i64>,
    pub is_3d_secure: Option<bool>,
    pub is_auth: Option<bool>,
    pub is_capture: Option<bool>,
    pub is_refunded: Option<bool>,
    pub is_standalone_payment: Option<bool>,
    pub is_voided: Option<bool>,
    pub order: Option<OrderRef>,
    pub owner: Option<i64>,
    pub pending: Option<bool>,
    pub source_data: Option<SourceData>,
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRef {
    pub id: Option<i64>,
    pub merchant_order_id: Option<String>,
}

/// Payment-method fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceData {
    pub pan: Option<String>,
    pub sub_type: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl TransactionObj {
    /// Merchant order id we sent at order creation, if any.
    pub fn merchant_order_id(&self) -> Option<&str> {
        self.order
            .as_ref()
            .and_then(|order| order.merchant_order_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// The payment this transaction settles, when the correlation key is one
    /// of our payment ids.
    pub fn payment_id(&self) -> Option<PaymentId> {
        self.merchant_order_id()?.parse().ok()
    }

    pub fn succeeded(&self) -> bool {
        self.success.unwrap_or(false)
    }

    /// Gateway transaction id, as a string.
    pub fn external_txn_id(&self) -> Option<String> {
        self.id.map(|id| id.to_string())
    }
}
