//! Payment gateway capability.
//!
//! The gateway is driven in three steps: exchange the API key for a
//! short-lived auth token, register an order under our merchant order id
//! (the payment id), then exchange the order for a payment token the client
//! uses in the gateway's hosted iframe. Nothing here retries; the merchant
//! order id makes a repeated checkout refer to the same order upstream.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::Amount;
use crate::model::{PaymentKind, UserInfo};

mod paymob;
pub use paymob::PaymobClient;

/// Errors from gateway calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{endpoint}: request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint}: gateway responded {status}: {body}")]
    Upstream {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint}: invalid response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Short-lived token from [`PaymentGateway::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(pub String);

/// Gateway-side order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderId(pub i64);

/// Token the client hands to the gateway's payment iframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentToken(pub String);

/// Billing details the gateway requires on every payment token. Fields we do
/// not collect are sent as `"NA"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub apartment: String,
    pub floor: String,
    pub street: String,
    pub building: String,
    pub shipping_method: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
    pub state: String,
}

impl From<&UserInfo> for BillingData {
    fn from(info: &UserInfo) -> Self {
        let na = || "NA".to_string();
        let mut names = info.name.split_whitespace();
        let first_name = names.next().map_or_else(na, str::to_string);
        let rest = names.collect::<Vec<_>>().join(" ");
        let last_name = if rest.is_empty() { na() } else { rest };

        Self {
            first_name,
            last_name,
            email: info.email.clone(),
            phone_number: info.phone.clone(),
            apartment: na(),
            floor: na(),
            street: na(),
            building: na(),
            shipping_method: na(),
            postal_code: na(),
            city: na(),
            country: na(),
            state: na(),
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authenticate(&self) -> Result<AuthToken, GatewayError>;

    async fn create_order(
        &self,
        auth: &AuthToken,
        merchant_order_id: &str,
        kind: PaymentKind,
        amount: Amount,
    ) -> Result<OrderId, GatewayError>;

    async fn issue_payment_token(
        &self,
        auth: &AuthToken,
        order: OrderId,
        amount: Amount,
        billing: &BillingData,
    ) -> Result<PaymentToken, GatewayError>;

    /// Iframe the client renders the payment token in.
    fn iframe_id(&self) -> &str;

    /// Run the three calls for one payment.
    async fn checkout(
        &self,
        merchant_order_id: &str,
        kind: PaymentKind,
        amount: Amount,
        billing: &BillingData,
    ) -> Result<PaymentToken, GatewayError> {
        let auth = self.authenticate().await?;
        let order = self
            .create_order(&auth, merchant_order_id, kind, amount)
            .await?;
        self.issue_payment_token(&auth, order, amount, billing).await
    }
}
