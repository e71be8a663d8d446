use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AuthToken, BillingData, GatewayError, OrderId, PaymentGateway, PaymentToken};
use crate::Amount;
use crate::config::GatewayConfig;
use crate::model::PaymentKind;

#[derive(Serialize)]
struct AuthRequest<'a> {
    api_key: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Serialize)]
struct OrderRequest<'a> {
    auth_token: &'a str,
    delivery_needed: bool,
    amount_cents: i64,
    currency: &'a str,
    merchant_order_id: &'a str,
    items: Vec<OrderItem>,
}

/// One installment of the commission, as shown on the gateway's order.
#[derive(Serialize)]
struct OrderItem {
    name: String,
    amount_cents: i64,
    description: String,
    quantity: u32,
}

impl OrderItem {
    fn installment(kind: PaymentKind, amount: Amount) -> Self {
        Self {
            name: kind.to_string(),
            amount_cents: amount.cents(),
            description: format!("{kind} payment"),
            quantity: 1,
        }
    }
}

#[derive(Deserialize)]
struct OrderResponse {
    id: i64,
}

#[derive(Serialize)]
struct PaymentKeyRequest<'a> {
    auth_token: &'a str,
    amount_cents: i64,
    expiration: u64,
    order_id: i64,
    billing_data: &'a BillingData,
    currency: &'a str,
    integration_id: i64,
    lock_order_when_paid: bool,
}

/// [`PaymentGateway`] over the Paymob Accept HTTP API.
pub struct PaymobClient {
    http: Client,
    config: GatewayConfig,
}

impl PaymobClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(GatewayError::Client)?;
        Ok(Self { http, config })
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned + Send>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<R, GatewayError> {
        let url = format!("{}/{endpoint}", self.config.base_url.trim_end_matches('/'));
        debug!(endpoint, "calling payment gateway");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| GatewayError::Transport { endpoint, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint, status = status.as_u16(), body = %body, "payment gateway call failed");
            return Err(GatewayError::Upstream {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|source| GatewayError::Decode { endpoint, source })
    }
}

#[async_trait]
impl PaymentGateway for PaymobClient {
    async fn authenticate(&self) -> Result<AuthToken, GatewayError> {
        let response: TokenResponse = self
            .post(
                "auth/tokens",
                &AuthRequest {
                    api_key: &self.config.api_key,
                },
            )
            .await?;
        Ok(AuthToken(response.token))
    }

    async fn create_order(
        &self,
        auth: &AuthToken,
        merchant_order_id: &str,
        kind: PaymentKind,
        amount: Amount,
    ) -> Result<OrderId, GatewayError> {
        let response: OrderResponse = self
            .post(
                "ecommerce/orders",
                &OrderRequest {
                    auth_token: &auth.0,
                    delivery_needed: false,
                    amount_cents: amount.cents(),
                    currency: &self.config.currency,
                    merchant_order_id,
                    items: vec![OrderItem::installment(kind, amount)],
                },
            )
            .await?;
        Ok(OrderId(response.id))
    }

    async fn issue_payment_token(
        &self,
        auth: &AuthToken,
        order: OrderId,
        amount: Amount,
        billing: &BillingData,
    ) -> Result<PaymentToken, GatewayError> {
        let response: TokenResponse = self
            .post(
                "acceptance/payment_keys",
                &PaymentKeyRequest {
                    auth_token: &auth.0,
                    amount_cents: amount.cents(),
                    expiration: self.config.token_expiration_secs,
                    order_id: order.0,
                    billing_data: billing,
                    currency: &self.config.currency,
                    integration_id: self.config.integration_id,
                    lock_order_when_paid: true,
                },
            )
            .await?;
        Ok(PaymentToken(response.token))
    }

    fn iframe_id(&self) -> &str {
        &self.config.iframe_id
    }
}
