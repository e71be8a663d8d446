//! Line-oriented front end for the binary.
//!
//! Each input line is one JSON request, tagged by `op`:
//!
//! ```text
//! {"op":"deposit","caller":{"user_id":"u1"},"asset_id":"…","user_info":{…}}
//! {"op":"remaining","caller":{"user_id":"u1"},"booking_id":"…"}
//! {"op":"booking","caller":{"user_id":"u1"},"booking_id":"…"}
//! {"op":"webhook","hmac":"…","body":{"type":"TRANSACTION","obj":{…}}}
//! ```
//!
//! Each request produces exactly one JSON response line.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::model::{AssetId, Booking, BookingId, UserInfo};
use crate::service::{
    BookingService, Caller, DepositCheckout, DepositRequest, ErrorCode, RemainingCheckout,
    ServiceError,
};
use crate::webhook::WebhookProcessor;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Deposit {
        #[serde(default)]
        caller: Caller,
        asset_id: AssetId,
        user_info: UserInfo,
    },
    Remaining {
        #[serde(default)]
        caller: Caller,
        booking_id: BookingId,
    },
    Booking {
        #[serde(default)]
        caller: Caller,
        booking_id: BookingId,
    },
    Webhook {
        /// Signature as the gateway sends it in the query string
        #[serde(default)]
        hmac: Option<String>,
        body: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Deposit(DepositCheckout),
    Remaining(RemainingCheckout),
    Booking(Booking),
    /// HTTP status a webhook would have answered with
    Status(u16),
    Error(ServiceError),
}

pub struct App {
    service: BookingService,
    webhooks: WebhookProcessor,
}

impl App {
    pub fn new(service: BookingService, webhooks: WebhookProcessor) -> Self {
        Self { service, webhooks }
    }

    /// Answer every line of `lines` on `out` until the stream ends
    pub async fn run(
        &self,
        mut lines: impl Stream<Item = String> + Unpin,
        mut out: impl Write,
    ) -> io::Result<()> {
        while let Some(line) = lines.next().await {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line).await;
            serde_json::to_writer(&mut out, &response)?;
            writeln!(out)?;
            out.flush()?;
        }
        Ok(())
    }

    pub async fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                warn!(reason = %e, "malformed request");
                Response::Error(ServiceError::new(
                    ErrorCode::InvalidArgument,
                    format!("malformed request: {e}"),
                ))
            }
        }
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let result = match request {
            Request::Deposit {
                caller,
                asset_id,
                user_info,
            } => self
                .service
                .initiate_deposit(
                    &caller,
                    DepositRequest {
                        asset_id,
                        user_info,
                    },
                )
                .await
                .map(Response::Deposit),
            Request::Remaining { caller, booking_id } => self
                .service
                .initiate_remaining(&caller, booking_id)
                .await
                .map(Response::Remaining),
            Request::Booking { caller, booking_id } => self
                .service
                .booking(&caller, booking_id)
                .map(Response::Booking),
            Request::Webhook { hmac, body } => {
                let status = self
                    .webhooks
                    .handle(hmac.as_deref(), body.to_string().as_bytes());
                Ok(Response::Status(status.as_u16()))
            }
        };
        result.unwrap_or_else(Response::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::callback::{OrderRef, TransactionCallback, TransactionObj};
    use crate::clock::SystemClock;
    use crate::gateway::{AuthToken, BillingData, GatewayError, OrderId, PaymentGateway, PaymentToken};
    use crate::ledger::Ledger;
    use crate::model::{Asset, Availability, BookingStatus, PaymentKind};
    use crate::signature::SignatureVerifier;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StaticGateway;

    #[async_trait]
    impl PaymentGateway for StaticGateway {
        async fn authenticate(&self) -> Result<AuthToken, GatewayError> {
            Ok(AuthToken("auth".into()))
        }

        async fn create_order(
            &self,
            _auth: &AuthToken,
            _merchant_order_id: &str,
            _kind: PaymentKind,
            _amount: Amount,
        ) -> Result<OrderId, GatewayError> {
            Ok(OrderId(1))
        }

        async fn issue_payment_token(
            &self,
            _auth: &AuthToken,
            _order: OrderId,
            _amount: Amount,
            _billing: &BillingData,
        ) -> Result<PaymentToken, GatewayError> {
            Ok(PaymentToken("pay-token".into()))
        }

        fn iframe_id(&self) -> &str {
            "iframe"
        }
    }

    const SECRET: &str = "cli-secret";

    fn app() -> (App, Arc<Ledger>, AssetId) {
        let ledger = Arc::new(Ledger::new(Arc::new(SystemClock)));
        let asset = Asset {
            id: AssetId::new(),
            price: Amount::from_units(10_000),
            discounted_price: None,
            deposit_amount: Amount::from_units(1000),
            availability: Availability::Approved,
        };
        let asset_id = asset.id;
        ledger.insert_asset(asset).unwrap();

        let service = BookingService::new(ledger.clone(), Arc::new(StaticGateway));
        let webhooks =
            WebhookProcessor::new(ledger.clone(), SignatureVerifier::new(SECRET).unwrap());
        (App::new(service, webhooks), ledger, asset_id)
    }

    fn deposit_line(asset: AssetId) -> String {
        serde_json::json!({
            "op": "deposit",
            "caller": {"user_id": "alice"},
            "asset_id": asset,
            "user_info": {"name": "Alice Doe", "email": "alice@example.com", "phone": "0100"},
        })
        .to_string()
    }

    fn webhook_line(merchant_order_id: String, success: bool) -> String {
        let obj = TransactionObj {
            id: Some(99),
            amount_cents: Some(100_000),
            order: Some(OrderRef {
                id: Some(5),
                merchant_order_id: Some(merchant_order_id),
            }),
            success: Some(success),
            ..Default::default()
        };
        let hmac = SignatureVerifier::new(SECRET).unwrap().sign(&obj);
        let body = TransactionCallback {
            kind: Some("TRANSACTION".into()),
            obj: Some(obj),
            hmac: None,
        };
        serde_json::json!({"op": "webhook", "hmac": hmac, "body": body}).to_string()
    }

    #[tokio::test]
    async fn deposit_then_webhook_reserves() {
        let (app, ledger, asset) = app();

        let Response::Deposit(checkout) = app.handle_line(&deposit_line(asset)).await else {
            panic!("expected a deposit checkout");
        };
        assert_eq!(checkout.payment_token, "pay-token");
        assert_eq!(checkout.iframe_id, "iframe");

        let response = app
            .handle_line(&webhook_line(checkout.payment_id.to_string(), true))
            .await;
        assert_eq!(response, Response::Status(200));

        let booking = ledger.booking(checkout.booking_id).unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Reserved);
    }

    #[tokio::test]
    async fn anonymous_caller_is_rejected() {
        let (app, _, asset) = app();
        let line = serde_json::json!({
            "op": "deposit",
            "asset_id": asset,
            "user_info": {"name": "A", "email": "a@example.com", "phone": "1"},
        })
        .to_string();

        let Response::Error(e) = app.handle_line(&line).await else {
            panic!("expected an error");
        };
        assert_eq!(e.code, ErrorCode::Unauthenticated);
    }

    #[tokio::test]
    async fn malformed_line_is_invalid_argument() {
        let (app, _, _) = app();
        let Response::Error(e) = app.handle_line(r#"{"op":"refund"}"#).await else {
            panic!("expected an error");
        };
        assert_eq!(e.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn unsigned_webhook_is_unauthorized() {
        let (app, _, _) = app();
        let line = serde_json::json!({
            "op": "webhook",
            "hmac": "deadbeef",
            "body": {"type": "TRANSACTION", "obj": {"id": 1, "success": true}},
        })
        .to_string();
        assert_eq!(app.handle_line(&line).await, Response::Status(401));
    }

    #[tokio::test]
    async fn run_answers_one_line_per_request() {
        let (app, _, asset) = app();
        let lines = vec![
            deposit_line(asset),
            String::new(),
            r#"{"op":"booking","caller":{"user_id":"bob"},"booking_id":"00000000-0000-0000-0000-000000000000"}"#
                .to_string(),
        ];

        let mut out = Vec::new();
        app.run(tokio_stream::iter(lines), &mut out).await.unwrap();

        let out = String::from_utf8(out).unwrap();
        let responses: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 2);
        assert!(responses[0]["deposit"]["booking_id"].is_string());
        assert_eq!(responses[1]["error"]["code"], "not-found");
    }
}
