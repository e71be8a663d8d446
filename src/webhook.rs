//! Inbound payment-result callbacks.
//!
//! The gateway delivers callbacks at least once and retries on any non-2xx
//! answer, so every valid callback is acknowledged with 200 whether the
//! payment succeeded or not, and only internal failures answer 500. The
//! ledger makes redelivery a no-op.

use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, error, info, warn};

use crate::callback::TransactionCallback;
use crate::ledger::Ledger;
use crate::signature::SignatureVerifier;

pub struct WebhookProcessor {
    ledger: Arc<Ledger>,
    verifier: SignatureVerifier,
}

impl WebhookProcessor {
    pub fn new(ledger: Arc<Ledger>, verifier: SignatureVerifier) -> Self {
        Self { ledger, verifier }
    }

    /// Handle a raw callback body, with the signature from the `hmac` query
    /// parameter if the gateway sent one there.
    pub fn handle(&self, query_hmac: Option<&str>, body: &[u8]) -> StatusCode {
        match serde_json::from_slice::<TransactionCallback>(body) {
            Ok(callback) => self.handle_callback(query_hmac, callback),
            Err(e) => {
                warn!(reason = %e, "malformed payment callback");
                StatusCode::BAD_REQUEST
            }
        }
    }

    pub fn handle_callback(
        &self,
        query_hmac: Option<&str>,
        callback: TransactionCallback,
    ) -> StatusCode {
        let signature = query_hmac
            .or(callback.hmac.as_deref())
            .filter(|s| !s.is_empty());
        let (Some(obj), Some(signature)) = (callback.obj.as_ref(), signature) else {
            warn!("payment callback without payload or signature");
            return StatusCode::BAD_REQUEST;
        };

        if !self.verifier.verify(obj, signature) {
            warn!(txn = ?obj.id, "payment callback signature mismatch");
            return StatusCode::UNAUTHORIZED;
        }

        let Some(payment_id) = obj.payment_id() else {
            debug!(
                txn = ?obj.id,
                merchant_order = ?obj.merchant_order_id(),
                "payment callback without a known correlation key"
            );
            return StatusCode::OK;
        };

        match self
            .ledger
            .apply_payment_result(payment_id, obj.succeeded(), obj.external_txn_id())
        {
            Ok(outcome) => {
                info!(payment = %payment_id, outcome = ?outcome, "payment callback processed");
                StatusCode::OK
            }
            Err(e) => {
                error!(payment = %payment_id, reason = %e, "payment callback failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::callback::{OrderRef, TransactionObj};
    use crate::clock::SystemClock;
    use crate::model::{
        Asset, AssetId, Availability, BookingStatus, PaymentId, PaymentStatus, UserInfo,
    };

    const SECRET: &str = "webhook-secret";

    struct Fixture {
        ledger: Arc<Ledger>,
        processor: WebhookProcessor,
        verifier: SignatureVerifier,
        payment: PaymentId,
    }

    fn fixture() -> Fixture {
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
        let intent = ledger
            .initiate_deposit(
                &"alice".to_string(),
                asset_id,
                UserInfo {
                    name: "Alice".into(),
                    email: "alice@example.com".into(),
                    phone: "1".into(),
                },
            )
            .unwrap();
        let verifier = SignatureVerifier::new(SECRET).unwrap();
        Fixture {
            processor: WebhookProcessor::new(ledger.clone(), verifier.clone()),
            ledger,
            verifier,
            payment: intent.payment_id,
        }
    }

    fn obj(merchant_order_id: Option<String>, success: bool) -> TransactionObj {
        TransactionObj {
            id: Some(777),
            amount_cents: Some(100_000),
            currency: Some("EGP".into()),
            order: Some(OrderRef {
                id: Some(1),
                merchant_order_id,
            }),
            success: Some(success),
            ..Default::default()
        }
    }

    fn signed(f: &Fixture, obj: TransactionObj) -> TransactionCallback {
        TransactionCallback {
            kind: Some("TRANSACTION".into()),
            hmac: Some(f.verifier.sign(&obj)),
            obj: Some(obj),
        }
    }

    #[test]
    fn valid_success_confirms_deposit() {
        let f = fixture();
        let callback = signed(&f, obj(Some(f.payment.to_string()), true));

        assert_eq!(f.processor.handle_callback(None, callback), StatusCode::OK);

        let payment = f.ledger.payment(f.payment).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.external_txn_id.as_deref(), Some("777"));
        let booking = f.ledger.booking(payment.booking_id).unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Reserved);
    }

    #[test]
    fn declined_payment_is_acknowledged() {
        let f = fixture();
        let callback = signed(&f, obj(Some(f.payment.to_string()), false));

        assert_eq!(f.processor.handle_callback(None, callback), StatusCode::OK);
        let payment = f.ledger.payment(f.payment).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
    }

    #[test]
    fn signature_from_query_takes_precedence() {
        let f = fixture();
        let mut callback = signed(&f, obj(Some(f.payment.to_string()), true));
        let signature = callback.hmac.take().unwrap();
        callback.hmac = Some("00".into());

        assert_eq!(
            f.processor.handle_callback(Some(&signature), callback),
            StatusCode::OK
        );
    }

    #[test]
    fn missing_signature_is_bad_request() {
        let f = fixture();
        let mut callback = signed(&f, obj(Some(f.payment.to_string()), true));
        callback.hmac = None;
        assert_eq!(
            f.processor.handle_callback(None, callback),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn missing_payload_is_bad_request() {
        let f = fixture();
        let callback = TransactionCallback {
            hmac: Some("abcd".into()),
            ..Default::default()
        };
        assert_eq!(
            f.processor.handle_callback(None, callback),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let f = fixture();
        assert_eq!(
            f.processor.handle(Some("abcd"), b"{not json"),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn tampered_payload_is_unauthorized() {
        let f = fixture();
        let mut callback = signed(&f, obj(Some(f.payment.to_string()), false));
        if let Some(obj) = callback.obj.as_mut() {
            obj.success = Some(true);
        }

        assert_eq!(
            f.processor.handle_callback(None, callback),
            StatusCode::UNAUTHORIZED
        );
        let payment = f.ledger.payment(f.payment).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[test]
    fn missing_correlation_key_is_acknowledged() {
        let f = fixture();
        let callback = signed(&f, obj(None, true));
        assert_eq!(f.processor.handle_callback(None, callback), StatusCode::OK);

        let callback = signed(&f, obj(Some("order-from-elsewhere".into()), true));
        assert_eq!(f.processor.handle_callback(None, callback), StatusCode::OK);

        let payment = f.ledger.payment(f.payment).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[test]
    fn redelivery_is_a_no_op() {
        let f = fixture();
        let callback = signed(&f, obj(Some(f.payment.to_string()), true));

        assert_eq!(
            f.processor.handle_callback(None, callback.clone()),
            StatusCode::OK
        );
        let first = f.ledger.payment(f.payment).unwrap().unwrap();

        assert_eq!(f.processor.handle_callback(None, callback), StatusCode::OK);
        let second = f.ledger.payment(f.payment).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn raw_body_with_embedded_signature() {
        let f = fixture();
        let callback = signed(&f, obj(Some(f.payment.to_string()), true));
        let body = serde_json::to_vec(&callback).unwrap();

        assert_eq!(f.processor.handle(None, &body), StatusCode::OK);
    }
}
