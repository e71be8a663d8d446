//! Client-facing booking operations.
//!
//! Each operation commits its ledger transaction first and only then talks
//! to the payment gateway. A gateway failure is reported to the caller but
//! leaves the committed booking and payment in place to be retried.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::Amount;
use crate::gateway::{BillingData, GatewayError, PaymentGateway};
use crate::ledger::{Ledger, LedgerError};
use crate::model::{AssetId, Booking, BookingId, PaymentId, PaymentKind, UserId, UserInfo};

/// Identity of the caller, as reported by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub privileged: bool,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(id.into()),
            privileged: false,
        }
    }

    pub fn admin(id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(id.into()),
            privileged: true,
        }
    }

    fn require_auth(&self) -> Result<&UserId, ServiceError> {
        self.user_id.as_ref().ok_or_else(|| {
            ServiceError::new(ErrorCode::Unauthenticated, "you must be logged in")
        })
    }
}

/// Error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Unauthenticated,
    PermissionDenied,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    GatewayError,
    SignatureInvalid,
    Aborted,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::NotFound => "not-found",
            ErrorCode::AlreadyExists => "already-exists",
            ErrorCode::FailedPrecondition => "failed-precondition",
            ErrorCode::GatewayError => "gateway-error",
            ErrorCode::SignatureInvalid => "signature-invalid",
            ErrorCode::Aborted => "aborted",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error: a code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        let code = match &e {
            LedgerError::AssetNotFound(_) | LedgerError::BookingNotFound(_) => ErrorCode::NotFound,
            LedgerError::AssetUnavailable(..)
            | LedgerError::InvalidState { .. }
            | LedgerError::BookingExpired(..) => ErrorCode::FailedPrecondition,
            LedgerError::AlreadyBooked { .. } => ErrorCode::AlreadyExists,
            LedgerError::InvalidDeposit(..) | LedgerError::DepositExceedsCommission { .. } => {
                ErrorCode::InvalidArgument
            }
            LedgerError::NotOwner(_) => ErrorCode::PermissionDenied,
            LedgerError::Contention(_) => ErrorCode::Aborted,
            LedgerError::DanglingPayment(..) => ErrorCode::Internal,
        };
        ServiceError::new(code, e.to_string())
    }
}

impl From<GatewayError> for ServiceError {
    fn from(e: GatewayError) -> Self {
        ServiceError::new(ErrorCode::GatewayError, e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub asset_id: AssetId,
    pub user_info: UserInfo,
}

/// What the client needs to pay the deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCheckout {
    pub booking_id: BookingId,
    pub payment_id: PaymentId,
    pub payment_token: String,
    pub iframe_id: String,
}

/// What the client needs to pay the remaining amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingCheckout {
    pub payment_id: PaymentId,
    pub amount: Amount,
    pub payment_token: String,
    pub iframe_id: String,
}

fn validate_user_info(info: &UserInfo) -> Result<(), ServiceError> {
    let invalid = |what: &str| ServiceError::new(ErrorCode::InvalidArgument, what);
    if info.name.trim().is_empty() {
        return Err(invalid("user name is required"));
    }
    let email = info.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(invalid("a valid email is required"));
    }
    if info.phone.trim().is_empty() {
        return Err(invalid("phone number is required"));
    }
    Ok(())
}

/// Booking operations over a shared ledger and payment gateway.
pub struct BookingService {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn PaymentGateway>,
}

impl BookingService {
    pub fn new(ledger: Arc<Ledger>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { ledger, gateway }
    }

    /// Open a deposit booking and obtain its payment token.
    pub async fn initiate_deposit(
        &self,
        caller: &Caller,
        request: DepositRequest,
    ) -> Result<DepositCheckout, ServiceError> {
        let user = caller.require_auth()?;
        validate_user_info(&request.user_info)?;

        let intent =
            self.ledger
                .initiate_deposit(user, request.asset_id, request.user_info.clone())?;

        let billing = BillingData::from(&request.user_info);
        let token = self
            .gateway
            .checkout(
                &intent.payment_id.to_string(),
                PaymentKind::Deposit,
                intent.amount,
                &billing,
            )
            .await
            .inspect_err(|e| {
                warn!(
                    booking = %intent.booking_id,
                    payment = %intent.payment_id,
                    reason = %e,
                    "deposit checkout failed, booking left pending"
                )
            })?;

        info!(booking = %intent.booking_id, payment = %intent.payment_id, "deposit checkout issued");
        Ok(DepositCheckout {
            booking_id: intent.booking_id,
            payment_id: intent.payment_id,
            payment_token: token.0,
            iframe_id: self.gateway.iframe_id().to_string(),
        })
    }

    /// Open the remaining-amount payment on a reserved booking.
    pub async fn initiate_remaining(
        &self,
        caller: &Caller,
        booking_id: BookingId,
    ) -> Result<RemainingCheckout, ServiceError> {
        let user = caller.require_auth()?;
        let intent = self.ledger.initiate_remaining(user, booking_id)?;

        let billing = BillingData::from(&intent.user_info);
        let token = self
            .gateway
            .checkout(
                &intent.payment_id.to_string(),
                PaymentKind::Remaining,
                intent.amount,
                &billing,
            )
            .await
            .inspect_err(|e| {
                warn!(
                    booking = %booking_id,
                    payment = %intent.payment_id,
                    reason = %e,
                    "remaining checkout failed"
                )
            })?;

        info!(booking = %booking_id, payment = %intent.payment_id, "remaining checkout issued");
        Ok(RemainingCheckout {
            payment_id: intent.payment_id,
            amount: intent.amount,
            payment_token: token.0,
            iframe_id: self.gateway.iframe_id().to_string(),
        })
    }

    /// A booking, visible to its owner and to privileged callers.
    pub fn booking(&self, caller: &Caller, booking_id: BookingId) -> Result<Booking, ServiceError> {
        let user = caller.require_auth()?;
        let booking = self.ledger.booking(booking_id)?.ok_or_else(|| {
            ServiceError::from(LedgerError::BookingNotFound(booking_id))
        })?;
        if &booking.user_id != user && !caller.privileged {
            return Err(ServiceError::from(LedgerError::NotOwner(booking_id)));
        }
        Ok(booking)
    }
}
