//! Error types for ledger operations.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Amount;
use crate::model::{AssetId, Availability, BookingId, BookingStatus, PaymentId, UserId};

/// The ledger operation being performed, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOperation {
    InitiateDeposit,
    InitiateRemaining,
    ApplyPaymentResult,
    ExpireBooking,
}

impl fmt::Display for LedgerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LedgerOperation::InitiateDeposit => "initiate deposit",
            LedgerOperation::InitiateRemaining => "initiate remaining",
            LedgerOperation::ApplyPaymentResult => "apply payment result",
            LedgerOperation::ExpireBooking => "expire booking",
        })
    }
}

/// Error returned by [`Ledger`](super::Ledger) operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("asset {0} not found")]
    AssetNotFound(AssetId),

    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("asset {0} is not available ({1})")]
    AssetUnavailable(AssetId, Availability),

    #[error("user {user} already holds {status} booking {booking} on asset {asset}")]
    AlreadyBooked {
        user: UserId,
        asset: AssetId,
        booking: BookingId,
        status: BookingStatus,
    },

    #[error("deposit amount {1} on asset {0} must be positive")]
    InvalidDeposit(AssetId, Amount),

    #[error("deposit {deposit} on asset {asset} exceeds commission {commission}")]
    DepositExceedsCommission {
        asset: AssetId,
        deposit: Amount,
        commission: Amount,
    },

    #[error("booking {0} belongs to another user")]
    NotOwner(BookingId),

    #[error("booking {booking} is {actual}, expected {expected}")]
    InvalidState {
        booking: BookingId,
        actual: BookingStatus,
        expected: BookingStatus,
    },

    #[error("booking {0} expired at {1}")]
    BookingExpired(BookingId, DateTime<Utc>),

    #[error("payment {0} references missing booking {1}")]
    DanglingPayment(PaymentId, BookingId),

    #[error("transaction aborted after {0} conflicting attempts")]
    Contention(u32),
}
