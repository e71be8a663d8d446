//! Booking ledger.
//!
//! The ledger owns every write to asset availability, booking status and
//! payment status. Each operation runs as a single [`store::MemoryStore`]
//! transaction spanning the asset, the booking and its payments, so a
//! racing request never observes the availability check separately from
//! the write it guards.

use std::fmt::Display;
use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use crate::Amount;
use crate::clock::Clock;
use crate::model::{
    Asset, AssetId, Availability, Booking, BookingId, BookingStatus, Payment, PaymentId,
    PaymentKind, PaymentStatus, UserId, UserInfo,
};

pub mod store;
use store::MemoryStore;

mod error;
pub use error::{LedgerError, LedgerOperation};

/// Default time a reserved booking has to pay the remaining amount.
pub const DEFAULT_RESERVATION_DAYS: i64 = 7;

/// Records committed by [`Ledger::initiate_deposit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositIntent {
    pub booking_id: BookingId,
    pub payment_id: PaymentId,
    pub amount: Amount,
}

/// Records committed by [`Ledger::initiate_remaining`], with the billing
/// snapshot read in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemainingIntent {
    pub booking_id: BookingId,
    pub payment_id: PaymentId,
    pub amount: Amount,
    pub user_info: UserInfo,
}

/// What [`Ledger::apply_payment_result`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Unknown payment, or one already settled
    Ignored,
    /// Payment marked failed
    Declined,
    /// Booking reserved and asset locked
    DepositConfirmed,
    /// Booking completed and asset sold
    RemainingConfirmed,
    /// Payment marked paid, but its booking could no longer accept it
    /// (expired, or the asset went to another booking first). Needs a refund.
    Orphaned,
}

/// The transactional core over assets, bookings and payments.
pub struct Ledger {
    store: MemoryStore,
    clock: Arc<dyn Clock>,
    reservation_period: Duration,
}

/// Public API
impl Ledger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: MemoryStore::new(),
            clock,
            reservation_period: Duration::days(DEFAULT_RESERVATION_DAYS),
        }
    }

    /// Set how long a confirmed deposit holds the asset.
    pub fn with_reservation_period(mut self, period: Duration) -> Self {
        self.reservation_period = period;
        self
    }

    /// Insert or replace an asset. Assets are approved outside the ledger.
    pub fn insert_asset(&self, asset: Asset) -> Result<(), LedgerError> {
        self.store.transaction(|txn| {
            txn.put_asset(asset.clone());
            Ok(())
        })
    }

    pub fn asset(&self, id: AssetId) -> Result<Option<Asset>, LedgerError> {
        self.store.transaction(|txn| Ok(txn.asset(&id)))
    }

    pub fn booking(&self, id: BookingId) -> Result<Option<Booking>, LedgerError> {
        self.store.transaction(|txn| Ok(txn.booking(&id)))
    }

    pub fn payment(&self, id: PaymentId) -> Result<Option<Payment>, LedgerError> {
        self.store.transaction(|txn| Ok(txn.payment(&id)))
    }

    /// Payments of a booking, oldest first.
    pub fn payments_for_booking(&self, id: BookingId) -> Result<Vec<Payment>, LedgerError> {
        let mut payments = self
            .store
            .transaction(|txn| Ok(txn.payments_where(|p| p.booking_id == id)))?;
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    /// All bookings, oldest first.
    pub fn bookings(&self) -> Result<Vec<Booking>, LedgerError> {
        let mut bookings = self
            .store
            .transaction(|txn| Ok(txn.bookings_where(|_| true)))?;
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    /// Open a deposit payment for `user` on `asset_id`.
    ///
    /// A `PendingDeposit` booking the user already holds on the asset is
    /// reused, so retries do not pile up bookings. The asset stays
    /// `Approved` until the deposit is confirmed.
    pub fn initiate_deposit(
        &self,
        user: &UserId,
        asset_id: AssetId,
        user_info: UserInfo,
    ) -> Result<DepositIntent, LedgerError> {
        let result = self.store.transaction(|txn| {
            let now = self.clock.now();
            let asset = txn
                .asset(&asset_id)
                .ok_or(LedgerError::AssetNotFound(asset_id))?;

            let held = txn.bookings_where(|b| &b.user_id == user && b.asset_id == asset_id);
            if let Some(active) = held.iter().find(|b| b.status.is_active()) {
                return Err(LedgerError::AlreadyBooked {
                    user: user.clone(),
                    asset: asset_id,
                    booking: active.id,
                    status: active.status,
                });
            }

            if asset.availability != Availability::Approved {
                return Err(LedgerError::AssetUnavailable(asset_id, asset.availability));
            }

            let deposit = asset.deposit_amount;
            if !deposit.is_positive() {
                return Err(LedgerError::InvalidDeposit(asset_id, deposit));
            }
            let commission = asset.commission();
            if deposit > commission {
                return Err(LedgerError::DepositExceedsCommission {
                    asset: asset_id,
                    deposit,
                    commission,
                });
            }

            let booking = match held
                .into_iter()
                .find(|b| b.status == BookingStatus::PendingDeposit)
            {
                Some(mut booking) => {
                    booking.total_commission = commission;
                    booking.remaining_amount = commission - deposit;
                    booking.user_info = user_info.clone();
                    booking.updated_at = now;
                    booking
                }
                None => Booking::new(
                    user.clone(),
                    asset_id,
                    commission,
                    deposit,
                    user_info.clone(),
                    now,
                ),
            };
            let payment = Payment::new(
                booking.id,
                user.clone(),
                PaymentKind::Deposit,
                deposit,
                now,
            );

            let intent = DepositIntent {
                booking_id: booking.id,
                payment_id: payment.id,
                amount: deposit,
            };
            txn.put_booking(booking);
            txn.put_payment(payment);
            Ok(intent)
        });

        Self::log_result(LedgerOperation::InitiateDeposit, &asset_id, &result);
        result
    }

    /// Open the remaining-amount payment on a reserved booking.
    ///
    /// Moves the booking to `PayingRemaining`, which keeps a second
    /// initiation from opening another payment. Calling again while the
    /// payment is still pending returns that same payment, so a checkout
    /// that failed at the gateway can be retried under the same merchant
    /// order id.
    pub fn initiate_remaining(
        &self,
        user: &UserId,
        booking_id: BookingId,
    ) -> Result<RemainingIntent, LedgerError> {
        let result = self.store.transaction(|txn| {
            let now = self.clock.now();
            let mut booking = txn
                .booking(&booking_id)
                .ok_or(LedgerError::BookingNotFound(booking_id))?;

            if &booking.user_id != user {
                return Err(LedgerError::NotOwner(booking_id));
            }
            if !matches!(
                booking.status,
                BookingStatus::Reserved | BookingStatus::PayingRemaining
            ) {
                return Err(LedgerError::InvalidState {
                    booking: booking_id,
                    actual: booking.status,
                    expected: BookingStatus::Reserved,
                });
            }
            if let Some(deadline) = booking.expires_at.filter(|_| booking.is_past_deadline(now)) {
                return Err(LedgerError::BookingExpired(booking_id, deadline));
            }

            if booking.status == BookingStatus::PayingRemaining {
                let open = txn
                    .payments_where(|p| {
                        p.booking_id == booking_id
                            && p.kind == PaymentKind::Remaining
                            && p.status == PaymentStatus::Pending
                    })
                    .into_iter()
                    .max_by_key(|p| p.created_at);
                let Some(payment) = open else {
                    return Err(LedgerError::InvalidState {
                        booking: booking_id,
                        actual: booking.status,
                        expected: BookingStatus::Reserved,
                    });
                };
                return Ok(RemainingIntent {
                    booking_id,
                    payment_id: payment.id,
                    amount: payment.amount,
                    user_info: booking.user_info,
                });
            }

            booking.status = BookingStatus::PayingRemaining;
            booking.updated_at = now;
            let payment = Payment::new(
                booking.id,
                user.clone(),
                PaymentKind::Remaining,
                booking.remaining_amount,
                now,
            );

            let intent = RemainingIntent {
                booking_id,
                payment_id: payment.id,
                amount: payment.amount,
                user_info: booking.user_info.clone(),
            };
            txn.put_booking(booking);
            txn.put_payment(payment);
            Ok(intent)
        });

        Self::log_result(LedgerOperation::InitiateRemaining, &booking_id, &result);
        result
    }

    /// Settle a payment with the gateway's verdict. Idempotent: a payment
    /// that is unknown or no longer pending is left alone.
    pub fn apply_payment_result(
        &self,
        payment_id: PaymentId,
        success: bool,
        external_txn_id: Option<String>,
    ) -> Result<PaymentOutcome, LedgerError> {
        let result = self.store.transaction(|txn| {
            let now = self.clock.now();
            let Some(mut payment) = txn.payment(&payment_id) else {
                return Ok(PaymentOutcome::Ignored);
            };
            if payment.status != PaymentStatus::Pending {
                return Ok(PaymentOutcome::Ignored);
            }
            let mut booking = txn
                .booking(&payment.booking_id)
                .ok_or(LedgerError::DanglingPayment(payment_id, payment.booking_id))?;

            payment.external_txn_id = external_txn_id.clone();

            if !success {
                payment.status = PaymentStatus::Failed;
                if payment.kind == PaymentKind::Remaining
                    && booking.status == BookingStatus::PayingRemaining
                {
                    // release the soft lock so the remaining payment can be retried
                    booking.status = BookingStatus::Reserved;
                    booking.updated_at = now;
                    txn.put_booking(booking);
                }
                txn.put_payment(payment);
                return Ok(PaymentOutcome::Declined);
            }

            payment.status = PaymentStatus::Paid;
            payment.paid_at = Some(now);

            let mut asset = txn
                .asset(&booking.asset_id)
                .ok_or(LedgerError::AssetNotFound(booking.asset_id))?;

            let outcome = match payment.kind {
                PaymentKind::Deposit
                    if booking.status == BookingStatus::PendingDeposit
                        && asset.availability == Availability::Approved =>
                {
                    booking.status = BookingStatus::Reserved;
                    booking.deposit_paid = payment.amount;
                    booking.expires_at = Some(now + self.reservation_period);
                    asset.availability = Availability::Reserved;
                    PaymentOutcome::DepositConfirmed
                }
                PaymentKind::Remaining if booking.status == BookingStatus::PayingRemaining => {
                    booking.status = BookingStatus::Completed;
                    asset.availability = Availability::Sold;
                    PaymentOutcome::RemainingConfirmed
                }
                _ => PaymentOutcome::Orphaned,
            };

            if outcome != PaymentOutcome::Orphaned {
                booking.updated_at = now;
                txn.put_booking(booking);
                txn.put_asset(asset);
            }
            txn.put_payment(payment);
            Ok(outcome)
        });

        match &result {
            Ok(PaymentOutcome::Orphaned) => warn!(
                payment = %payment_id,
                external_txn = ?external_txn_id,
                "payment confirmed for a booking that can no longer take it, refund required"
            ),
            Ok(outcome) => info!(
                payment = %payment_id,
                success,
                outcome = ?outcome,
                "{} applied",
                LedgerOperation::ApplyPaymentResult
            ),
            Err(_) => Self::log_result(LedgerOperation::ApplyPaymentResult, &payment_id, &result),
        }
        result
    }

    /// Expire every `Reserved` or `PayingRemaining` booking whose deadline
    /// has passed and put its asset back on the market. Returns how many
    /// bookings were expired. Remaining payments still pending stay pending;
    /// a success that lands afterwards is reported as orphaned.
    pub fn expire_stale(&self) -> Result<usize, LedgerError> {
        let now = self.clock.now();
        let candidates: Vec<BookingId> = self.store.transaction(|txn| {
            Ok(txn
                .bookings_where(|b| b.is_expirable(now))
                .into_iter()
                .map(|b| b.id)
                .collect())
        })?;

        let mut expired = 0;
        for booking_id in candidates {
            let result = self.expire_booking(booking_id);
            Self::log_result(LedgerOperation::ExpireBooking, &booking_id, &result);
            if let Ok(true) = result {
                expired += 1;
            }
        }
        Ok(expired)
    }
}

/// Private API
impl Ledger {
    /// Small helper to log operation results
    fn log_result<T: std::fmt::Debug>(
        operation: LedgerOperation,
        subject: &dyn Display,
        result: &Result<T, LedgerError>,
    ) {
        match result {
            Ok(value) => info!(subject = %subject, result = ?value, "{operation} applied"),
            Err(LedgerError::Contention(attempts)) => warn!(
                subject = %subject,
                attempts,
                "{operation} aborted on contention"
            ),
            Err(e) => info!(subject = %subject, reason = %e, "{operation} skipped"),
        }
    }

    /// Expire one booking, re-checking its status and deadline at write
    /// time: a webhook may have moved it on since the scan.
    fn expire_booking(&self, booking_id: BookingId) -> Result<bool, LedgerError> {
        self.store.transaction(|txn| {
            let now = self.clock.now();
            let Some(mut booking) = txn.booking(&booking_id) else {
                return Ok(false);
            };
            if !booking.is_expirable(now) {
                return Ok(false);
            }

            if let Some(mut asset) = txn.asset(&booking.asset_id)
                && asset.availability == Availability::Reserved
            {
                asset.availability = Availability::Approved;
                txn.put_asset(asset);
            }
            booking.status = BookingStatus::Expired;
            booking.updated_at = now;
            txn.put_booking(booking);
            Ok(true)
        })
    }
}
