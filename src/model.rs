//! Core domain types for the booking engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Amount;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(
    /// Asset (property listing) identifier.
    AssetId
);
id_type!(
    /// Booking identifier.
    BookingId
);
id_type!(
    /// Payment identifier, also the merchant order id sent to the gateway.
    PaymentId
);

/// User identifier, as issued by the identity provider.
pub type UserId = String;

/// Availability of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Approved,
    Reserved,
    Sold,
}

impl Availability {
    pub fn as_str(self) -> &'static str {
        match self {
            Availability::Approved => "approved",
            Availability::Reserved => "reserved",
            Availability::Sold => "sold",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Availability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Availability::Approved),
            "reserved" => Ok(Availability::Reserved),
            "sold" => Ok(Availability::Sold),
            other => Err(other.to_string()),
        }
    }
}

/// A reservable property listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub price: Amount,
    pub discounted_price: Option<Amount>,
    pub deposit_amount: Amount,
    pub availability: Availability,
}

impl Asset {
    /// Discounted price when set, base price otherwise.
    pub fn final_price(&self) -> Amount {
        self.discounted_price.unwrap_or(self.price)
    }

    /// Commission owed on the asset: half of the final price.
    pub fn commission(&self) -> Amount {
        self.final_price().half()
    }
}

/// Status of a booking.
///
/// ```text
/// pending_deposit -> reserved -> paying_remaining -> completed
///                    reserved -> expired
///                    reserved <- paying_remaining   (remaining payment declined)
///                                paying_remaining -> expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingDeposit,
    Reserved,
    PayingRemaining,
    Completed,
    Expired,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::PendingDeposit => "pending_deposit",
            BookingStatus::Reserved => "reserved",
            BookingStatus::PayingRemaining => "paying_remaining",
            BookingStatus::Completed => "completed",
            BookingStatus::Expired => "expired",
        }
    }

    /// Whether the booking holds the asset.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            BookingStatus::Reserved | BookingStatus::PayingRemaining | BookingStatus::Completed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Expired)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contact and billing snapshot taken when the booking is initiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub total_commission: Amount,
    /// `total_commission - deposit_amount`, fixed at creation.
    pub remaining_amount: Amount,
    pub deposit_paid: Amount,
    pub status: BookingStatus,
    pub user_info: UserInfo,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Create a booking in the `PendingDeposit` state.
    pub fn new(
        user_id: UserId,
        asset_id: AssetId,
        total_commission: Amount,
        deposit_amount: Amount,
        user_info: UserInfo,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BookingId::new(),
            user_id,
            asset_id,
            total_commission,
            remaining_amount: total_commission - deposit_amount,
            deposit_paid: Amount::ZERO,
            status: BookingStatus::PendingDeposit,
            user_info,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Deposit the booking was priced with.
    pub fn deposit_amount(&self) -> Amount {
        self.total_commission - self.remaining_amount
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline < now)
    }

    /// A `Reserved` or `PayingRemaining` booking whose deadline has passed.
    pub fn is_expirable(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            BookingStatus::Reserved | BookingStatus::PayingRemaining
        ) && self.is_past_deadline(now)
    }
}

/// Installment a payment settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Deposit,
    Remaining,
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentKind::Deposit => "deposit",
            PaymentKind::Remaining => "remaining",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub kind: PaymentKind,
    pub amount: Amount,
    pub status: PaymentStatus,
    pub external_txn_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Create a payment in the `Pending` state.
    pub fn new(
        booking_id: BookingId,
        user_id: UserId,
        kind: PaymentKind,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            booking_id,
            user_id,
            kind,
            amount,
            status: PaymentStatus::Pending,
            external_txn_id: None,
            created_at: now,
            paid_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn info() -> UserInfo {
        UserInfo {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            phone: "+201000000000".into(),
        }
    }

    #[test]
    fn commission_uses_discounted_price() {
        let mut asset = Asset {
            id: AssetId::new(),
            price: Amount::from_units(12_000),
            discounted_price: None,
            deposit_amount: Amount::from_units(1000),
            availability: Availability::Approved,
        };
        assert_eq!(asset.commission(), Amount::from_units(6000));

        asset.discounted_price = Some(Amount::from_units(10_000));
        assert_eq!(asset.commission(), Amount::from_units(5000));
    }

    #[test]
    fn new_booking_splits_commission() {
        let booking = Booking::new(
            "u1".into(),
            AssetId::new(),
            Amount::from_units(5000),
            Amount::from_units(1000),
            info(),
            Utc::now(),
        );
        assert_eq!(booking.status, BookingStatus::PendingDeposit);
        assert_eq!(booking.remaining_amount, Amount::from_units(4000));
        assert_eq!(booking.deposit_amount(), Amount::from_units(1000));
        assert_eq!(booking.deposit_paid, Amount::ZERO);
    }

    #[test]
    fn expirable_only_when_holding_and_past_deadline() {
        let now = Utc::now();
        let mut booking = Booking::new(
            "u1".into(),
            AssetId::new(),
            Amount::from_units(5000),
            Amount::from_units(1000),
            info(),
            now,
        );
        assert!(!booking.is_expirable(now));

        booking.status = BookingStatus::Reserved;
        booking.expires_at = Some(now - Duration::seconds(1));
        assert!(booking.is_expirable(now));

        booking.expires_at = Some(now + Duration::days(1));
        assert!(!booking.is_expirable(now));

        booking.expires_at = Some(now - Duration::seconds(1));
        booking.status = BookingStatus::PayingRemaining;
        assert!(booking.is_expirable(now));

        booking.status = BookingStatus::Completed;
        assert!(!booking.is_expirable(now));
    }

    #[test]
    fn active_statuses() {
        assert!(!BookingStatus::PendingDeposit.is_active());
        assert!(BookingStatus::Reserved.is_active());
        assert!(BookingStatus::PayingRemaining.is_active());
        assert!(BookingStatus::Completed.is_active());
        assert!(!BookingStatus::Expired.is_active());
    }

    #[test]
    fn ids_parse_from_display() {
        let id = PaymentId::new();
        assert_eq!(id.to_string().parse::<PaymentId>().unwrap(), id);
        assert!("not-a-uuid".parse::<PaymentId>().is_err());
    }

    #[test]
    fn availability_round_trips_through_str() {
        for availability in [
            Availability::Approved,
            Availability::Reserved,
            Availability::Sold,
        ] {
            assert_eq!(availability.as_str().parse(), Ok(availability));
        }
        assert_eq!("draft".parse::<Availability>(), Err("draft".to_string()));
    }
}
