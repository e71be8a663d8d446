pub mod amount;
pub mod callback;
pub mod cli;
pub mod clock;
pub mod config;
pub mod csv;
pub mod gateway;
pub mod ledger;
pub mod model;
pub mod service;
pub mod signature;
pub mod sweeper;
pub mod webhook;

pub use amount::Amount;
pub use ledger::{Ledger, LedgerError, PaymentOutcome};
pub use model::{AssetId, BookingId, PaymentId, UserId};
pub use service::BookingService;
pub use webhook::WebhookProcessor;
