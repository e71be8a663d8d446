use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::{Asset, AssetId, Availability, Booking};
use crate::Amount;

/// Errors that can occur when reading assets or writing the booking report
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized availability '{value}'")]
    UnrecognizedAvailability { line: usize, value: String },

    #[error("line {line}: {field} must be positive")]
    NonPositive { line: usize, field: &'static str },

    #[error("failed to write report: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush report: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct AssetRow {
    id: AssetId,
    price: f64,
    discounted_price: Option<f64>,
    deposit_amount: f64,
    availability: String,
}

#[derive(Debug, Serialize)]
struct BookingRow<'a> {
    booking: String,
    user: &'a str,
    asset: String,
    status: &'static str,
    total_commission: String,
    deposit_paid: String,
    remaining: String,
    expires_at: String,
}

/// Read assets from a csv file with header
/// `id,price,discounted_price,deposit_amount,availability`
pub fn read_assets(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Asset, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<AssetRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;

            let availability = row.availability.parse::<Availability>().map_err(|value| {
                CsvError::UnrecognizedAvailability { line, value }
            })?;
            if row.price <= 0.0 {
                return Err(CsvError::NonPositive {
                    line,
                    field: "price",
                });
            }
            if row.discounted_price.is_some_and(|p| p <= 0.0) {
                return Err(CsvError::NonPositive {
                    line,
                    field: "discounted_price",
                });
            }

            // deposits are validated by the ledger when a booking is made
            Ok(Asset {
                id: row.id,
                price: Amount::from_float(row.price),
                discounted_price: row.discounted_price.map(Amount::from_float),
                deposit_amount: Amount::from_float(row.deposit_amount),
                availability,
            })
        }))
}

/// Write bookings to `writer` in csv format
pub fn write_bookings<'a>(
    writer: impl io::Write,
    bookings: impl IntoIterator<Item = &'a Booking>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for booking in bookings {
        writer.serialize(BookingRow {
            booking: booking.id.to_string(),
            user: &booking.user_id,
            asset: booking.asset_id.to_string(),
            status: booking.status.as_str(),
            total_commission: booking.total_commission.to_string(),
            deposit_paid: booking.deposit_paid.to_string(),
            remaining: booking.remaining_amount.to_string(),
            expires_at: booking
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        })?;
    }

    writer.flush()?;
    Ok(())
}
