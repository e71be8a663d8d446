//! In-memory transactional store with optimistic concurrency control.
//!
//! A transaction reads through to the committed tables, remembering the
//! version of every row it looked at and of every table it scanned, and
//! buffers its writes. Commit validates those versions under the write lock
//! and fails on any mismatch; [`MemoryStore::transaction`] then re-runs the
//! whole closure against fresh state.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use tracing::debug;

use super::LedgerError;
use crate::model::{Asset, AssetId, Booking, BookingId, Payment, PaymentId};

/// Attempts made before a transaction gives up with [`LedgerError::Contention`].
pub const MAX_TXN_ATTEMPTS: u32 = 5;

struct Row<V> {
    version: u64,
    value: V,
}

struct Table<K, V> {
    rows: HashMap<K, Row<V>>,
    /// Version of the last commit that wrote to this table
    version: u64,
}

impl<K: Eq + Hash + Copy, V: Clone> Table<K, V> {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            version: 0,
        }
    }

    /// Version of a row, 0 when absent
    fn row_version(&self, key: &K) -> u64 {
        self.rows.get(key).map_or(0, |row| row.version)
    }

    fn apply(&mut self, writes: HashMap<K, V>, version: u64) {
        if writes.is_empty() {
            return;
        }
        for (key, value) in writes {
            self.rows.insert(key, Row { version, value });
        }
        self.version = version;
    }
}

/// Read set and write buffer of one transaction over one table.
struct Pending<K, V> {
    reads: HashMap<K, u64>,
    scanned: Option<u64>,
    writes: HashMap<K, V>,
}

impl<K: Eq + Hash + Copy, V: Clone> Pending<K, V> {
    fn new() -> Self {
        Self {
            reads: HashMap::new(),
            scanned: None,
            writes: HashMap::new(),
        }
    }

    fn get(&mut self, table: &Table<K, V>, key: &K) -> Option<V> {
        if let Some(value) = self.writes.get(key) {
            return Some(value.clone());
        }
        self.reads
            .entry(*key)
            .or_insert_with(|| table.row_version(key));
        table.rows.get(key).map(|row| row.value.clone())
    }

    fn scan(&mut self, table: &Table<K, V>, filter: impl Fn(&V) -> bool) -> Vec<V> {
        self.scanned.get_or_insert(table.version);
        let mut found: Vec<V> = table
            .rows
            .iter()
            .filter(|(key, _)| !self.writes.contains_key(*key))
            .map(|(_, row)| &row.value)
            .filter(|value| filter(*value))
            .cloned()
            .collect();
        found.extend(self.writes.values().filter(|value| filter(*value)).cloned());
        found
    }

    fn is_valid(&self, table: &Table<K, V>) -> bool {
        self.scanned.is_none_or(|version| version == table.version)
            && self
                .reads
                .iter()
                .all(|(key, version)| table.row_version(key) == *version)
    }
}

struct Tables {
    /// Monotonic commit counter, used as row and table version
    seq: u64,
    assets: Table<AssetId, Asset>,
    bookings: Table<BookingId, Booking>,
    payments: Table<PaymentId, Payment>,
}

fn read(lock: &RwLock<Tables>) -> RwLockReadGuard<'_, Tables> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// A unit of work over assets, bookings and payments.
///
/// Nothing is visible to other transactions until the enclosing
/// [`MemoryStore::transaction`] commits.
pub struct Transaction<'s> {
    tables: &'s RwLock<Tables>,
    assets: Pending<AssetId, Asset>,
    bookings: Pending<BookingId, Booking>,
    payments: Pending<PaymentId, Payment>,
}

impl<'s> Transaction<'s> {
    fn new(tables: &'s RwLock<Tables>) -> Self {
        Self {
            tables,
            assets: Pending::new(),
            bookings: Pending::new(),
            payments: Pending::new(),
        }
    }

    pub fn asset(&mut self, id: &AssetId) -> Option<Asset> {
        let tables = read(self.tables);
        self.assets.get(&tables.assets, id)
    }

    pub fn booking(&mut self, id: &BookingId) -> Option<Booking> {
        let tables = read(self.tables);
        self.bookings.get(&tables.bookings, id)
    }

    pub fn payment(&mut self, id: &PaymentId) -> Option<Payment> {
        let tables = read(self.tables);
        self.payments.get(&tables.payments, id)
    }

    /// Bookings matching `filter`. Any booking committed by someone else
    /// before this transaction commits invalidates it.
    pub fn bookings_where(&mut self, filter: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let tables = read(self.tables);
        self.bookings.scan(&tables.bookings, filter)
    }

    pub fn payments_where(&mut self, filter: impl Fn(&Payment) -> bool) -> Vec<Payment> {
        let tables = read(self.tables);
        self.payments.scan(&tables.payments, filter)
    }

    pub fn put_asset(&mut self, asset: Asset) {
        self.assets.writes.insert(asset.id, asset);
    }

    pub fn put_booking(&mut self, booking: Booking) {
        self.bookings.writes.insert(booking.id, booking);
    }

    pub fn put_payment(&mut self, payment: Payment) {
        self.payments.writes.insert(payment.id, payment);
    }

    fn is_valid(&self, tables: &Tables) -> bool {
        self.assets.is_valid(&tables.assets)
            && self.bookings.is_valid(&tables.bookings)
            && self.payments.is_valid(&tables.payments)
    }

    fn is_read_only(&self) -> bool {
        self.assets.writes.is_empty()
            && self.bookings.writes.is_empty()
            && self.payments.writes.is_empty()
    }
}

/// Shared transactional store.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                seq: 0,
                assets: Table::new(),
                bookings: Table::new(),
                payments: Table::new(),
            }),
        }
    }

    /// Run `f` as one atomic transaction.
    ///
    /// `f` may run several times: whenever another transaction committed a
    /// change to something `f` read, its writes are discarded and it is
    /// re-run. An error from `f` is returned only if it was computed from a
    /// still-current read set; otherwise it is retried as well.
    pub fn transaction<T, F>(&self, mut f: F) -> Result<T, LedgerError>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, LedgerError>,
    {
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let mut txn = Transaction::new(&self.tables);
            match f(&mut txn) {
                Ok(value) => {
                    if self.commit(txn) {
                        return Ok(value);
                    }
                }
                Err(e) => {
                    if txn.is_valid(&read(&self.tables)) {
                        return Err(e);
                    }
                }
            }
            debug!(attempt, "transaction conflict, retrying");
            std::thread::yield_now();
        }
        Err(LedgerError::Contention(MAX_TXN_ATTEMPTS))
    }

    fn commit(&self, txn: Transaction<'_>) -> bool {
        let mut guard = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let tables = &mut *guard;
        if !txn.is_valid(tables) {
            return false;
        }
        if txn.is_read_only() {
            return true;
        }

        tables.seq += 1;
        let version = tables.seq;
        tables.assets.apply(txn.assets.writes, version);
        tables.bookings.apply(txn.bookings.writes, version);
        tables.payments.apply(txn.payments.writes, version);
        true
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::Availability;
    use std::cell::Cell;

    fn asset() -> Asset {
        Asset {
            id: AssetId::new(),
            price: Amount::from_units(10_000),
            discounted_price: None,
            deposit_amount: Amount::from_units(1000),
            availability: Availability::Approved,
        }
    }

    fn insert(store: &MemoryStore, asset: &Asset) {
        store
            .transaction(|txn| {
                txn.put_asset(asset.clone());
                Ok(())
            })
            .unwrap();
    }

    fn set_availability(store: &MemoryStore, id: AssetId, availability: Availability) {
        store
            .transaction(|txn| {
                let mut asset = txn.asset(&id).unwrap();
                asset.availability = availability;
                txn.put_asset(asset);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        let asset = asset();
        insert(&store, &asset);

        let read = store.transaction(|txn| Ok(txn.asset(&asset.id))).unwrap();
        assert_eq!(read, Some(asset));
    }

    #[test]
    fn transaction_sees_its_own_writes() {
        let store = MemoryStore::new();
        let asset = asset();
        insert(&store, &asset);

        let seen = store
            .transaction(|txn| {
                let mut a = txn.asset(&asset.id).unwrap();
                a.availability = Availability::Sold;
                txn.put_asset(a);
                Ok(txn.asset(&asset.id).unwrap().availability)
            })
            .unwrap();
        assert_eq!(seen, Availability::Sold);
    }

    #[test]
    fn failed_transaction_discards_writes() {
        let store = MemoryStore::new();
        let asset = asset();
        insert(&store, &asset);

        let result: Result<(), _> = store.transaction(|txn| {
            let mut a = txn.asset(&asset.id).unwrap();
            a.availability = Availability::Sold;
            txn.put_asset(a);
            Err(LedgerError::AssetNotFound(asset.id))
        });
        assert!(matches!(result, Err(LedgerError::AssetNotFound(_))));

        let read = store.transaction(|txn| Ok(txn.asset(&asset.id))).unwrap();
        assert_eq!(read.unwrap().availability, Availability::Approved);
    }

    #[test]
    fn conflicting_commit_reruns_transaction() {
        let store = MemoryStore::new();
        let asset = asset();
        insert(&store, &asset);
        let attempts = Cell::new(0);

        let seen = store
            .transaction(|txn| {
                attempts.set(attempts.get() + 1);
                let mut a = txn.asset(&asset.id).unwrap();
                if attempts.get() == 1 {
                    // a racing transaction commits between our read and our commit
                    set_availability(&store, asset.id, Availability::Reserved);
                }
                let seen = a.availability;
                a.deposit_amount = Amount::from_units(2000);
                txn.put_asset(a);
                Ok(seen)
            })
            .unwrap();

        assert_eq!(attempts.get(), 2);
        assert_eq!(seen, Availability::Reserved);
        let read = store.transaction(|txn| Ok(txn.asset(&asset.id))).unwrap().unwrap();
        assert_eq!(read.availability, Availability::Reserved);
        assert_eq!(read.deposit_amount, Amount::from_units(2000));
    }

    #[test]
    fn error_from_stale_read_is_retried() {
        let store = MemoryStore::new();
        let asset = asset();
        insert(&store, &asset);
        set_availability(&store, asset.id, Availability::Reserved);
        let attempts = Cell::new(0);

        let result = store.transaction(|txn| {
            attempts.set(attempts.get() + 1);
            let a = txn.asset(&asset.id).unwrap();
            if attempts.get() == 1 {
                set_availability(&store, asset.id, Availability::Approved);
            }
            if a.availability != Availability::Approved {
                return Err(LedgerError::AssetUnavailable(a.id, a.availability));
            }
            Ok(())
        });

        assert!(result.is_ok());
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn scan_detects_phantom_insert() {
        let store = MemoryStore::new();
        let asset = asset();
        let attempts = Cell::new(0);

        let count = store
            .transaction(|txn| {
                attempts.set(attempts.get() + 1);
                let found = txn.bookings_where(|b| b.asset_id == asset.id).len();
                if attempts.get() == 1 {
                    store
                        .transaction(|other| {
                            other.put_booking(Booking::new(
                                "racer".into(),
                                asset.id,
                                Amount::from_units(5000),
                                Amount::from_units(1000),
                                crate::model::UserInfo {
                                    name: "R".into(),
                                    email: "r@example.com".into(),
                                    phone: "1".into(),
                                },
                                chrono::Utc::now(),
                            ));
                            Ok(())
                        })
                        .unwrap();
                }
                txn.put_asset(asset.clone());
                Ok(found)
            })
            .unwrap();

        assert_eq!(attempts.get(), 2);
        assert_eq!(count, 1);
    }

    #[test]
    fn persistent_conflict_gives_up() {
        let store = MemoryStore::new();
        let asset = asset();
        insert(&store, &asset);

        let result = store.transaction(|txn| {
            let a = txn.asset(&asset.id).unwrap();
            let flipped = match a.availability {
                Availability::Approved => Availability::Sold,
                _ => Availability::Approved,
            };
            set_availability(&store, asset.id, flipped);
            txn.put_asset(a);
            Ok(())
        });

        assert!(matches!(
            result,
            Err(LedgerError::Contention(MAX_TXN_ATTEMPTS))
        ));
    }
}
