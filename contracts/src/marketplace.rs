//! # Marketplace Host
//!
//! Binds a [`ProductRegistry`] to the native [`Ledger`] it settles against
//! and, optionally, to a [`StateStore`] (normally a [`StateDB`]) that makes
//! both survive restarts.
//!
//! Each transition runs in two steps:
//!
//! 1. The registry operation runs in memory (all checks, the transfer and the
//!    ownership flip).
//! 2. Every touched record, balance and the product counter are committed to
//!    the database in one batch.
//!
//! If step 2 fails, step 1 is rolled back, so memory and disk never disagree
//! and the caller sees a single failed call. Subscribers are notified only
//! after both steps succeed.

use std::fmt;

use agora_protocol::config::META_PRODUCT_COUNT;
use agora_protocol::identity::Address;
use agora_protocol::storage::{DbError, StateBatch, StateDB, StateStore};
use agora_protocol::vault::{Amount, BalanceError, Ledger};
use thiserror::Error;

use crate::product_registry::{
    MarketEvent, Product, ProductCreated, ProductId, ProductPurchased, ProductRegistry,
    RegistryError, RestoreError, Subscriber,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the marketplace host.
#[derive(Debug, Error)]
pub enum MarketError {
    /// The registry rejected the call.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A faucet credit could not be applied.
    #[error(transparent)]
    Balance(#[from] BalanceError),

    /// The transition was valid but could not be persisted; it was rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    /// Persisted records do not form a valid registry.
    #[error("restore failed: {0}")]
    Restore(#[from] RestoreError),

    /// The persisted counter disagrees with the persisted records.
    #[error("stored product count {stored} disagrees with {restored} restored records")]
    CountMismatch {
        /// Value of the `product_count` metadata key.
        stored: u64,
        /// Number of records actually found.
        restored: u64,
    },
}

impl MarketError {
    /// Short, stable name of the error kind. Registry rejections keep their
    /// own names; everything else collapses into a handful of buckets.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::Registry(e) => e.kind(),
            MarketError::Balance(_) => "balance",
            MarketError::Storage(_) => "storage",
            MarketError::Restore(_) | MarketError::CountMismatch { .. } => "restore",
        }
    }
}

// ---------------------------------------------------------------------------
// Marketplace
// ---------------------------------------------------------------------------

/// A registry, its ledger, and optional persistence.
pub struct Marketplace {
    registry: ProductRegistry,
    ledger: Ledger,
    store: Option<Box<dyn StateStore>>,
    subscribers: Vec<Subscriber>,
}

impl Marketplace {
    /// A marketplace that lives only in memory.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            registry: ProductRegistry::with_name(name),
            ledger: Ledger::new(),
            store: None,
            subscribers: Vec::new(),
        }
    }

    /// Opens a marketplace backed by `db`, restoring any persisted products
    /// and balances.
    ///
    /// # Errors
    ///
    /// [`MarketError::Storage`] if the database can't be read,
    /// [`MarketError::Restore`] if the records are not a valid registry, and
    /// [`MarketError::CountMismatch`] if the stored counter disagrees with
    /// the records.
    pub fn open(db: StateDB, name: impl Into<String>) -> Result<Self, MarketError> {
        let mut products = Vec::new();
        for (key, product) in db.records::<Product>()? {
            if key != product.id {
                return Err(DbError::Corrupt {
                    tree: "records",
                    reason: format!("record stored under {} claims id {}", key, product.id),
                }
                .into());
            }
            products.push(product);
        }

        let restored = products.len() as u64;
        let stored = db.get_meta(META_PRODUCT_COUNT)?.unwrap_or(0);
        if stored != restored {
            return Err(MarketError::CountMismatch { stored, restored });
        }
        let registry = ProductRegistry::restore(name, products)?;

        let mut ledger = Ledger::new();
        for (address, balance) in db.accounts()? {
            ledger.set_balance(address, balance);
        }

        tracing::info!(
            products = registry.product_count(),
            accounts = ledger.account_count(),
            "marketplace restored"
        );

        Ok(Self {
            registry,
            ledger,
            store: Some(Box::new(db)),
            subscribers: Vec::new(),
        })
    }

    /// Sends every later commit to `store` instead of the current target.
    /// State already in memory is kept as is and is not written out.
    pub fn with_store<S>(mut self, store: S) -> Self
    where
        S: StateStore + 'static,
    {
        self.store = Some(Box::new(store));
        self
    }

    // -- Reads --------------------------------------------------------------

    /// The registry's static name.
    pub fn name(&self) -> &str {
        self.registry.name()
    }

    /// Number of products ever created.
    pub fn product_count(&self) -> u64 {
        self.registry.product_count()
    }

    /// Raw lookup; out-of-range ids yield the default record.
    pub fn products(&self, id: ProductId) -> Product {
        self.registry.products(id)
    }

    /// Bounds-checked lookup.
    pub fn product(&self, id: ProductId) -> Option<&Product> {
        self.registry.product(id)
    }

    /// All products in id order.
    pub fn list_products(&self) -> impl Iterator<Item = &Product> {
        self.registry.iter()
    }

    /// Native balance of `account`.
    pub fn balance_of(&self, account: &Address) -> Amount {
        self.ledger.balance_of(account)
    }

    /// Read access to the underlying ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Registers a callback for every committed transition.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: Fn(&MarketEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(callback));
    }

    // -- Transitions --------------------------------------------------------

    /// Credits `amount` to `account`. Genesis and devnet faucet only; ordinary
    /// value movement happens through purchases.
    pub fn fund(&mut self, account: Address, amount: Amount) -> Result<Amount, MarketError> {
        let previous = self.ledger.entry(&account);
        let balance = self.ledger.credit(account, amount)?;

        let mut batch = StateBatch::new();
        batch.put_account(account, balance);
        if let Err(e) = self.persist(&batch) {
            tracing::error!(%account, error = %e, "failed to persist funding, rolling back");
            self.ledger.restore_entry(account, previous);
            return Err(e.into());
        }

        tracing::info!(%account, amount = %amount, balance = %balance, "account funded");
        Ok(balance)
    }

    /// Lists a product owned by `caller`. See
    /// [`ProductRegistry::create_product`].
    pub fn create_product(
        &mut self,
        name: impl Into<String>,
        price: Amount,
        caller: Address,
    ) -> Result<ProductCreated, MarketError> {
        let created = self.registry.create_product(name, price, caller)?;

        let persisted = self.registry.product(created.id).map(|product| -> Result<(), DbError> {
            let mut batch = StateBatch::new();
            batch.put_record(product.id, product)?;
            batch.set_meta(META_PRODUCT_COUNT, self.registry.product_count());
            self.persist(&batch)
        });
        if let Some(Err(e)) = persisted {
            tracing::error!(id = created.id, error = %e, "failed to persist new product, rolling back");
            self.registry.rollback_create();
            return Err(e.into());
        }

        self.notify(&MarketEvent::ProductCreated(created.clone()));
        Ok(created)
    }

    /// Buys product `id` for `caller`, settling against the marketplace
    /// ledger. See [`ProductRegistry::purchase_product`].
    pub fn purchase_product(
        &mut self,
        id: ProductId,
        caller: Address,
        payment: Amount,
    ) -> Result<ProductPurchased, MarketError> {
        let previous = self.registry.product(id).cloned();
        let seller = previous.as_ref().map(|p| p.owner).unwrap_or_default();
        let buyer_entry = self.ledger.entry(&caller);
        let seller_entry = self.ledger.entry(&seller);

        let purchased = self
            .registry
            .purchase_product(id, caller, payment, &mut self.ledger)?;

        let result = self.registry.product(id).map(|product| -> Result<(), DbError> {
            let mut batch = StateBatch::new();
            batch.put_record(id, product)?;
            batch
                .put_account(caller, self.ledger.balance_of(&caller))
                .put_account(seller, self.ledger.balance_of(&seller));
            self.persist(&batch)
        });
        if let Some(Err(e)) = result {
            tracing::error!(id, error = %e, "failed to persist purchase, rolling back");
            if let Some(previous) = previous {
                self.registry.rollback_purchase(previous);
            }
            self.ledger.restore_entry(caller, buyer_entry);
            self.ledger.restore_entry(seller, seller_entry);
            return Err(e.into());
        }

        self.notify(&MarketEvent::ProductPurchased(purchased.clone()));
        Ok(purchased)
    }

    fn persist(&self, batch: &StateBatch) -> Result<(), DbError> {
        match &self.store {
            Some(store) => store.commit(batch),
            None => Ok(()),
        }
    }

    fn notify(&self, event: &MarketEvent) {
        for subscriber in &self.subscribers {
            subscriber(event);
        }
    }
}

impl fmt::Debug for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marketplace")
            .field("registry", &self.registry)
            .field("accounts", &self.ledger.account_count())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_protocol::config::{MARKETPLACE_NAME, UNIT};

    fn seller() -> Address {
        Address::from_bytes([0x5E; 20])
    }

    fn buyer() -> Address {
        Address::from_bytes([0xB7; 20])
    }

    #[test]
    fn in_memory_marketplace_round_trip() {
        let mut market = Marketplace::in_memory(MARKETPLACE_NAME);
        market.fund(buyer(), 2 * UNIT).unwrap();
        market.create_product("Lamp", UNIT, seller()).unwrap();
        let sold = market.purchase_product(1, buyer(), UNIT).unwrap();

        assert_eq!(sold.owner, buyer());
        assert_eq!(market.balance_of(&seller()), UNIT);
        assert_eq!(market.balance_of(&buyer()), UNIT);
    }

    #[test]
    fn fund_overflow_is_rejected_without_change() {
        let mut market = Marketplace::in_memory(MARKETPLACE_NAME);
        market.fund(buyer(), u128::MAX).unwrap();
        let err = market.fund(buyer(), 1).unwrap_err();
        assert!(matches!(err, MarketError::Balance(BalanceError::Overflow { .. })));
        assert_eq!(market.balance_of(&buyer()), u128::MAX);
    }

    #[test]
    fn persistent_marketplace_writes_every_transition() {
        let db = StateDB::open_temporary().unwrap();
        let mut market = Marketplace::open(db.clone(), MARKETPLACE_NAME).unwrap();
        market.fund(buyer(), 3 * UNIT).unwrap();
        market.create_product("Lamp", UNIT, seller()).unwrap();
        market.purchase_product(1, buyer(), UNIT).unwrap();

        assert_eq!(db.get_meta(META_PRODUCT_COUNT).unwrap(), Some(1));
        let stored: Product = db.get_record(1).unwrap().unwrap();
        assert_eq!(stored.owner, buyer());
        assert!(stored.purchased);
        assert_eq!(db.get_account(&seller()).unwrap(), Some(UNIT));
        assert_eq!(db.get_account(&buyer()).unwrap(), Some(2 * UNIT));
    }

    #[test]
    fn rejected_calls_write_nothing() {
        let db = StateDB::open_temporary().unwrap();
        let mut market = Marketplace::open(db.clone(), MARKETPLACE_NAME).unwrap();
        market.create_product("", UNIT, seller()).unwrap_err();
        market.purchase_product(1, buyer(), UNIT).unwrap_err();

        assert_eq!(db.record_count(), 0);
        assert_eq!(db.account_count(), 0);
        assert_eq!(db.get_meta(META_PRODUCT_COUNT).unwrap(), None);
    }

    #[test]
    fn open_rejects_counter_mismatch() {
        let db = StateDB::open_temporary().unwrap();
        let mut batch = StateBatch::new();
        batch.set_meta(META_PRODUCT_COUNT, 3);
        db.commit(&batch).unwrap();

        let err = Marketplace::open(db, MARKETPLACE_NAME).unwrap_err();
        assert!(matches!(
            err,
            MarketError::CountMismatch {
                stored: 3,
                restored: 0
            }
        ));
    }

    #[test]
    fn open_rejects_misfiled_records() {
        let db = StateDB::open_temporary().unwrap();
        let record = Product {
            id: 2,
            name: "Lamp".into(),
            price: 1,
            owner: seller(),
            purchased: false,
        };
        let mut batch = StateBatch::new();
        batch.put_record(1, &record).unwrap();
        batch.set_meta(META_PRODUCT_COUNT, 1);
        db.commit(&batch).unwrap();

        let err = Marketplace::open(db, MARKETPLACE_NAME).unwrap_err();
        assert!(matches!(err, MarketError::Storage(DbError::Corrupt { .. })));
    }

    #[test]
    fn subscribers_fire_after_commit() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut market = Marketplace::open(StateDB::open_temporary().unwrap(), "x").unwrap();
        market.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        market.fund(buyer(), UNIT).unwrap();
        market.create_product("Lamp", UNIT, seller()).unwrap();
        market.purchase_product(1, seller(), UNIT).unwrap_err();
        market.purchase_product(1, buyer(), UNIT).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    /// Store that forwards to a real database until told to refuse.
    struct SwitchableStore {
        inner: StateDB,
        refuse: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    impl StateStore for SwitchableStore {
        fn commit(&self, batch: &StateBatch) -> Result<(), DbError> {
            if self.refuse.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DbError::Transaction("store offline".into()));
            }
            self.inner.commit(batch)
        }
    }

    fn switchable_market() -> (Marketplace, StateDB, std::sync::Arc<std::sync::atomic::AtomicBool>) {
        let db = StateDB::open_temporary().unwrap();
        let refuse = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let market = Marketplace::open(db.clone(), MARKETPLACE_NAME)
            .unwrap()
            .with_store(SwitchableStore {
                inner: db.clone(),
                refuse: std::sync::Arc::clone(&refuse),
            });
        (market, db, refuse)
    }

    #[test]
    fn failed_fund_commit_restores_a_missing_entry() {
        use std::sync::atomic::Ordering;

        let (mut market, db, refuse) = switchable_market();
        refuse.store(true, Ordering::SeqCst);

        let err = market.fund(buyer(), UNIT).unwrap_err();
        assert_eq!(err.kind(), "storage");
        assert_eq!(market.ledger().entry(&buyer()), None);
        assert_eq!(db.get_account(&buyer()).unwrap(), None);
    }

    #[test]
    fn failed_create_commit_is_rolled_back() {
        use std::sync::atomic::Ordering;

        let (mut market, db, refuse) = switchable_market();
        market.create_product("Lamp", UNIT, seller()).unwrap();

        refuse.store(true, Ordering::SeqCst);
        let err = market.create_product("Desk", 2 * UNIT, seller()).unwrap_err();
        assert!(matches!(err, MarketError::Storage(DbError::Transaction(_))));
        assert_eq!(market.product_count(), 1);
        assert!(market.product(2).is_none());
        assert_eq!(db.get_meta(META_PRODUCT_COUNT).unwrap(), Some(1));

        // The id was not burned.
        refuse.store(false, Ordering::SeqCst);
        let desk = market.create_product("Desk", 2 * UNIT, seller()).unwrap();
        assert_eq!(desk.id, 2);
    }

    #[test]
    fn failed_purchase_commit_restores_record_and_both_entries() {
        use std::sync::atomic::Ordering;

        let (mut market, db, refuse) = switchable_market();
        market.fund(buyer(), 3 * UNIT).unwrap();
        market.create_product("Lamp", UNIT, seller()).unwrap();
        let before = market.products(1);
        let ledger_before = market.ledger().clone();

        refuse.store(true, Ordering::SeqCst);
        let err = market.purchase_product(1, buyer(), UNIT).unwrap_err();
        assert_eq!(err.kind(), "storage");

        assert_eq!(market.products(1), before);
        assert_eq!(market.ledger(), &ledger_before);
        assert_eq!(market.ledger().entry(&buyer()), Some(3 * UNIT));
        // The seller never had an entry; rollback must not leave a zero behind.
        assert_eq!(market.ledger().entry(&seller()), None);
        assert_eq!(db.get_account(&seller()).unwrap(), None);
        assert!(!db.get_record::<Product>(1).unwrap().unwrap().purchased);

        refuse.store(false, Ordering::SeqCst);
        let sold = market.purchase_product(1, buyer(), UNIT).unwrap();
        assert_eq!(sold.owner, buyer());
        assert_eq!(db.get_account(&seller()).unwrap(), Some(UNIT));
    }
}
