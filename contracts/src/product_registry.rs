//! # Product Registry Contract
//!
//! An append-only registry of products for sale. Sellers list a product with
//! a name and a price; buyers purchase it by attaching exactly the listed
//! price, which is forwarded to the seller, and ownership of the record flips
//! to the buyer. The lifecycle of a product is:
//!
//! 1. **Create**: the caller becomes the owner; the record is unpurchased.
//! 2. **Purchase**: one-way, terminal. Funds move and ownership flips as a
//!    single unit.
//!
//! Records are never updated otherwise and never removed. Ids are dense,
//! assigned from a counter starting at 1.
//!
//! ## Payment Policy
//!
//! The attached payment must equal the price exactly. Overpayment is rejected
//! outright rather than refunded; there is no change-making in this contract.
//!
//! ## Settlement
//!
//! Value movement goes through the [`Settlement`] seam. The registry checks
//! every precondition first, then asks the settlement layer to move the funds,
//! and only flips ownership once the transfer has succeeded. A failed transfer
//! leaves the record untouched.

use std::fmt;

use agora_protocol::config::MARKETPLACE_NAME;
use agora_protocol::identity::Address;
use agora_protocol::vault::{Amount, BalanceError, Ledger};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a create request was malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidInput {
    /// The product name was empty.
    #[error("product name must not be empty")]
    EmptyName,
    /// The price was zero.
    #[error("product price must be greater than zero")]
    ZeroPrice,
}

/// Failure reported by a [`Settlement`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The native ledger refused the transfer.
    #[error(transparent)]
    Balance(#[from] BalanceError),

    /// Any other settlement layer refused the transfer.
    #[error("settlement rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur during registry operations.
///
/// Every variant is a terminal rejection of that call: state is exactly as it
/// was before the call, and nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Empty name or zero price.
    #[error("invalid input: {0}")]
    InvalidInput(InvalidInput),

    /// The id is outside `1..=product_count`.
    #[error("product {id} not found (product count is {product_count})")]
    NotFound {
        /// The requested id.
        id: u64,
        /// Number of products at the time of the call.
        product_count: u64,
    },

    /// The attached payment differs from the listed price.
    #[error("payment mismatch for product {id}: price is {price}, attached {payment}")]
    PaymentMismatch {
        /// The product being bought.
        id: u64,
        /// Its listed price.
        price: Amount,
        /// The amount the caller attached.
        payment: Amount,
    },

    /// The product has already been sold.
    #[error("product {id} has already been purchased")]
    AlreadyPurchased {
        /// The product being bought.
        id: u64,
    },

    /// The caller already owns the product.
    #[error("{caller} cannot purchase product {id}: caller is the owner")]
    SelfPurchaseForbidden {
        /// The product being bought.
        id: u64,
        /// The caller, who is also the owner.
        caller: Address,
    },

    /// Moving the payment to the owner failed.
    #[error("transfer failed: {0}")]
    TransferFailure(#[from] TransferError),
}

impl RegistryError {
    /// Short, stable name of the error kind. Used for metric labels and API
    /// error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::InvalidInput(_) => "invalid_input",
            RegistryError::NotFound { .. } => "not_found",
            RegistryError::PaymentMismatch { .. } => "payment_mismatch",
            RegistryError::AlreadyPurchased { .. } => "already_purchased",
            RegistryError::SelfPurchaseForbidden { .. } => "self_purchase_forbidden",
            RegistryError::TransferFailure(_) => "transfer_failure",
        }
    }
}

/// Errors raised while rebuilding a registry from persisted records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestoreError {
    /// Records must be numbered `1, 2, 3, ...` with no gaps.
    #[error("product ids are not dense: expected id {expected}, found {found}")]
    NonDenseIds {
        /// The id that should have come next.
        expected: u64,
        /// The id actually found.
        found: u64,
    },

    /// A stored record violates a creation precondition.
    #[error("stored product {id} is invalid: {reason}")]
    InvalidRecord {
        /// The offending record.
        id: u64,
        /// Which precondition it violates.
        reason: InvalidInput,
    },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Product identifier. Dense, starting at 1.
pub type ProductId = u64;

/// A product record.
///
/// `Product::default()` is the empty record returned for out-of-range raw
/// lookups: id 0, empty name, price 0, zero owner, not purchased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Position in creation order, starting at 1.
    pub id: ProductId,
    /// Display name. Never empty on a real record.
    pub name: String,
    /// Price in base units. Never zero on a real record.
    #[serde(with = "agora_protocol::vault::amount")]
    pub price: Amount,
    /// The seller until the product is purchased, the buyer afterwards.
    pub owner: Address,
    /// Set exactly once, by the purchase.
    pub purchased: bool,
}

/// Result of a successful create: the new record's full state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    /// Id assigned to the new listing; equals the new product count.
    pub id: ProductId,
    /// Name as listed.
    pub name: String,
    /// Asking price in base units.
    #[serde(with = "agora_protocol::vault::amount")]
    pub price: Amount,
    /// The seller who listed it.
    pub owner: Address,
    /// Always `false` for a fresh listing.
    pub purchased: bool,
}

/// Result of a successful purchase: the record after ownership flipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPurchased {
    /// Id of the product sold.
    pub id: ProductId,
    /// Name as listed.
    pub name: String,
    /// Price paid, which is also what the seller received.
    #[serde(with = "agora_protocol::vault::amount")]
    pub price: Amount,
    /// The buyer, now the owner.
    pub owner: Address,
    /// Always `true` after a purchase.
    pub purchased: bool,
}

impl From<&Product> for ProductCreated {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            price: p.price,
            owner: p.owner,
            purchased: p.purchased,
        }
    }
}

impl From<&Product> for ProductPurchased {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            price: p.price,
            owner: p.owner,
            purchased: p.purchased,
        }
    }
}

/// A committed state transition, delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarketEvent {
    /// A product was listed.
    #[serde(rename = "product_created")]
    ProductCreated(ProductCreated),
    /// A product was sold.
    #[serde(rename = "product_purchased")]
    ProductPurchased(ProductPurchased),
}

impl MarketEvent {
    /// Id of the product the event is about.
    pub fn product_id(&self) -> ProductId {
        match self {
            MarketEvent::ProductCreated(e) => e.id,
            MarketEvent::ProductPurchased(e) => e.id,
        }
    }
}

/// Callback invoked with every committed [`MarketEvent`].
pub type Subscriber = Box<dyn Fn(&MarketEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Moves native value between accounts on behalf of the registry.
///
/// Implementations must be all-or-nothing: when `transfer` returns an error,
/// no balance may have changed.
pub trait Settlement {
    /// Moves `amount` from `from` to `to`.
    fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), TransferError>;
}

impl Settlement for Ledger {
    fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), TransferError> {
        Ledger::transfer(self, from, to, amount).map_err(TransferError::from)
    }
}

// ---------------------------------------------------------------------------
// ProductRegistry
// ---------------------------------------------------------------------------

/// The registry: all product records plus the two transitions over them.
///
/// Operations take `&mut self`, so a registry is a strict serial log of
/// transitions by construction. Share it across threads behind a lock.
pub struct ProductRegistry {
    name: String,
    product_count: u64,
    products: Vec<Product>,
    subscribers: Vec<Subscriber>,
}

impl ProductRegistry {
    /// Creates an empty registry named [`MARKETPLACE_NAME`].
    pub fn new() -> Self {
        Self::with_name(MARKETPLACE_NAME)
    }

    /// Creates an empty registry with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            product_count: 0,
            products: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Rebuilds a registry from persisted records.
    ///
    /// Records may arrive in any order but their ids must form `1..=n`
    /// exactly, and each must satisfy the creation preconditions.
    pub fn restore(
        name: impl Into<String>,
        mut products: Vec<Product>,
    ) -> Result<Self, RestoreError> {
        products.sort_by_key(|p| p.id);

        for (expected, product) in (1u64..).zip(products.iter()) {
            if product.id != expected {
                return Err(RestoreError::NonDenseIds {
                    expected,
                    found: product.id,
                });
            }
            if let Err(reason) = validate_listing(&product.name, product.price) {
                return Err(RestoreError::InvalidRecord {
                    id: product.id,
                    reason,
                });
            }
        }

        Ok(Self {
            name: name.into(),
            product_count: products.len() as u64,
            products,
            subscribers: Vec::new(),
        })
    }

    /// The registry's static name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of products ever created.
    pub fn product_count(&self) -> u64 {
        self.product_count
    }

    /// Raw lookup. Out-of-range ids return [`Product::default()`] rather than
    /// an error; check bounds against [`product_count`](Self::product_count)
    /// or use [`product`](Self::product) instead.
    pub fn products(&self, id: ProductId) -> Product {
        self.product(id).cloned().unwrap_or_default()
    }

    /// Bounds-checked lookup.
    pub fn product(&self, id: ProductId) -> Option<&Product> {
        let index = id.checked_sub(1)?;
        self.products.get(usize::try_from(index).ok()?)
    }

    /// All products in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Product> {
        self.products.iter()
    }

    /// Registers a callback for every committed transition.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: Fn(&MarketEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(callback));
    }

    /// Lists a new product owned by `caller`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidInput`] if `name` is empty or `price`
    /// is zero. Nothing changes in that case.
    pub fn create_product(
        &mut self,
        name: impl Into<String>,
        price: Amount,
        caller: Address,
    ) -> Result<ProductCreated, RegistryError> {
        let name = name.into();
        if let Err(reason) = validate_listing(&name, price) {
            tracing::debug!(%caller, %reason, "create rejected");
            return Err(RegistryError::InvalidInput(reason));
        }

        self.product_count += 1;
        let product = Product {
            id: self.product_count,
            name,
            price,
            owner: caller,
            purchased: false,
        };
        let created = ProductCreated::from(&product);
        self.products.push(product);

        tracing::info!(
            id = created.id,
            price = %created.price,
            owner = %created.owner,
            "product created"
        );
        self.notify(&MarketEvent::ProductCreated(created.clone()));
        Ok(created)
    }

    /// Buys product `id` for `caller`, paying `payment` through `settlement`.
    ///
    /// Preconditions are checked in this order, and the first failure wins:
    /// the id exists, the payment equals the price, the product is unsold,
    /// the caller is not the owner. Only then are funds moved, and only once
    /// they have moved does ownership flip.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`], [`RegistryError::PaymentMismatch`],
    /// [`RegistryError::AlreadyPurchased`],
    /// [`RegistryError::SelfPurchaseForbidden`] or
    /// [`RegistryError::TransferFailure`]. In every case the record and all
    /// balances are unchanged.
    pub fn purchase_product<S>(
        &mut self,
        id: ProductId,
        caller: Address,
        payment: Amount,
        settlement: &mut S,
    ) -> Result<ProductPurchased, RegistryError>
    where
        S: Settlement + ?Sized,
    {
        let product_count = self.product_count;
        let product = match id
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| self.products.get_mut(i))
        {
            Some(p) => p,
            None => {
                tracing::debug!(id, product_count, %caller, "purchase rejected: unknown product");
                return Err(RegistryError::NotFound { id, product_count });
            }
        };

        if payment != product.price {
            tracing::debug!(
                id,
                price = %product.price,
                payment = %payment,
                "purchase rejected: payment mismatch"
            );
            return Err(RegistryError::PaymentMismatch {
                id,
                price: product.price,
                payment,
            });
        }
        if product.purchased {
            tracing::debug!(id, %caller, "purchase rejected: already purchased");
            return Err(RegistryError::AlreadyPurchased { id });
        }
        if caller == product.owner {
            tracing::debug!(id, %caller, "purchase rejected: caller owns product");
            return Err(RegistryError::SelfPurchaseForbidden { id, caller });
        }

        let seller = product.owner;
        settlement
            .transfer(caller, seller, product.price)
            .map_err(|e| {
                tracing::warn!(id, %caller, %seller, error = %e, "purchase rejected: transfer failed");
                RegistryError::TransferFailure(e)
            })?;

        product.owner = caller;
        product.purchased = true;
        let purchased = ProductPurchased::from(&*product);

        tracing::info!(
            id,
            price = %purchased.price,
            seller = %seller,
            buyer = %caller,
            "product purchased"
        );
        self.notify(&MarketEvent::ProductPurchased(purchased.clone()));
        Ok(purchased)
    }

    /// Drops the most recently created product. Only valid immediately after
    /// a create whose persistence failed.
    pub(crate) fn rollback_create(&mut self) {
        if self.products.pop().is_some() {
            self.product_count -= 1;
        }
    }

    /// Puts back the pre-purchase record. Only valid immediately after a
    /// purchase whose persistence failed.
    pub(crate) fn rollback_purchase(&mut self, previous: Product) {
        if let Some(slot) = previous
            .id
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| self.products.get_mut(i))
        {
            *slot = previous;
        }
    }

    fn notify(&self, event: &MarketEvent) {
        for subscriber in &self.subscribers {
            subscriber(event);
        }
    }
}

impl Default for ProductRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProductRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProductRegistry")
            .field("name", &self.name)
            .field("product_count", &self.product_count)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

fn validate_listing(name: &str, price: Amount) -> Result<(), InvalidInput> {
    if name.is_empty() {
        return Err(InvalidInput::EmptyName);
    }
    if price == 0 {
        return Err(InvalidInput::ZeroPrice);
    }
    Ok(())
}
