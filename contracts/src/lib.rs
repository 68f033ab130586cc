//! # Agora Contracts
//!
//! On-chain logic for the Agora marketplace:
//!
//! - **Product Registry**: an append-only list of products. Sellers list,
//!   buyers pay the exact price, ownership flips once and forever.
//! - **Marketplace**: hosts a registry together with the native ledger it
//!   settles against, and persists every committed transition.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow. Wrapping arithmetic and
//!    money do not mix.
//! 2. Every precondition is checked before any state moves. A rejected call
//!    leaves state exactly as it found it.
//! 3. The caller is always an explicit argument, never ambient context.
//! 4. Every public type is serializable (serde) for wire transport and
//!    persistent storage.

pub mod marketplace;
pub mod product_registry;

pub use marketplace::{MarketError, Marketplace};
pub use product_registry::{
    InvalidInput, MarketEvent, Product, ProductCreated, ProductId, ProductPurchased,
    ProductRegistry, RegistryError, RestoreError, Settlement, TransferError,
};
