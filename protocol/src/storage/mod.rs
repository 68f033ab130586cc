//! # Storage Module
//!
//! Persistent storage for Agora state. Contract records, account balances
//! and counters survive restarts through a single sled database per node.
//!
//! ## Design Decisions
//!
//! 1. **One transaction per state transition.** A purchase touches a record,
//!    two balances and nothing else; all of it goes through one
//!    [`StateBatch`] so a crash can never persist half a sale.
//!
//! 2. **Bincode for on-disk serialization.** Compact, fast, deterministic.
//!    JSON is for APIs and debugging; bincode is for storage.

pub mod db;

pub use db::{DbError, DbResult, StateBatch, StateDB, StateStore};
