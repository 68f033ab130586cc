//! # Vault Module: Native Value
//!
//! The vault is where money lives in Agora. Every payment attached to a
//! purchase and every proceeds transfer to a seller passes through the
//! [`Ledger`].
//!
//! ## Design Principles
//!
//! 1. **All amounts are `u128` in base units.** No floating point. No decimals
//!    in arithmetic. [`crate::config::NATIVE_DECIMALS`] is for display only.
//!    JSON carries them as decimal strings, see [`amount`].
//!
//! 2. **Checked arithmetic everywhere.** Wrapping arithmetic and money do not
//!    mix.
//!
//! 3. **Serializable state.** The ledger derives `Serialize` and `Deserialize`
//!    so balances can be snapshotted or sent over the wire.

pub mod amount;
pub mod ledger;

pub use amount::Amount;
pub use ledger::{BalanceError, Ledger};
