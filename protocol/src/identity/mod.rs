//! # Identity Module
//!
//! Every participant in a market is an account, and every account is named
//! by an [`Address`]. Callers are always passed explicitly to contract
//! operations; nothing in the protocol reads an ambient "current caller".

pub mod address;

pub use address::{Address, AddressError};
