//! # Native-Value Ledger
//!
//! Tracks the native coin balance of every account, in base units. This is
//! the value a buyer attaches to a purchase and the value forwarded to the
//! seller. The ledger enforces two invariants:
//!
//! 1. You can never spend more than you have.
//! 2. No balance ever wraps past `u128::MAX`.
//!
//! A [`transfer`](Ledger::transfer) validates both legs before touching either
//! balance, so a failed transfer leaves the ledger exactly as it was.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Address;
use crate::vault::Amount;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during balance operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BalanceError {
    /// Attempted to debit more than the available balance.
    #[error("insufficient balance: {account} has {available}, requested {requested}")]
    InsufficientBalance {
        /// The account that was being debited.
        account: Address,
        /// The current balance.
        available: Amount,
        /// The amount that was requested.
        requested: Amount,
    },

    /// Arithmetic overflow during a credit operation. No real supply gets near
    /// `u128::MAX`, so this points at a bug upstream.
    #[error("balance overflow: {account} holds {current}, credit {credit}")]
    Overflow {
        /// The account that was being credited.
        account: Address,
        /// The current balance before the failed credit.
        current: Amount,
        /// The amount that caused the overflow.
        credit: Amount,
    },
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Native-coin balances keyed by [`Address`].
///
/// Accounts that were never credited read as zero. Entries are kept in a
/// `BTreeMap` so that iteration (and therefore persistence) is deterministic.
/// Thread safety is the owner's problem: wrap it in a lock if you share it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    balances: BTreeMap<Address, Amount>,
}

impl Ledger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the balance of `account`, or 0 if it has never held funds.
    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Overwrites the balance of `account`.
    ///
    /// Used for genesis funding, restoring persisted state, and rolling back a
    /// transition whose commit failed. Ordinary value movement goes through
    /// [`transfer`](Self::transfer).
    pub fn set_balance(&mut self, account: Address, amount: Amount) {
        self.balances.insert(account, amount);
    }

    /// Returns the raw entry for `account`: `None` if it has no entry at all,
    /// which is distinct from an entry holding zero.
    pub fn entry(&self, account: &Address) -> Option<Amount> {
        self.balances.get(account).copied()
    }

    /// Restores an entry captured earlier with [`entry`](Self::entry).
    pub fn restore_entry(&mut self, account: Address, entry: Option<Amount>) {
        match entry {
            Some(amount) => {
                self.balances.insert(account, amount);
            }
            None => {
                self.balances.remove(&account);
            }
        }
    }

    /// Credits (adds) funds to an account and returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::Overflow`] if the credit would exceed `u128::MAX`.
    pub fn credit(&mut self, account: Address, amount: Amount) -> Result<Amount, BalanceError> {
        let current = self.balance_of(&account);
        let new_amount = current
            .checked_add(amount)
            .ok_or(BalanceError::Overflow {
                account,
                current,
                credit: amount,
            })?;
        self.balances.insert(account, new_amount);
        Ok(new_amount)
    }

    /// Debits (subtracts) funds from an account and returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::InsufficientBalance`] if the debit exceeds
    /// the current balance.
    pub fn debit(&mut self, account: Address, amount: Amount) -> Result<Amount, BalanceError> {
        let available = self.balance_of(&account);
        if available < amount {
            return Err(BalanceError::InsufficientBalance {
                account,
                available,
                requested: amount,
            });
        }
        let new_amount = available - amount;
        self.balances.insert(account, new_amount);
        Ok(new_amount)
    }

    /// Moves `amount` from `from` to `to`, all or nothing.
    ///
    /// Both the debit and the credit are validated before either is applied.
    /// A self-transfer or a zero amount is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::InsufficientBalance`] if `from` cannot cover the
    /// amount, or [`BalanceError::Overflow`] if `to` cannot receive it. In both
    /// cases no balance has changed.
    pub fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), BalanceError> {
        let available = self.balance_of(&from);
        if available < amount {
            return Err(BalanceError::InsufficientBalance {
                account: from,
                available,
                requested: amount,
            });
        }
        if from == to || amount == 0 {
            return Ok(());
        }

        let current = self.balance_of(&to);
        let credited = current
            .checked_add(amount)
            .ok_or(BalanceError::Overflow {
                account: to,
                current,
                credit: amount,
            })?;

        self.balances.insert(from, available - amount);
        self.balances.insert(to, credited);

        tracing::trace!(%from, %to, amount = %amount, "ledger transfer");
        Ok(())
    }

    /// Iterates over every known account and its balance, in address order.
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, Amount)> {
        self.balances.iter().map(|(a, b)| (a, *b))
    }

    /// Returns the number of accounts with an entry (including zero balances).
    pub fn account_count(&self) -> usize {
        self.balances.len()
    }

    /// Sum of all balances, or `None` if it does not fit in an [`Amount`].
    pub fn total_supply(&self) -> Option<Amount> {
        self.balances
            .values()
            .try_fold(0 as Amount, |sum, b| sum.checked_add(*b))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
