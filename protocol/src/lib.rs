// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Agora Protocol: Core Library
//!
//! The primitives every Agora contract and node builds on: who an account
//! is, how much native value it holds, and how state reaches disk.
//!
//! ## Architecture
//!
//! - **config**: Protocol constants and node defaults.
//! - **identity**: 20-byte account addresses.
//! - **vault**: The native-value ledger. Checked arithmetic, all-or-nothing transfers.
//! - **storage**: sled-backed persistence with atomic multi-tree commits.
//!
//! ## Design Philosophy
//!
//! 1. Correctness over cleverness.
//! 2. Every failure is a typed error, never a panic.
//! 3. If it touches money, it has tests. Plural.

pub mod config;
pub mod identity;
pub mod storage;
pub mod vault;
