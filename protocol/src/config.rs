//! # Protocol Configuration & Constants
//!
//! Every magic number in Agora lives here. If you're hardcoding a constant
//! somewhere else, move it here before review does it for you.
//!
//! Runtime knobs (ports, data directory, log format) are parsed by the node's
//! CLI; the values below are the defaults it falls back to.

// ---------------------------------------------------------------------------
// Registry Identity
// ---------------------------------------------------------------------------

/// Name reported by `name()` on a freshly deployed registry.
pub const MARKETPLACE_NAME: &str = "My Marketplace";

/// Protocol version string, reported by the node's `version` subcommand
/// and `/status` endpoint.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Native Value
// ---------------------------------------------------------------------------

/// Number of decimal places of the native coin. Display only: the protocol
/// never divides, every amount is an integer count of base units.
pub const NATIVE_DECIMALS: u8 = 18;

/// One whole native coin, in base units (10^18).
pub const UNIT: u128 = 1_000_000_000_000_000_000;

/// Balance given to each account generated by `agora-node init`.
///
/// A hundred coins, the usual allowance of a local development chain.
pub const DEVNET_ACCOUNT_BALANCE: u128 = 100 * UNIT;

/// Default number of accounts generated by `agora-node init`.
pub const DEVNET_ACCOUNT_COUNT: usize = 10;

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// Raw address length in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Prefix of the textual address form.
pub const ADDRESS_PREFIX: &str = "0x";

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default HTTP / JSON-RPC API port.
pub const DEFAULT_RPC_PORT: u16 = 8545;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9545;

/// Broadcast channel capacity for live market events. Large enough to absorb
/// short bursts without dropping events for connected WebSocket clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Storage Keys
// ---------------------------------------------------------------------------

/// Metadata key holding the registry's product counter.
pub const META_PRODUCT_COUNT: &str = "product_count";

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Renders a base-unit amount as a decimal coin string, e.g.
/// `1_500_000_000_000_000_000` -> `"1.5"`. Trailing zeros are trimmed.
pub fn format_units(amount: u128) -> String {
    let whole = amount / UNIT;
    let frac = amount % UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", frac, width = NATIVE_DECIMALS as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_matches_decimals() {
        assert_eq!(UNIT, 10u128.pow(NATIVE_DECIMALS as u32));
    }

    #[test]
    fn devnet_balance_fits_with_headroom() {
        // A dev account must survive receiving at least one more coin.
        assert!(DEVNET_ACCOUNT_BALANCE.checked_add(UNIT).is_some());
    }

    #[test]
    fn format_units_whole_and_fractional() {
        assert_eq!(format_units(0), "0");
        assert_eq!(format_units(UNIT), "1");
        assert_eq!(format_units(UNIT / 2), "0.5");
        assert_eq!(format_units(UNIT + UNIT / 4), "1.25");
        assert_eq!(format_units(1), "0.000000000000000001");
        assert_eq!(format_units(20 * UNIT), "20");
        assert_eq!(format_units(u128::MAX), "340282366920938463463.374607431768211455");
    }

    #[test]
    fn marketplace_name_is_stable() {
        assert_eq!(MARKETPLACE_NAME, "My Marketplace");
    }
}
