//! Protocol constants.

/// Coinbase reward paid to the miner of every block.
pub const SUBSIDY: u64 = 2100;

/// Fixed proof-of-work difficulty: a block hash must be strictly below
/// `1 << (256 - TARGET_BITS)`.
pub const TARGET_BITS: u32 = 15;

/// Nonce value at which mining gives up. Not expected at this difficulty.
pub const MAX_NONCE: i64 = i64::MAX;

/// P2P protocol version advertised in `version` messages.
pub const PROTOCOL_VERSION: u32 = 1;

/// Wire command field width in bytes (ASCII, zero-padded).
pub const COMMAND_LENGTH: usize = 12;

/// Seed peer every non-bootstrap node handshakes with on startup.
pub const BOOTSTRAP_NODE: &str = "localhost:3000";

/// Coinbase tag of the genesis block.
pub const GENESIS_COINBASE_TAG: &str = "Genesis";

/// Mempool size at which a mining node assembles a block.
pub const MIN_TXS_TO_MINE: usize = 2;
