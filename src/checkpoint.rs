//! Checkpoint: a total order over chain history.
//!
//! A `Checkpoint` is the tuple `(block_timestamp, chain_id, block_number,
//! transaction_index, log_index)`. It encodes to a fixed-width, lex-sortable
//! string so that byte comparison of the encoded form equals tuple
//! comparison. The sentinel `"latest"` is used wherever an
//! `effectiveToCheckpoint` column needs to mean "still open" — it is never a
//! value a `Checkpoint` itself can take, which is why it lives on
//! `CheckpointBound` rather than here.

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The literal stored in `effectiveToCheckpoint` for the still-open version of a row.
pub const LATEST: &str = "latest";

const TS_WIDTH: usize = 10;
const CHAIN_WIDTH: usize = 16;
const BLOCK_WIDTH: usize = 16;
const TX_WIDTH: usize = 8;
const LOG_WIDTH: usize = 8;

/// Total encoded length: 10 + 16 + 16 + 8 + 8 = 58 digits, matching the
/// the fixed-width, zero-padded encoding exactly.
pub const ENCODED_LEN: usize = TS_WIDTH + CHAIN_WIDTH + BLOCK_WIDTH + TX_WIDTH + LOG_WIDTH;

/// A totally-ordered position in chain history.
///
/// Field declaration order matches the tuple's comparison order
/// (`blockTimestamp, chainId, blockNumber, transactionIndex, logIndex`), so
/// the derived `Ord` is exactly that tuple order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub block_timestamp: u64,
    pub chain_id: u64,
    pub block_number: u64,
    pub transaction_index: u32,
    pub log_index: u32,
}

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("encoded checkpoint has wrong length: expected {expected}, got {actual}")]
    #[diagnostic(code(chainloom::checkpoint::bad_length))]
    BadLength { expected: usize, actual: usize },

    #[error("encoded checkpoint contains a non-digit field: {0:?}")]
    #[diagnostic(code(chainloom::checkpoint::bad_digit))]
    BadDigit(String),

    #[error("\"latest\" is not a decodable checkpoint")]
    #[diagnostic(
        code(chainloom::checkpoint::is_latest),
        help("Use CheckpointBound::decode if the sentinel is a valid input here.")
    )]
    IsLatest,
}

impl Checkpoint {
    #[must_use]
    pub fn new(
        block_timestamp: u64,
        chain_id: u64,
        block_number: u64,
        transaction_index: u32,
        log_index: u32,
    ) -> Self {
        Self {
            block_timestamp,
            chain_id,
            block_number,
            transaction_index,
            log_index,
        }
    }

    /// The smallest possible checkpoint value (the zero checkpoint). Useful as
    /// a lower bound in range queries.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            block_timestamp: 0,
            chain_id: 0,
            block_number: 0,
            transaction_index: 0,
            log_index: 0,
        }
    }

    /// Encode to a fixed-width, lex-sortable string.
    ///
    /// `decode(encode(x)) == x` and `encode(a) < encode(b) <=> a < b` both
    /// hold because every field is a fixed-width, zero-padded decimal digit
    /// string, and fields appear in priority order.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{:0ts_width$}{:0chain_width$}{:0block_width$}{:0tx_width$}{:0log_width$}",
            self.block_timestamp,
            self.chain_id,
            self.block_number,
            self.transaction_index,
            self.log_index,
            ts_width = TS_WIDTH,
            chain_width = CHAIN_WIDTH,
            block_width = BLOCK_WIDTH,
            tx_width = TX_WIDTH,
            log_width = LOG_WIDTH,
        )
    }

    /// Decode a string produced by [`Checkpoint::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::IsLatest`] if given the `"latest"`
    /// sentinel, [`CheckpointError::BadLength`] if the string isn't exactly
    /// [`ENCODED_LEN`] bytes, or [`CheckpointError::BadDigit`] if any field
    /// fails to parse as a plain decimal integer.
    pub fn decode(s: &str) -> Result<Self, CheckpointError> {
        if s == LATEST {
            return Err(CheckpointError::IsLatest);
        }
        if s.len() != ENCODED_LEN {
            return Err(CheckpointError::BadLength {
                expected: ENCODED_LEN,
                actual: s.len(),
            });
        }

        let mut offset = 0;
        let mut field = |width: usize| -> Result<&str, CheckpointError> {
            let slice = &s[offset..offset + width];
            offset += width;
            Ok(slice)
        };

        let ts = field(TS_WIDTH)?;
        let chain = field(CHAIN_WIDTH)?;
        let block = field(BLOCK_WIDTH)?;
        let tx = field(TX_WIDTH)?;
        let log = field(LOG_WIDTH)?;

        let parse_u64 = |s: &str| s.parse::<u64>().map_err(|_| CheckpointError::BadDigit(s.to_string()));
        let parse_u32 = |s: &str| s.parse::<u32>().map_err(|_| CheckpointError::BadDigit(s.to_string()));

        Ok(Self {
            block_timestamp: parse_u64(ts)?,
            chain_id: parse_u64(chain)?,
            block_number: parse_u64(block)?,
            transaction_index: parse_u32(tx)?,
            log_index: parse_u32(log)?,
        })
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Checkpoint {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Either a concrete [`Checkpoint`] or the `"latest"` sentinel.
///
/// This is the shape that actually lives in the `effectiveToCheckpoint`
/// column (the "latest" sentinel): stored as the literal string,
/// not `NULL`, so it participates directly in `<`/`>` comparisons and the
/// primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointBound {
    At(Checkpoint),
    Latest,
}

impl CheckpointBound {
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            CheckpointBound::At(c) => c.encode(),
            CheckpointBound::Latest => LATEST.to_string(),
        }
    }

    pub fn decode(s: &str) -> Result<Self, CheckpointError> {
        if s == LATEST {
            Ok(CheckpointBound::Latest)
        } else {
            Checkpoint::decode(s).map(CheckpointBound::At)
        }
    }

    #[must_use]
    pub fn is_latest(&self) -> bool {
        matches!(self, CheckpointBound::Latest)
    }
}

impl fmt::Display for CheckpointBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Total order on the encoded form: `"latest"` is defined to sort strictly
/// after every encodable [`Checkpoint`] because it starts with a
/// letter byte (`'l'`) and every real encoding starts with a decimal digit,
/// and `'l' > '9'` in byte order. `PartialOrd`/`Ord` here implement that rule
/// directly rather than relying on incidental byte values.
impl PartialOrd for CheckpointBound {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CheckpointBound {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering::*;
        match (self, other) {
            (CheckpointBound::Latest, CheckpointBound::Latest) => Equal,
            (CheckpointBound::Latest, CheckpointBound::At(_)) => Greater,
            (CheckpointBound::At(_), CheckpointBound::Latest) => Less,
            (CheckpointBound::At(a), CheckpointBound::At(b)) => a.cmp(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_has_spec_minimum_length() {
        let c = Checkpoint::new(1_700_000_000, 1, 19_000_000, 3, 7);
        assert!(c.encode().len() >= 58);
        assert_eq!(c.encode().len(), ENCODED_LEN);
    }

    #[test]
    fn round_trip() {
        let c = Checkpoint::new(1_700_000_000, 8453, 19_000_000, 3, 7);
        let encoded = c.encode();
        let decoded = Checkpoint::decode(&encoded).unwrap();
        assert_eq!(c, decoded);
    }

    #[test]
    fn ordering_matches_tuple_order() {
        let a = Checkpoint::new(100, 1, 1, 0, 0);
        let b = Checkpoint::new(100, 1, 2, 0, 0);
        let c = Checkpoint::new(101, 0, 0, 0, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(a.encode() < b.encode());
        assert!(b.encode() < c.encode());
    }

    #[test]
    fn latest_sorts_after_every_checkpoint() {
        let c = Checkpoint::new(u64::MAX / 2, 999_999, 999_999, 99, 99);
        let bound = CheckpointBound::At(c);
        assert!(bound.encode() < LATEST.to_string());
        assert!(bound < CheckpointBound::Latest);
    }

    #[test]
    fn decode_rejects_latest() {
        assert!(matches!(
            Checkpoint::decode(LATEST),
            Err(CheckpointError::IsLatest)
        ));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(matches!(
            Checkpoint::decode("123"),
            Err(CheckpointError::BadLength { .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn prop_round_trip(
            ts in 0u64..10_000_000_000,
            chain in 0u64..10_000_000_000_000_000,
            block in 0u64..10_000_000_000_000_000,
            tx in 0u32..100_000_000,
            log in 0u32..100_000_000,
        ) {
            let c = Checkpoint::new(ts, chain, block, tx, log);
            let encoded = c.encode();
            prop_assert_eq!(encoded.len(), ENCODED_LEN);
            let decoded = Checkpoint::decode(&encoded).unwrap();
            prop_assert_eq!(c, decoded);
        }

        #[test]
        fn prop_ordering(
            a_ts in 0u64..1_000_000, a_chain in 0u64..1_000_000, a_block in 0u64..1_000_000, a_tx in 0u32..1_000, a_log in 0u32..1_000,
            b_ts in 0u64..1_000_000, b_chain in 0u64..1_000_000, b_block in 0u64..1_000_000, b_tx in 0u32..1_000, b_log in 0u32..1_000,
        ) {
            let a = Checkpoint::new(a_ts, a_chain, a_block, a_tx, a_log);
            let b = Checkpoint::new(b_ts, b_chain, b_block, b_tx, b_log);
            prop_assert_eq!(a.cmp(&b), a.encode().cmp(&b.encode()));
        }
    }
}
