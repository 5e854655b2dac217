//! Identifier newtypes.
//!
//! All identifiers are fixed-width byte arrays with byte equality. `BlockId`
//! additionally derives `Ord`: the lexicographic order over its bytes is used
//! only for deterministic tie-breaks and reproducible iteration, never for
//! protocol semantics.

use std::fmt;

/// Error parsing an identifier from hex.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("invalid hex length {got}, expected {expected}")]
    Length { got: usize, expected: usize },
    #[error("invalid hex character {0:?}")]
    Char(char),
}

fn hex_val(c: char) -> Result<u8, HexError> {
    c.to_digit(16).map(|d| d as u8).ok_or(HexError::Char(c))
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

macro_rules! byte_id {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// The all-zero identifier.
            pub const ZERO: Self = Self([0u8; $len]);

            /// Width in bytes.
            pub const LEN: usize = $len;

            /// View as a byte slice.
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            /// Parse from a hex string of exactly `2 * LEN` characters.
            pub fn from_hex(s: &str) -> Result<Self, HexError> {
                if s.len() != 2 * $len {
                    return Err(HexError::Length {
                        got: s.len(),
                        expected: 2 * $len,
                    });
                }
                let mut out = [0u8; $len];
                let mut chars = s.chars();
                for byte in out.iter_mut() {
                    let hi = hex_val(chars.next().expect("length checked"))?;
                    let lo = hex_val(chars.next().expect("length checked"))?;
                    *byte = (hi << 4) | lo;
                }
                Ok(Self(out))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_hex(f, &self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Short prefix is enough to correlate log lines.
                write!(f, concat!(stringify!($name), "("))?;
                write_hex(f, &self.0[..4])?;
                write!(f, "…)")
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }
    };
}

byte_id!(
    /// 32-byte opaque block identifier.
    BlockId,
    32
);

byte_id!(
    /// 20-byte peer (validator node) identifier.
    NodeId,
    20
);

byte_id!(
    /// 32-byte chain identifier carried on every peer-protocol message.
    ChainId,
    32
);

/// Position of a block in the chain. Genesis is height 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockHeight(pub u64);

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier for an outstanding request to a peer.
///
/// Unique per peer per outstanding request; allocated monotonically by the
/// poll scheduler so open order and id order coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_orders_lexicographically() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 1;
        b[0] = 2;
        assert!(BlockId(a) < BlockId(b));

        // First differing byte decides, later bytes don't.
        a[31] = 0xff;
        assert!(BlockId(a) < BlockId(b));
    }

    #[test]
    fn hex_round_trip() {
        let id = BlockId([0xab; 32]);
        let parsed = BlockId::from_hex(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert!(matches!(
            NodeId::from_hex("ab"),
            Err(HexError::Length { got: 2, .. })
        ));
        assert!(matches!(
            NodeId::from_hex(&"zz".repeat(20)),
            Err(HexError::Char('z'))
        ));
    }
}
