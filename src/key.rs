use sha3::{Digest, Sha3_256};
use std::fmt::{Debug, Display, Formatter, Result};

use crate::error::Error;
use crate::KEY_LENGTH;

/// An identifier on the ring that represents nodes and resources.
///
/// Identifiers have 160 bits and are ordered as big-endian unsigned integers. Arithmetic wraps
/// around modulo `2^160`. Hashing keeps the leading 20 bytes of a SHA-3 digest.
#[derive(Ord, PartialOrd, PartialEq, Eq, Clone, Hash, Serialize, Deserialize, Default, Copy)]
pub struct Key(pub [u8; KEY_LENGTH]);

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> Result {
        let hex_vec: Vec<String> = self.0.iter().map(|b| format!("{:02x}", b)).collect();
        write!(f, "{}", hex_vec.join(""))
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter) -> Result {
        Debug::fmt(self, f)
    }
}

impl Key {
    /// Constructs a new `Key` from a byte array.
    pub fn new(data: [u8; KEY_LENGTH]) -> Self {
        Key(data)
    }

    /// Hashes arbitrary bytes onto the ring.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut ret = [0; KEY_LENGTH];
        ret.copy_from_slice(&digest[..KEY_LENGTH]);
        Key(ret)
    }

    /// Parses a hex string of at most `2 * KEY_LENGTH` digits. Shorter strings are treated as
    /// having leading zeros.
    pub fn from_hex(hex: &str) -> std::result::Result<Self, Error> {
        let hex = hex.trim();
        if hex.is_empty()
            || hex.len() > KEY_LENGTH * 2
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(Error::InvalidKey(hex.to_string()));
        }
        let padded = format!("{:0>width$}", hex, width = KEY_LENGTH * 2);
        let mut ret = [0; KEY_LENGTH];
        for (i, byte) in ret.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&padded[2 * i..2 * i + 2], 16)
                .map_err(|_| Error::InvalidKey(hex.to_string()))?;
        }
        Ok(Key(ret))
    }

    /// Constructs a new, random `Key`.
    pub fn rand() -> Self {
        let mut ret = Key([0; KEY_LENGTH]);
        for byte in &mut ret.0 {
            *byte = rand::random::<u8>();
        }
        ret
    }

    /// Returns `(self + 2^index) mod 2^160`.
    pub fn jump(&self, index: usize) -> Key {
        assert!(index < KEY_LENGTH * 8, "jump index {} out of range", index);
        let mut ret = self.0;
        let mut pos = KEY_LENGTH - 1 - index / 8;
        let mut carry = 1u16 << (index % 8);
        loop {
            let sum = u16::from(ret[pos]) + carry;
            ret[pos] = sum as u8;
            carry = sum >> 8;
            if carry == 0 || pos == 0 {
                break;
            }
            pos -= 1;
        }
        Key(ret)
    }

    /// Returns `true` if `self` lies strictly inside the clockwise arc `(lo, hi)`. When
    /// `lo == hi` the arc is the whole circle minus the endpoint.
    pub fn between(&self, lo: &Key, hi: &Key) -> bool {
        if lo < hi {
            lo < self && self < hi
        } else if lo > hi {
            self > lo || self < hi
        } else {
            self != lo
        }
    }

    /// Returns `true` if `self` lies inside the clockwise arc `(lo, hi]`. When `lo == hi` the
    /// arc is the whole circle.
    pub fn between_inclusive_end(&self, lo: &Key, hi: &Key) -> bool {
        lo == hi || self == hi || self.between(lo, hi)
    }

    /// Returns the clockwise distance from `self` to `other`, `(other - self) mod 2^160`.
    pub fn distance_to(&self, other: &Key) -> Key {
        let mut ret = [0; KEY_LENGTH];
        let mut borrow = 0i16;
        for i in (0..KEY_LENGTH).rev() {
            let mut diff = i16::from(other.0[i]) - i16::from(self.0[i]) - borrow;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            ret[i] = diff as u8;
        }
        Key(ret)
    }

    /// Returns at most the ten leading significant hex digits, for display. Leading zeros are
    /// dropped so that small identifiers stay distinguishable.
    pub fn short(&self) -> String {
        let hex = format!("{:?}", self);
        let significant = hex.trim_start_matches('0');
        if significant.is_empty() {
            "0".to_string()
        } else {
            significant.chars().take(10).collect()
        }
    }
}
