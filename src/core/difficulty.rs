//! 128-bit difficulty arithmetic and the PoW target check

use crate::core::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

/// Mining difficulty as an unsigned 128-bit integer.
///
/// The node reports difficulty as two 64-bit halves (`difficulty`,
/// `difficulty_top64`); `from_parts` reassembles them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Difficulty(pub u128);

impl Difficulty {
    /// Zero difficulty
    pub const ZERO: Difficulty = Difficulty(0);

    /// Create from a u128 value
    pub fn new(value: u128) -> Self {
        Self(value)
    }

    /// Reassemble from the RPC's (lo, hi) halves
    pub fn from_parts(lo: u64, hi: u64) -> Self {
        Self(((hi as u128) << 64) | lo as u128)
    }

    /// Low 64 bits
    pub fn lo(&self) -> u64 {
        self.0 as u64
    }

    /// High 64 bits
    pub fn hi(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Saturating subtraction
    pub fn saturating_sub(self, rhs: Difficulty) -> Difficulty {
        Difficulty(self.0.saturating_sub(rhs.0))
    }

    /// Check whether a PoW hash meets this difficulty.
    ///
    /// The hash is interpreted as a 256-bit little-endian integer; the check
    /// passes iff `difficulty * hash < 2^256`. Computed with 64-bit limb
    /// multiply-accumulate so the upper limbs of the product are exact.
    pub fn check_pow(&self, pow_hash: &Hash) -> bool {
        if self.0 == 0 {
            return true;
        }

        let h = pow_hash.to_u64_limbs();
        let d = [self.lo(), self.hi()];
        let mut acc = [0u64; 6];

        fn add_at(acc: &mut [u64; 6], mut idx: usize, val: u64) {
            let mut v = val;
            while v != 0 && idx < 6 {
                let (s, carry) = acc[idx].overflowing_add(v);
                acc[idx] = s;
                v = carry as u64;
                idx += 1;
            }
        }

        for (i, &hl) in h.iter().enumerate() {
            for (j, &dl) in d.iter().enumerate() {
                let p = (hl as u128) * (dl as u128);
                add_at(&mut acc, i + j, p as u64);
                add_at(&mut acc, i + j + 1, (p >> 64) as u64);
            }
        }

        acc[4] == 0 && acc[5] == 0
    }
}

impl Add for Difficulty {
    type Output = Difficulty;

    fn add(self, rhs: Difficulty) -> Difficulty {
        Difficulty(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Difficulty {
    fn add_assign(&mut self, rhs: Difficulty) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Difficulty {
    type Output = Difficulty;

    fn sub(self, rhs: Difficulty) -> Difficulty {
        Difficulty(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Difficulty {
    fn sum<I: Iterator<Item = Difficulty>>(iter: I) -> Difficulty {
        iter.fold(Difficulty::ZERO, |a, b| a + b)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Difficulty {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.hi() == 0 {
            serializer.serialize_u64(self.lo())
        } else {
            serializer.serialize_str(&self.0.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(|x| Difficulty(x as u128))
                .ok_or_else(|| serde::de::Error::custom("difficulty out of range")),
            serde_json::Value::String(s) => s
                .parse::<u128>()
                .map(Difficulty)
                .map_err(serde::de::Error::custom),
            _ => Err(serde::de::Error::custom("expected number or string")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts() {
        let d = Difficulty::from_parts(5, 1);
        assert_eq!(d.0, (1u128 << 64) + 5);
        assert_eq!(d.lo(), 5);
        assert_eq!(d.hi(), 1);
    }

    #[test]
    fn test_check_pow_trivial() {
        // difficulty 1 accepts everything
        let d = Difficulty::new(1);
        assert!(d.check_pow(&Hash::from_bytes([0xFF; 32])));

        // zero hash passes any difficulty
        let d = Difficulty::new(u128::MAX);
        assert!(d.check_pow(&Hash::ZERO));
    }

    #[test]
    fn test_check_pow_boundary() {
        // hash = 2^255 (top bit of the last byte); difficulty 2 gives
        // product exactly 2^256, which overflows and must fail
        let mut bytes = [0u8; 32];
        bytes[31] = 0x80;
        let hash = Hash::from_bytes(bytes);
        assert!(!Difficulty::new(2).check_pow(&hash));
        assert!(Difficulty::new(1).check_pow(&hash));
    }

    #[test]
    fn test_check_pow_small_hash() {
        // hash = 2^64: even the largest representable difficulty keeps the
        // product below 2^256
        let mut bytes = [0u8; 32];
        bytes[8] = 1;
        let hash = Hash::from_bytes(bytes);
        assert!(Difficulty::new(u128::MAX).check_pow(&hash));
    }

    #[test]
    fn test_arithmetic() {
        let a = Difficulty::new(100);
        let b = Difficulty::new(200);
        assert_eq!((a + b).0, 300);
        assert_eq!((b - a).0, 100);
        assert_eq!((a - b).0, 0);

        let total: Difficulty = [a, b, Difficulty::new(300)].into_iter().sum();
        assert_eq!(total.0, 600);
    }

    #[test]
    fn test_serde_large_values() {
        let small = Difficulty::new(1234);
        assert_eq!(serde_json::to_string(&small).unwrap(), "1234");

        let big = Difficulty::from_parts(1, 2);
        let json = serde_json::to_string(&big).unwrap();
        let back: Difficulty = serde_json::from_str(&json).unwrap();
        assert_eq!(back, big);
    }
}
