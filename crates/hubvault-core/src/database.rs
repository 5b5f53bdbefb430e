//! Validated database settings shared by store backends.
//!
//! # Example
//!
//! ```rust
//! use hubvault_core::database::PoolSize;
//!
//! let pool = PoolSize::new(4).expect("4 is valid");
//! assert_eq!(pool.get(), 4);
//! assert!(PoolSize::new(0).is_none());
//! assert!(PoolSize::new(101).is_none());
//! ```

use serde::{Deserialize, Serialize};

/// Connection pool size constrained to 1-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct PoolSize(u8);

impl PoolSize {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 100;

    /// Returns `None` if `size` is 0 or greater than 100.
    pub const fn new(size: u8) -> Option<Self> {
        if size < Self::MIN || size > Self::MAX {
            None
        } else {
            Some(Self(size))
        }
    }

    pub fn from_usize(size: usize) -> Option<Self> {
        u8::try_from(size).ok().and_then(Self::new)
    }

    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Four connections: one writer plus readers for counts and export.
    pub const fn default_size() -> Self {
        Self(4)
    }
}

impl Default for PoolSize {
    fn default() -> Self {
        Self::default_size()
    }
}

impl TryFrom<usize> for PoolSize {
    type Error = PoolSizeError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        Self::from_usize(size).ok_or(PoolSizeError::OutOfRange { size })
    }
}

impl From<PoolSize> for usize {
    fn from(pool: PoolSize) -> Self {
        pool.get()
    }
}

impl std::fmt::Display for PoolSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolSizeError {
    #[error("Pool size {size} is out of range (must be {}-{})", PoolSize::MIN, PoolSize::MAX)]
    OutOfRange { size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(4, true)]
    #[case(100, true)]
    #[case(101, false)]
    #[case(1000, false)]
    fn range_is_enforced(#[case] size: usize, #[case] valid: bool) {
        assert_eq!(PoolSize::from_usize(size).is_some(), valid);
        assert_eq!(PoolSize::try_from(size).is_ok(), valid);
    }

    #[test]
    fn out_of_range_error_names_size() {
        assert_eq!(
            PoolSize::try_from(300usize),
            Err(PoolSizeError::OutOfRange { size: 300 })
        );
    }

    #[test]
    fn deserializes_through_validation() {
        let ok: PoolSize = serde_json::from_str("8").unwrap();
        assert_eq!(ok.get(), 8);
        assert!(serde_json::from_str::<PoolSize>("0").is_err());
    }
}
