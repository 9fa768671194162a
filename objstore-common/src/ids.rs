use std::fmt;
use std::ops::Deref;

use crate::constants::MAX_OID_LENGTH;
use crate::error::DbError;

/// Stable object identity (`zoid` in `spec.md` §3). Bounded to
/// [`MAX_OID_LENGTH`] bytes; the bound is checked at construction so a
/// caller can't silently truncate identity at the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(String);

impl Oid {
    pub fn new(value: impl Into<String>) -> Result<Self, DbError> {
        let value = value.into();
        if value.len() > MAX_OID_LENGTH {
            return Err(DbError::fatal(format!(
                "oid {value:?} exceeds MAX_OID_LENGTH ({MAX_OID_LENGTH})"
            )));
        }
        Ok(Oid(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Oid {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> String {
        oid.0
    }
}

/// Transaction id: a monotonically non-decreasing (per object) sequence
/// value stamped on every committed write. Ordered so conflict detection
/// reads as a plain comparison (`current_tid > caller_tid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub i64);

impl Tid {
    pub const ZERO: Tid = Tid(0);

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for Tid {
    fn from(v: i64) -> Self {
        Tid(v)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_rejects_overlong_values() {
        let too_long = "x".repeat(MAX_OID_LENGTH + 1);
        assert!(Oid::new(too_long).is_err());
    }

    #[test]
    fn oid_accepts_max_length() {
        let exact = "x".repeat(MAX_OID_LENGTH);
        assert!(Oid::new(exact).is_ok());
    }

    #[test]
    fn tid_ordering_drives_conflict_detection() {
        let caller = Tid(5);
        let current = Tid(6);
        assert!(current > caller, "a later writer must be detectable");
    }
}
