//! Record-number types shared by the cache and the tree.

/// Dense 64-bit key identifying a row in a column store.
pub type Recno = u64;

/// Out-of-band record number: no record, or "before the first record".
pub const RECNO_OOB: Recno = 0;

/// Search sentinel: the caller allocates a new record number at insert time.
pub const RECNO_ALLOCATE: Recno = u64::MAX;

/// Slot value larger than any possible on-page slot.
pub const SLOT_NONE: u32 = u32::MAX;

/// Returns the sign of `a - b` as -1, 0 or +1 without overflowing.
#[inline]
pub fn recno_sign(a: Recno, b: Recno) -> i32 {
    match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert_eq!(RECNO_OOB, 0);
        assert_eq!(RECNO_ALLOCATE, u64::MAX);
        assert_eq!(SLOT_NONE, u32::MAX);
    }

    #[test]
    fn test_recno_sign_extremes() {
        assert_eq!(recno_sign(0, u64::MAX), -1);
        assert_eq!(recno_sign(u64::MAX, 0), 1);
        assert_eq!(recno_sign(7, 7), 0);
    }
}
