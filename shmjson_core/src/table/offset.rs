// Self-relative references for relocatable in-region structures

/// A stored byte distance from an anchoring structure's own address to a
/// target location, used in place of an absolute pointer.
///
/// Encoding is `anchor − target`, decoding is `anchor − stored`, so a
/// reference written in one process resolves correctly in any process
/// that re-derives the anchor from wherever it mapped the region. The
/// zero distance doubles as the null/empty sentinel (a structure never
/// references itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RelOff(i64);

impl RelOff {
    pub const NULL: RelOff = RelOff(0);

    /// Record the distance from `anchor` to `target`.
    #[inline]
    pub fn encode(anchor: *const u8, target: *const u8) -> Self {
        RelOff(anchor as i64 - target as i64)
    }

    /// Recover the target address using the anchor's address in the
    /// current mapping. The result is only meaningful if `anchor` is the
    /// same structure this offset was encoded against, at its current
    /// mapped location.
    #[inline]
    pub fn resolve(self, anchor: *const u8) -> *mut u8 {
        (anchor as i64 - self.0) as *mut u8
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_both_directions() {
        let buf = [0u8; 64];
        let anchor = buf.as_ptr().wrapping_add(32);
        // targets below and above the anchor
        for delta in [0usize, 1, 8, 31, 33, 63] {
            let target = buf.as_ptr().wrapping_add(delta);
            let off = RelOff::encode(anchor, target);
            assert_eq!(off.resolve(anchor) as *const u8, target);
        }
    }

    #[test]
    fn test_survives_anchor_translation() {
        // simulate remapping: the same distance resolves against a
        // different base to the translated target
        let off = RelOff::encode(0x5000 as *const u8, 0x4f40 as *const u8);
        assert_eq!(off.resolve(0x9000 as *const u8) as usize, 0x8f40);
    }

    #[test]
    fn test_null_sentinel() {
        assert!(RelOff::NULL.is_null());
        let p = 0x1000 as *const u8;
        assert!(!RelOff::encode(p, 0x2000 as *const u8).is_null());
    }
}
