// Fixed-layout segment header inspected on every attach

use crate::table::RelOff;

/// 4-byte tag identifying a fully materialized segment.
pub const SEGMENT_MAGIC: u32 = u32::from_le_bytes(*b"JSD1");

/// Name/tag field stamped alongside the magic.
pub const SEGMENT_TAG: u32 = u32::from_le_bytes(*b"shmj");

/// Fixed prefix of every segment. The pool's data area begins
/// immediately after this struct, 8-aligned.
///
/// `root` anchors at this header's own address. The header is written
/// once per cold materialization and read on every attach to decide
/// cache hit vs. miss.
#[repr(C)]
pub struct SegmentHeader {
    pub magic: u32,
    pub tag: u32,
    pub last_parsed: u32,
    _pad: u32,
    pub root: RelOff,
}

pub const HEADER_SIZE: usize = std::mem::size_of::<SegmentHeader>();

impl SegmentHeader {
    /// Does this segment hold a finished parse of the given checksum?
    pub fn matches(&self, checksum: u32) -> bool {
        self.magic == SEGMENT_MAGIC && self.last_parsed == checksum
    }

    /// Reset to the unstamped state before a cold-path build, so a
    /// failed build can never be observed as a hit.
    pub fn clear(&mut self) {
        self.magic = 0;
        self.tag = 0;
        self.last_parsed = 0;
        self._pad = 0;
        self.root = RelOff::NULL;
    }

    /// Publish a finished tree. The root reference lands before the
    /// checksum and magic so the header never advertises a partial tree.
    pub fn stamp(&mut self, checksum: u32, root: RelOff) {
        self.root = root;
        self.tag = SEGMENT_TAG;
        self.last_parsed = checksum;
        self.magic = SEGMENT_MAGIC;
    }
}
