// Consumer-facing handles over a materialized segment

use std::ptr::NonNull;
use std::sync::Arc;

use super::header::SegmentHeader;
use super::value::ValueNode;
use super::ARRAY_KEY_PREFIX;
use crate::error::{ShmJsonError, ShmJsonResult};
use crate::memory::ShmRegion;
use crate::sync::NamedSemaphore;

// Keeps the mapping and the lock's name handle alive for as long as any
// handle into the tree exists.
struct DocShared {
    region: ShmRegion,
    sema: NamedSemaphore,
    checksum: u32,
}

/// A materialized cache entry: the owning view of one parsed document
/// in shared memory.
pub struct JsonDoc {
    shared: Arc<DocShared>,
    root: NonNull<ValueNode>,
    hit: bool,
}

/// A position in the parsed tree. Cheap to clone; all handles share the
/// parent document's mapping.
pub struct JsonHandle {
    shared: Arc<DocShared>,
    node: NonNull<ValueNode>,
}

/// One resolved member: scalars are copied out, containers come back as
/// child handles.
#[derive(Debug)]
pub enum JsonValue {
    Int(i64),
    Double(f64),
    Bool(bool),
    Null,
    Str(String),
    Node(JsonHandle),
}

// The tree is never mutated after the header stamp, so concurrent reads
// from any thread are safe.
unsafe impl Send for JsonDoc {}
unsafe impl Sync for JsonDoc {}
unsafe impl Send for JsonHandle {}
unsafe impl Sync for JsonHandle {}

impl JsonDoc {
    pub(crate) fn new(
        region: ShmRegion,
        sema: NamedSemaphore,
        checksum: u32,
        hit: bool,
    ) -> ShmJsonResult<Self> {
        let header = region.as_ptr() as *const SegmentHeader;
        if !unsafe { (*header).matches(checksum) } {
            return Err(ShmJsonError::region("segment header is not stamped"));
        }
        let root = unsafe { (*header).root.resolve(header as *const u8) } as *mut ValueNode;
        let root = NonNull::new(root)
            .ok_or_else(|| ShmJsonError::region("segment header has no root node"))?;

        Ok(Self {
            shared: Arc::new(DocShared {
                region,
                sema,
                checksum,
            }),
            root,
            hit,
        })
    }

    /// True when this call reused an already-parsed segment (the
    /// no-parse fast path).
    pub fn hit(&self) -> bool {
        self.hit
    }

    /// The content checksum doubling as the cache key.
    pub fn checksum(&self) -> u32 {
        self.shared.checksum
    }

    pub fn root(&self) -> JsonHandle {
        JsonHandle {
            shared: Arc::clone(&self.shared),
            node: self.root,
        }
    }

    /// Tear the cache entry down for every process: unlink the segment's
    /// backing file and the semaphore name. Fails while child handles
    /// are still alive.
    pub fn destroy(self) -> ShmJsonResult<()> {
        let shared = Arc::try_unwrap(self.shared)
            .map_err(|_| ShmJsonError::Internal("document still has live handles".into()))?;
        let DocShared { region, sema, .. } = shared;
        region.unlink()?;
        sema.destroy()
    }
}

impl JsonHandle {
    fn node(&self) -> &ValueNode {
        unsafe { self.node.as_ref() }
    }

    fn value_at(&self, node: NonNull<ValueNode>) -> JsonValue {
        match unsafe { node.as_ref() } {
            ValueNode::Int(i) => JsonValue::Int(*i),
            ValueNode::Double(d) => JsonValue::Double(*d),
            ValueNode::Bool(b) => JsonValue::Bool(*b),
            ValueNode::Null => JsonValue::Null,
            n @ ValueNode::Str { .. } => {
                let bytes = unsafe { n.str_bytes() }.unwrap_or(&[]);
                JsonValue::Str(String::from_utf8_lossy(bytes).into_owned())
            }
            ValueNode::Object { .. } | ValueNode::Array { .. } => JsonValue::Node(JsonHandle {
                shared: Arc::clone(&self.shared),
                node,
            }),
        }
    }

    /// Look the member `key` up in this node. `None` both for a missing
    /// member and for scalar nodes, which have no members.
    pub fn resolve(&self, key: &str) -> Option<JsonValue> {
        let view = unsafe { self.node().table() }?;
        let data = view.lookup(key)?;
        Some(self.value_at(data.cast()))
    }

    /// Address an array element by numeric index: the plain decimal key
    /// is tried first, then the reserved `IDX_` form arrays are stored
    /// under.
    pub fn index(&self, i: usize) -> Option<JsonValue> {
        self.resolve(&i.to_string())
            .or_else(|| self.resolve(&format!("{}{}", ARRAY_KEY_PREFIX, i)))
    }

    /// Every member of this node in document order: source order for
    /// object members, index order for array elements. Array keys come
    /// back with the reserved prefix stripped ("IDX_3" reads as "3").
    pub fn children(&self) -> Vec<(String, JsonValue)> {
        let Some(view) = (unsafe { self.node().table() }) else {
            return Vec::new();
        };

        let mut entries: Vec<(u32, String, NonNull<u8>)> =
            Vec::with_capacity(view.entries() as usize);
        view.for_each_entry(|seq, key, data| {
            entries.push((seq, key.to_string(), data));
        });
        // bucket order is hash-scrambled; the insertion ordinal restores
        // document order
        entries.sort_by_key(|(seq, _, _)| *seq);

        entries
            .into_iter()
            .map(|(_, key, data)| {
                let display = key
                    .strip_prefix(ARRAY_KEY_PREFIX)
                    .unwrap_or(&key)
                    .to_string();
                (display, self.value_at(data.cast()))
            })
            .collect()
    }

    /// Number of members (0 for scalar nodes).
    pub fn len(&self) -> usize {
        unsafe { self.node().table() }
            .map(|v| v.entries() as usize)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_object(&self) -> bool {
        matches!(self.node(), ValueNode::Object { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.node(), ValueNode::Array { .. })
    }
}

impl Clone for JsonHandle {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            node: self.node,
        }
    }
}

impl std::fmt::Debug for JsonHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "JsonHandle(checksum=0x{:08x}, members={})",
            self.shared.checksum,
            self.len()
        )
    }
}

impl JsonValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JsonValue::Double(d) => Some(*d),
            JsonValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&JsonHandle> {
        match self {
            JsonValue::Node(h) => Some(h),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JsonValue::Null)
    }
}
