// id.rs — Stable semantic identifiers for Ember compiler queries
//
// These IDs provide deterministic, span-independent identity for query
// arguments. An item's identity is a digest of its kind, name, and
// occurrence index, so editing one item never renumbers another. Nodes are
// numbered in preorder within their item, so an item whose tree shape is
// unchanged keeps every NodeId across edits.

use std::fmt;

use sha2::{Digest, Sha256};

/// A source file registered with the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Stable identifier for a top-level item (function, type alias, or the
/// top-level body) within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Derive the identity of the `occurrence`-th item of `kind` named `name`.
    pub fn derive(kind: &str, name: &str, occurrence: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(occurrence.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        ItemId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Preorder index of a node within its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

impl LocalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a lexical scope within its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeIdx(pub u32);

impl ScopeIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An item within a specific file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemRef {
    pub file: FileId,
    pub item: ItemId,
}

impl ItemRef {
    pub fn new(file: FileId, item: ItemId) -> Self {
        Self { file, item }
    }

    /// The node with preorder index `local` inside this item.
    pub fn node(self, local: LocalId) -> NodeId {
        NodeId {
            file: self.file,
            item: self.item,
            local,
        }
    }
}

/// Functions and the top-level body are both analyzed as function items.
pub type FunctionId = ItemRef;

/// Stable identifier for an untyped (and typed) graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub file: FileId,
    pub item: ItemId,
    pub local: LocalId,
}

impl NodeId {
    pub fn item_ref(self) -> ItemRef {
        ItemRef::new(self.file, self.item)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/n{}", self.file.0, self.item, self.local.0)
    }
}

/// Allocator for file IDs. Produces monotonically increasing IDs in
/// registration order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_file: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_file(&mut self) -> FileId {
        let id = FileId(self.next_file);
        self.next_file += 1;
        id
    }
}
