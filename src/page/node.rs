//! Read-only node codec.
//!
//! A node is a byte buffer with the following layout (all fields
//! little-endian):
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────┬──────────────────┐
//! │ kind (2)     │ nkeys (2)    │ pointers (8·n)  │ offsets (2·n)    │
//! ├──────────────┴──────────────┴─────────────────┴──────────────────┤
//! │ cells: [klen:2 | vlen:2 | key | value] × n                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pointer array is present on leaf nodes too; its slots are zero.
//! The offset array stores, for each i in 1..=n, the position of cell i
//! relative to the start of the cell region. Offset 0 is not stored: cell
//! 0 always begins the region, so `offset(0)` is 0 by definition. The
//! entry at index n is the total cell-region length, which makes
//! `cell_pos(n)` the used byte length of the whole node.
//!
//! All index bounds are asserted; a violation is a bug in the caller, not
//! a recoverable condition.

use crate::page::{read_u16, read_u64};
use crate::types::{NodeKind, PageId, HEADER_SIZE, OFFSET_SIZE, POINTER_SIZE};

/// A borrowed read-only view of node bytes.
///
/// Constructing a `Node` performs no validation; the accessors assert
/// their index preconditions as they go.
#[derive(Clone, Copy)]
pub struct Node<'a> {
    data: &'a [u8],
}

impl<'a> Node<'a> {
    /// Wrap a byte buffer as a node view
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Get the node kind from the header tag
    pub fn kind(&self) -> NodeKind {
        let tag = read_u16(self.data, 0);
        match NodeKind::from_u16(tag) {
            Some(kind) => kind,
            None => panic!("invalid node kind tag {}", tag),
        }
    }

    /// Get the number of keys in this node
    pub fn n_keys(&self) -> u16 {
        read_u16(self.data, 2)
    }

    /// Get the child page id at the given slot
    pub fn pointer(&self, i: u16) -> PageId {
        assert!(i < self.n_keys(), "pointer index {} out of bounds", i);
        PageId::new(read_u64(self.data, HEADER_SIZE + POINTER_SIZE * i as usize))
    }

    /// Get the cell-region offset of cell `i`, defined for 0 <= i <= n
    pub fn offset(&self, i: u16) -> u16 {
        if i == 0 {
            return 0;
        }
        assert!(i <= self.n_keys(), "offset index {} out of bounds", i);
        read_u16(self.data, self.offset_slot(i))
    }

    /// Byte position where cell `i` starts, defined for 0 <= i <= n.
    /// The value at `i == n` is the used length of the node.
    pub fn cell_pos(&self, i: u16) -> usize {
        let n = self.n_keys() as usize;
        HEADER_SIZE + (POINTER_SIZE + OFFSET_SIZE) * n + self.offset(i) as usize
    }

    /// Get the key bytes of cell `i`
    pub fn key(&self, i: u16) -> &'a [u8] {
        assert!(i < self.n_keys(), "key index {} out of bounds", i);
        let pos = self.cell_pos(i);
        let klen = read_u16(self.data, pos) as usize;
        &self.data[pos + 4..pos + 4 + klen]
    }

    /// Get the value bytes of cell `i` (empty for internal nodes)
    pub fn value(&self, i: u16) -> &'a [u8] {
        assert!(i < self.n_keys(), "value index {} out of bounds", i);
        let pos = self.cell_pos(i);
        let klen = read_u16(self.data, pos) as usize;
        let vlen = read_u16(self.data, pos + 2) as usize;
        &self.data[pos + 4 + klen..pos + 4 + klen + vlen]
    }

    /// Get the used byte length of this node
    pub fn n_bytes(&self) -> usize {
        self.cell_pos(self.n_keys())
    }

    /// Find the index of the greatest key that compares `<=` the target,
    /// or 0 if every key is greater.
    ///
    /// Index 0 is the conventional "descend here" slot of an internal
    /// node, so the result is always a valid child index. Keys compare
    /// lexicographically on raw bytes.
    pub fn lookup_le(&self, key: &[u8]) -> u16 {
        // Binary search for the number of keys <= target.
        let mut lo: u16 = 0;
        let mut hi: u16 = self.n_keys();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key(mid) <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo.saturating_sub(1)
    }

    /// Byte position of the stored offset slot for index i (1 <= i <= n)
    fn offset_slot(&self, i: u16) -> usize {
        debug_assert!(i >= 1);
        let n = self.n_keys() as usize;
        HEADER_SIZE + POINTER_SIZE * n + OFFSET_SIZE * (i as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::NodeBuf;

    fn sample_leaf() -> NodeBuf {
        let mut buf = NodeBuf::new();
        buf.set_header(NodeKind::Leaf, 3);
        buf.append_cell(0, PageId::NULL, b"apple", b"red");
        buf.append_cell(1, PageId::NULL, b"banana", b"yellow");
        buf.append_cell(2, PageId::NULL, b"cherry", b"dark");
        buf
    }

    #[test]
    fn test_header_fields() {
        let buf = sample_leaf();
        let node = buf.view();
        assert_eq!(node.kind(), NodeKind::Leaf);
        assert_eq!(node.n_keys(), 3);
    }

    #[test]
    fn test_keys_and_values() {
        let buf = sample_leaf();
        let node = buf.view();
        assert_eq!(node.key(0), b"apple");
        assert_eq!(node.value(0), b"red");
        assert_eq!(node.key(2), b"cherry");
        assert_eq!(node.value(2), b"dark");
    }

    #[test]
    fn test_offsets_and_positions() {
        let buf = sample_leaf();
        let node = buf.view();
        assert_eq!(node.offset(0), 0);
        // cell 0 is (4 + 5 + 3) bytes wide
        assert_eq!(node.offset(1), 12);
        assert_eq!(node.offset(2), 12 + 4 + 6 + 6);
        // used length = header + arrays + cell region
        let cells = node.offset(3) as usize;
        assert_eq!(node.n_bytes(), HEADER_SIZE + 10 * 3 + cells);
    }

    #[test]
    fn test_internal_node_values_empty() {
        let mut buf = NodeBuf::new();
        buf.set_header(NodeKind::Internal, 2);
        buf.append_cell(0, PageId::new(7), b"a", b"");
        buf.append_cell(1, PageId::new(9), b"m", b"");
        let node = buf.view();
        assert_eq!(node.pointer(0), PageId::new(7));
        assert_eq!(node.pointer(1), PageId::new(9));
        assert_eq!(node.value(0), b"");
        assert_eq!(node.value(1), b"");
    }

    #[test]
    fn test_lookup_le() {
        let buf = sample_leaf();
        let node = buf.view();
        assert_eq!(node.lookup_le(b"apple"), 0);
        assert_eq!(node.lookup_le(b"avocado"), 0);
        assert_eq!(node.lookup_le(b"banana"), 1);
        assert_eq!(node.lookup_le(b"blueberry"), 1);
        assert_eq!(node.lookup_le(b"zucchini"), 2);
        // every key greater than the target: conventional slot 0
        assert_eq!(node.lookup_le(b"aardvark"), 0);
    }

    #[test]
    fn test_lookup_le_considers_first_key() {
        // A single-entry node must still match its only key.
        let mut buf = NodeBuf::new();
        buf.set_header(NodeKind::Leaf, 1);
        buf.append_cell(0, PageId::NULL, b"only", b"1");
        assert_eq!(buf.view().lookup_le(b"only"), 0);
        assert_eq!(buf.view().lookup_le(b"zzz"), 0);
    }

    #[test]
    #[should_panic(expected = "key index")]
    fn test_key_out_of_bounds() {
        let buf = sample_leaf();
        buf.view().key(3);
    }

    #[test]
    #[should_panic(expected = "invalid node kind tag")]
    fn test_bad_kind_tag() {
        let data = [0xFFu8; 16];
        Node::new(&data).kind();
    }
}
