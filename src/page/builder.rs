//! Node builder.
//!
//! [`NodeBuf`] is an owned, writable buffer in which a new node is
//! assembled before publication. Construction is strictly sequential:
//! `set_header` first, then cells appended for i = 0, 1, 2, … with the
//! offset array maintained in lockstep. A working buffer is two pages
//! wide so that a copy-on-write rewrite may temporarily overflow one
//! page; the split engine reduces it before the result is published.

use crate::page::{write_u16, write_u64, Node, PageBuf};
use crate::types::{NodeKind, PageId, HEADER_SIZE, OFFSET_SIZE, PAGE_SIZE, POINTER_SIZE};

/// An owned node buffer under construction
pub struct NodeBuf {
    data: Box<[u8]>,
}

impl NodeBuf {
    /// Create a page-sized buffer, for nodes known to fit one page
    pub fn new() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    /// Create a working buffer two pages wide, for rewrites that may
    /// overflow before being split
    pub fn new_working() -> Self {
        Self {
            data: vec![0u8; 2 * PAGE_SIZE].into_boxed_slice(),
        }
    }

    /// Get a read-only node view of the buffer
    pub fn view(&self) -> Node<'_> {
        Node::new(&self.data)
    }

    /// Get the used byte length
    pub fn n_bytes(&self) -> usize {
        self.view().n_bytes()
    }

    /// Write the node header.
    ///
    /// Must be called before any append: the cell positions depend on the
    /// key count fixing the width of the pointer and offset arrays.
    pub fn set_header(&mut self, kind: NodeKind, n_keys: u16) {
        write_u16(&mut self.data, 0, kind as u16);
        write_u16(&mut self.data, 2, n_keys);
    }

    /// Write the child page id at slot `i`
    pub fn set_pointer(&mut self, i: u16, id: PageId) {
        assert!(i < self.view().n_keys(), "pointer index {} out of bounds", i);
        write_u64(&mut self.data, HEADER_SIZE + POINTER_SIZE * i as usize, id.value());
    }

    /// Append cell `i`: pointer slot, length-prefixed key/value bytes, and
    /// the offset of the following cell.
    ///
    /// Cells 0..i must already be present. Leaf cells pass
    /// [`PageId::NULL`] as the child and internal cells an empty value.
    pub fn append_cell(&mut self, i: u16, child: PageId, key: &[u8], value: &[u8]) {
        self.set_pointer(i, child);

        let pos = self.view().cell_pos(i);
        write_u16(&mut self.data, pos, key.len() as u16);
        write_u16(&mut self.data, pos + 2, value.len() as u16);
        self.data[pos + 4..pos + 4 + key.len()].copy_from_slice(key);
        self.data[pos + 4 + key.len()..pos + 4 + key.len() + value.len()].copy_from_slice(value);

        let next = self.view().offset(i) + 4 + key.len() as u16 + value.len() as u16;
        self.set_offset(i + 1, next);
    }

    /// Append `count` consecutive cells copied from `src`, starting at
    /// `src_start`, into slots `dst_start..`
    pub fn append_range(&mut self, src: &Node<'_>, dst_start: u16, src_start: u16, count: u16) {
        for i in 0..count {
            let s = src_start + i;
            self.append_cell(dst_start + i, src.pointer(s), src.key(s), src.value(s));
        }
    }

    /// Reduce the buffer to a published page.
    ///
    /// The content must fit: callers route oversized buffers through the
    /// split engine instead.
    pub fn finish(self) -> PageBuf {
        assert!(
            self.n_bytes() <= PAGE_SIZE,
            "node of {} bytes exceeds page size",
            self.n_bytes()
        );
        PageBuf::from_bytes(&self.data[..PAGE_SIZE])
    }

    /// Write the stored offset slot for index i (1 <= i <= n)
    fn set_offset(&mut self, i: u16, v: u16) {
        let n = self.view().n_keys();
        assert!(i >= 1 && i <= n, "offset index {} out of bounds", i);
        let pos = HEADER_SIZE + POINTER_SIZE * n as usize + OFFSET_SIZE * (i as usize - 1);
        write_u16(&mut self.data, pos, v);
    }
}

impl Default for NodeBuf {
    fn default() -> Self {
        Self::new()
    }
}
