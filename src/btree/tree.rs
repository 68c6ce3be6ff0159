//! Copy-on-write B+ tree.
//!
//! The tree never modifies a published page. An insert walks from the
//! root to a leaf, rewrites the leaf into a fresh working buffer, and
//! unwinds back up: each parent is rewritten to point at the 1–3 pages
//! the child's rewrite split into, superseded pages are freed, and the
//! root id is swung last. An observer holding the old root id continues
//! to see the old tree.
//!
//! The first leaf carries a sentinel entry with an empty key, so every
//! descent has a floor: `lookup_le` always lands on a valid slot. The
//! empty key is reserved: `insert` rejects it and `lookup` reports it
//! absent.

use crate::error::{Result, StorageError};
use crate::page::{split3, Node, NodeBuf, PageBuf};
use crate::storage::PageStore;
use crate::types::{NodeKind, PageId, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// A copy-on-write B+ tree over a page store.
///
/// The handle holds only the current root id and the store; all tree
/// state lives in page bytes. Single writer by contract: mutating
/// methods take `&mut self` and no internal locking is performed.
pub struct BTree<S: PageStore> {
    store: S,
    root: PageId,
}

impl<S: PageStore> BTree<S> {
    /// Create an empty tree over a store
    pub fn new(store: S) -> Self {
        Self {
            store,
            root: PageId::NULL,
        }
    }

    /// Re-attach to a tree previously published at `root`
    pub fn open(store: S, root: PageId) -> Self {
        Self { store, root }
    }

    /// Get the current root page id (null for an empty tree)
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Get a reference to the underlying page store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Insert a key-value pair, or update the value if the key exists.
    ///
    /// The new root becomes observable only once the whole rewrite has
    /// been allocated; a failed size check leaves the tree untouched.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(StorageError::KeyTooLarge {
                size: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }

        if self.root.is_null() {
            // First insert: seed the leaf with the sentinel entry so
            // every future descent has a floor.
            let mut first = NodeBuf::new_working();
            first.set_header(NodeKind::Leaf, 2);
            first.append_cell(0, PageId::NULL, b"", b"");
            first.append_cell(1, PageId::NULL, key, value);
            let mut pages = split3(first);
            debug_assert_eq!(pages.len(), 1);
            self.root = self.store.allocate(pages.remove(0));
            return Ok(());
        }

        let old_root = self.root;
        let root_page = self.store.read(old_root);
        let rewritten = self.insert_into(&root_page.node(), key, value);
        let mut pages = split3(rewritten);
        self.store.free(old_root);

        self.root = if pages.len() == 1 {
            self.store.allocate(pages.remove(0))
        } else {
            // The root itself split: grow the tree by one level.
            let k = pages.len() as u16;
            let mut parent = NodeBuf::new();
            parent.set_header(NodeKind::Internal, k);
            for (i, page) in pages.into_iter().enumerate() {
                let first_key = page.node().key(0).to_vec();
                let child = self.store.allocate(page);
                parent.append_cell(i as u16, child, &first_key, b"");
            }
            self.store.allocate(parent.finish())
        };
        Ok(())
    }

    /// Look up a key, returning its value if present.
    pub fn lookup(&self, key: &[u8]) -> Option<Vec<u8>> {
        if self.root.is_null() || key.is_empty() {
            return None;
        }

        let mut page = self.store.read(self.root);
        loop {
            let next = {
                let node = page.node();
                let i = node.lookup_le(key);
                match node.kind() {
                    NodeKind::Leaf => {
                        if node.key(i) == key {
                            return Some(node.value(i).to_vec());
                        }
                        return None;
                    }
                    NodeKind::Internal => node.pointer(i),
                }
            };
            page = self.store.read(next);
        }
    }

    /// Rewrite the subtree under `node` with the entry applied,
    /// returning the replacement node (possibly wider than one page).
    fn insert_into(&mut self, node: &Node<'_>, key: &[u8], value: &[u8]) -> NodeBuf {
        let i = node.lookup_le(key);
        match node.kind() {
            NodeKind::Leaf => {
                if node.key(i) == key {
                    leaf_update(node, i, key, value)
                } else if key < node.key(i) {
                    // Smaller than every existing key: slot 0 was only
                    // the conventional floor, insert before it.
                    leaf_insert(node, 0, key, value)
                } else {
                    leaf_insert(node, i + 1, key, value)
                }
            }
            NodeKind::Internal => {
                let child_id = node.pointer(i);
                let child_page = self.store.read(child_id);
                let rewritten = self.insert_into(&child_page.node(), key, value);
                let children = split3(rewritten);
                self.store.free(child_id);
                self.replace_child(node, i, children)
            }
        }
    }

    /// Rewrite an internal node with slot `i` replaced by entries for
    /// the 1–3 pages a child rewrite produced.
    fn replace_child(&mut self, node: &Node<'_>, i: u16, children: Vec<PageBuf>) -> NodeBuf {
        let n = node.n_keys();
        let k = children.len() as u16;

        let mut new = NodeBuf::new_working();
        new.set_header(NodeKind::Internal, n + k - 1);
        new.append_range(node, 0, 0, i);
        for (j, page) in children.into_iter().enumerate() {
            let first_key = page.node().key(0).to_vec();
            let child = self.store.allocate(page);
            new.append_cell(i + j as u16, child, &first_key, b"");
        }
        new.append_range(node, i + k, i + 1, n - (i + 1));
        new
    }
}

/// Rewrite a leaf with the value at slot `i` replaced.
fn leaf_update(node: &Node<'_>, i: u16, key: &[u8], value: &[u8]) -> NodeBuf {
    let n = node.n_keys();
    let mut new = NodeBuf::new_working();
    new.set_header(NodeKind::Leaf, n);
    new.append_range(node, 0, 0, i);
    new.append_cell(i, PageId::NULL, key, value);
    new.append_range(node, i + 1, i + 1, n - (i + 1));
    new
}

/// Rewrite a leaf with a new entry spliced in at position `pos`.
fn leaf_insert(node: &Node<'_>, pos: u16, key: &[u8], value: &[u8]) -> NodeBuf {
    let n = node.n_keys();
    let mut new = NodeBuf::new_working();
    new.set_header(NodeKind::Leaf, n + 1);
    new.append_range(node, 0, 0, pos);
    new.append_cell(pos, PageId::NULL, key, value);
    new.append_range(node, pos + 1, pos, n - pos);
    new
}
