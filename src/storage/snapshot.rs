//! Whole-tree snapshot format.
//!
//! A snapshot serializes every page reachable from a root into a single
//! blob that can be replaced atomically on disk. This is the durable
//! form of the tree: the page store itself is free to forget pages the
//! moment they are freed, because the unit of persistence is the
//! reachable set at a chosen root.
//!
//! Layout:
//! ```text
//! Offset  Size       Description
//! 0       16         Magic string "CowTreeSnapV001\0"
//! 16      4          Page size (currently always 4096)
//! 20      8          Page count
//! 28      8          Root page ID (0 for an empty tree)
//! 36      4          CRC32 of bytes 0..36
//! 40      …          page_count records of (page ID: 8, page: 4096)
//! ```
//! Header fields are big-endian; the pages inside the records keep the
//! node format's little-endian layout.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::{write_atomic, MemStore, PageStore};
use crate::types::{NodeKind, PageId, HEADER_SIZE, OFFSET_SIZE, PAGE_SIZE, POINTER_SIZE};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Magic bytes identifying a snapshot file
pub const MAGIC: &[u8; 16] = b"CowTreeSnapV001\0";

/// Snapshot header size
const SNAPSHOT_HEADER_SIZE: usize = 40;

/// Size of one page record (id + page bytes)
const RECORD_SIZE: usize = 8 + PAGE_SIZE;

/// A captured tree: a root id plus every page reachable from it.
pub struct Snapshot {
    root: PageId,
    pages: Vec<(u64, PageBuf)>,
}

impl Snapshot {
    /// Capture the pages reachable from `root` out of a store.
    pub fn capture<S: PageStore>(store: &S, root: PageId) -> Self {
        let mut pages = Vec::new();
        let mut stack = Vec::new();
        if !root.is_null() {
            stack.push(root);
        }
        while let Some(id) = stack.pop() {
            let page = store.read(id);
            {
                let node = page.node();
                if node.kind() == NodeKind::Internal {
                    for i in 0..node.n_keys() {
                        stack.push(node.pointer(i));
                    }
                }
            }
            pages.push((id.value(), page));
        }
        Self { root, pages }
    }

    /// The root id this snapshot was captured at
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Number of pages in the snapshot
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Write the snapshot to `path`, atomically replacing any previous
    /// file there.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.encode())
    }

    /// Read and validate a snapshot from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        Self::decode(&fs::read(path)?)
    }

    /// Turn the snapshot into a live store plus the root to open it at.
    pub fn into_store(self) -> (MemStore, PageId) {
        let pages: HashMap<u64, PageBuf> = self.pages.into_iter().collect();
        (MemStore::with_pages(pages), self.root)
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SNAPSHOT_HEADER_SIZE + self.pages.len() * RECORD_SIZE];

        buf[0..16].copy_from_slice(MAGIC);
        buf[16..20].copy_from_slice(&(PAGE_SIZE as u32).to_be_bytes());
        buf[20..28].copy_from_slice(&(self.pages.len() as u64).to_be_bytes());
        buf[28..36].copy_from_slice(&self.root.value().to_be_bytes());
        let checksum = crc32fast::hash(&buf[0..36]);
        buf[36..40].copy_from_slice(&checksum.to_be_bytes());

        let mut pos = SNAPSHOT_HEADER_SIZE;
        for (id, page) in &self.pages {
            buf[pos..pos + 8].copy_from_slice(&id.to_be_bytes());
            buf[pos + 8..pos + RECORD_SIZE].copy_from_slice(page.as_bytes());
            pos += RECORD_SIZE;
        }
        buf
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SNAPSHOT_HEADER_SIZE {
            return Err(StorageError::invalid_snapshot("header too short"));
        }
        if &bytes[0..16] != MAGIC {
            return Err(StorageError::invalid_snapshot("invalid magic bytes"));
        }

        let page_size = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        if page_size != PAGE_SIZE as u32 {
            return Err(StorageError::invalid_snapshot(format!(
                "unsupported page size: {} (expected {})",
                page_size, PAGE_SIZE
            )));
        }

        let stored_checksum = u32::from_be_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
        let computed_checksum = crc32fast::hash(&bytes[0..36]);
        if stored_checksum != computed_checksum {
            return Err(StorageError::corruption("snapshot header checksum mismatch"));
        }

        let page_count = read_be_u64(bytes, 20) as usize;
        let root = PageId::new(read_be_u64(bytes, 28));
        let expected_len = page_count
            .checked_mul(RECORD_SIZE)
            .and_then(|body| body.checked_add(SNAPSHOT_HEADER_SIZE));
        if expected_len != Some(bytes.len()) {
            return Err(StorageError::corruption(format!(
                "snapshot length {} does not match {} pages",
                bytes.len(),
                page_count
            )));
        }

        let mut pages = Vec::with_capacity(page_count);
        let mut seen = HashSet::with_capacity(page_count);
        let mut pos = SNAPSHOT_HEADER_SIZE;
        for _ in 0..page_count {
            let id = read_be_u64(bytes, pos);
            if id == 0 {
                return Err(StorageError::corruption("snapshot contains the null page id"));
            }
            if !seen.insert(id) {
                return Err(StorageError::corruption(format!("duplicate page id {}", id)));
            }
            let page_bytes = &bytes[pos + 8..pos + RECORD_SIZE];
            validate_node(page_bytes)?;
            pages.push((id, PageBuf::from_bytes(page_bytes)));
            pos += RECORD_SIZE;
        }

        if !root.is_null() && !seen.contains(&root.value()) {
            return Err(StorageError::corruption(format!(
                "root page {} not present in snapshot",
                root
            )));
        }

        Ok(Self { root, pages })
    }
}

/// Sanity-check raw page bytes before trusting them as a node, so that a
/// corrupt snapshot surfaces as an error instead of a codec panic.
fn validate_node(bytes: &[u8]) -> Result<()> {
    let tag = u16::from_le_bytes([bytes[0], bytes[1]]);
    if NodeKind::from_u16(tag).is_none() {
        return Err(StorageError::corruption(format!("invalid node kind tag {}", tag)));
    }
    let n = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
    if n == 0 {
        // Published nodes always carry at least one entry; the first
        // leaf holds the sentinel.
        return Err(StorageError::corruption("node has no entries"));
    }
    let per_slot = POINTER_SIZE + OFFSET_SIZE;
    if HEADER_SIZE + per_slot * n > PAGE_SIZE {
        return Err(StorageError::corruption(format!("key count {} too large", n)));
    }
    let slot = HEADER_SIZE + POINTER_SIZE * n + OFFSET_SIZE * (n - 1);
    let cells = u16::from_le_bytes([bytes[slot], bytes[slot + 1]]) as usize;
    if HEADER_SIZE + per_slot * n + cells > PAGE_SIZE {
        return Err(StorageError::corruption("node content overruns the page"));
    }
    Ok(())
}

fn read_be_u64(buf: &[u8], pos: usize) -> u64 {
    u64::from_be_bytes([
        buf[pos],
        buf[pos + 1],
        buf[pos + 2],
        buf[pos + 3],
        buf[pos + 4],
        buf[pos + 5],
        buf[pos + 6],
        buf[pos + 7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BTree;
    use tempfile::tempdir;

    fn sample_tree() -> BTree<MemStore> {
        let mut tree = BTree::new(MemStore::new());
        for i in 0..50u32 {
            let key = format!("key{:03}", i);
            let value = format!("value{}", i);
            tree.insert(key.as_bytes(), value.as_bytes()).unwrap();
        }
        tree
    }

    #[test]
    fn test_snapshot_roundtrip_in_memory() {
        let tree = sample_tree();
        let snapshot = Snapshot::capture(tree.store(), tree.root());
        assert_eq!(snapshot.page_count(), tree.store().len());

        let encoded = snapshot.encode();
        let decoded = Snapshot::decode(&encoded).unwrap();
        assert_eq!(decoded.root(), tree.root());
        assert_eq!(decoded.page_count(), snapshot.page_count());
    }

    #[test]
    fn test_snapshot_save_and_load() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.snap");

        let tree = sample_tree();
        Snapshot::capture(tree.store(), tree.root()).save(&path)?;

        let (store, root) = Snapshot::load(&path)?.into_store();
        let reopened = BTree::open(store, root);
        for i in 0..50u32 {
            let key = format!("key{:03}", i);
            let expected = format!("value{}", i);
            assert_eq!(reopened.lookup(key.as_bytes()), Some(expected.into_bytes()));
        }
        Ok(())
    }

    #[test]
    fn test_empty_tree_snapshot() {
        let store = MemStore::new();
        let snapshot = Snapshot::capture(&store, PageId::NULL);
        assert_eq!(snapshot.page_count(), 0);

        let decoded = Snapshot::decode(&snapshot.encode()).unwrap();
        assert!(decoded.root().is_null());
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let tree = sample_tree();
        let mut encoded = Snapshot::capture(tree.store(), tree.root()).encode();
        encoded[0..16].copy_from_slice(b"NotASnapshot0000");
        assert!(matches!(
            Snapshot::decode(&encoded),
            Err(StorageError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let tree = sample_tree();
        let mut encoded = Snapshot::capture(tree.store(), tree.root()).encode();
        // Flip a bit in the root field; the checksum must catch it.
        encoded[30] ^= 0xFF;
        assert!(matches!(
            Snapshot::decode(&encoded),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let tree = sample_tree();
        let mut encoded = Snapshot::capture(tree.store(), tree.root()).encode();
        encoded.truncate(encoded.len() - 100);
        assert!(Snapshot::decode(&encoded).is_err());
    }

    #[test]
    fn test_corrupt_page_rejected() {
        let tree = sample_tree();
        let mut encoded = Snapshot::capture(tree.store(), tree.root()).encode();
        // Wreck the first page's kind tag.
        encoded[SNAPSHOT_HEADER_SIZE + 8] = 0xAB;
        encoded[SNAPSHOT_HEADER_SIZE + 9] = 0xCD;
        assert!(matches!(
            Snapshot::decode(&encoded),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn test_empty_node_page_rejected() {
        let tree = sample_tree();
        let mut encoded = Snapshot::capture(tree.store(), tree.root()).encode();
        // Zero the first page's key count; the tag stays valid.
        encoded[SNAPSHOT_HEADER_SIZE + 8 + 2] = 0;
        encoded[SNAPSHOT_HEADER_SIZE + 8 + 3] = 0;
        assert!(matches!(
            Snapshot::decode(&encoded),
            Err(StorageError::Corruption(_))
        ));
    }
}
