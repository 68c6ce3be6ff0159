//! B-tree layer: copy-on-write mutation and lookup.

mod tree;

pub use tree::BTree;
