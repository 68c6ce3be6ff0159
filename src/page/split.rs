//! Split engine.
//!
//! A just-rewritten node may be up to two pages wide. `split3` reduces it
//! to one, two, or three page-sized nodes whose concatenation preserves
//! entry order and content. Three pages always suffice: a single cell is
//! bounded by the maximum key and value sizes, which fit one page by the
//! compile-time layout check.

use crate::page::{Node, NodeBuf, PageBuf};
use crate::types::{HEADER_SIZE, OFFSET_SIZE, PAGE_SIZE, POINTER_SIZE};

/// Reduce an oversized node to at most three page-sized nodes.
pub fn split3(node: NodeBuf) -> Vec<PageBuf> {
    if node.n_bytes() <= PAGE_SIZE {
        return vec![node.finish()];
    }

    let (left, right) = split2(&node.view());
    if left.n_bytes() <= PAGE_SIZE {
        return vec![left.finish(), right.finish()];
    }

    // The left half kept more than a page; split it once more. The
    // second left half must fit now, or the node held an impossible cell.
    let (leftleft, middle) = split2(&left.view());
    assert!(
        leftleft.n_bytes() <= PAGE_SIZE,
        "second split left half still oversized ({} bytes)",
        leftleft.n_bytes()
    );
    vec![leftleft.finish(), middle.finish(), right.finish()]
}

/// Partition a node into a left and right half.
///
/// The split point starts at the entry-count midpoint (the left side
/// takes the smaller half when `n` is odd) and is then adjusted by
/// bytes: moved down until the left half fits one page, then up until
/// the right half does. The right half always fits on return; only the
/// left half may still be oversized, which `split3` re-splits.
fn split2(old: &Node<'_>) -> (NodeBuf, NodeBuf) {
    let n = old.n_keys();
    assert!(n >= 2, "cannot split a node of {} entries", n);

    let per_slot = POINTER_SIZE + OFFSET_SIZE;
    // Byte length of a standalone node holding the first `nl` entries.
    let left_bytes = |nl: u16| HEADER_SIZE + per_slot * nl as usize + old.offset(nl) as usize;
    // Byte length of the complementary node.
    let right_bytes = |nl: u16| old.n_bytes() - left_bytes(nl) + HEADER_SIZE;

    let mut nleft = n / 2;
    while left_bytes(nleft) > PAGE_SIZE {
        nleft -= 1;
    }
    assert!(nleft >= 1);
    while right_bytes(nleft) > PAGE_SIZE {
        nleft += 1;
    }
    assert!(nleft < n);

    let mut left = NodeBuf::new_working();
    left.set_header(old.kind(), nleft);
    left.append_range(old, 0, 0, nleft);

    let mut right = NodeBuf::new();
    right.set_header(old.kind(), n - nleft);
    right.append_range(old, 0, nleft, n - nleft);

    assert!(right.n_bytes() <= PAGE_SIZE);
    (left, right)
}
