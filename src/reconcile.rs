//! List reconciliation.
//!
//! Reference model of what generated each blocks do on update. Keyed lists
//! match items by key, keep surviving items (identity preserved), destroy the
//! unmatched old ones, create the unmatched new ones and move only the items
//! that fall outside a longest increasing subsequence of old positions.
//! Unkeyed lists reuse items by index.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use thiserror::Error;

use crate::host::Host;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("duplicate key {key} in keyed each block")]
pub struct DuplicateKey {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedPatch<K> {
    /// New keys with no old item, in new order.
    pub created: Vec<K>,
    /// Old keys absent from the new list, in old order.
    pub destroyed: Vec<K>,
    /// Surviving keys whose item must be repositioned, in new order.
    pub moved: Vec<K>,
    /// Surviving keys, in new order.
    pub reused: Vec<K>,
}

pub fn reconcile_keyed<K>(old: &[K], new: &[K]) -> Result<KeyedPatch<K>, DuplicateKey>
where
    K: Eq + Hash + Clone + Debug,
{
    let mut new_keys = HashSet::with_capacity(new.len());
    for key in new {
        if !new_keys.insert(key) {
            return Err(DuplicateKey {
                key: format!("{:?}", key),
            });
        }
    }
    let old_index: HashMap<&K, usize> = old.iter().enumerate().map(|(i, k)| (k, i)).collect();

    let mut created = Vec::new();
    let mut reused = Vec::new();
    // Old positions of surviving items, in new order.
    let mut sources = Vec::new();
    for key in new {
        match old_index.get(key) {
            Some(&i) => {
                reused.push(key.clone());
                sources.push(i);
            }
            None => created.push(key.clone()),
        }
    }

    let destroyed = old.iter().filter(|k| !new_keys.contains(k)).cloned().collect();

    let stable: HashSet<usize> = longest_increasing_subsequence(&sources)
        .into_iter()
        .map(|i| sources[i])
        .collect();
    let moved = reused
        .iter()
        .zip(&sources)
        .filter(|(_, source)| !stable.contains(source))
        .map(|(key, _)| key.clone())
        .collect();

    Ok(KeyedPatch {
        created,
        destroyed,
        moved,
        reused,
    })
}

/// Indices into `seq` of one longest strictly increasing subsequence.
pub fn longest_increasing_subsequence(seq: &[usize]) -> Vec<usize> {
    // tails[len] = index of the smallest tail of an increasing run of length len + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, &value) in seq.iter().enumerate() {
        let at = tails.partition_point(|&t| seq[t] < value);
        previous[i] = if at > 0 { Some(tails[at - 1]) } else { None };
        if at == tails.len() {
            tails.push(i);
        } else {
            tails[at] = i;
        }
    }
    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = previous[i];
    }
    out.reverse();
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionalPatch {
    /// Items `0..patched` are reused in place.
    pub patched: usize,
    /// Items `patched..patched + created` are new.
    pub created: usize,
    /// Items `patched..patched + destroyed` of the old list go away.
    pub destroyed: usize,
}

pub fn reconcile_positional(old_len: usize, new_len: usize) -> PositionalPatch {
    let patched = old_len.min(new_len);
    PositionalPatch {
        patched,
        created: new_len - patched,
        destroyed: old_len - patched,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIVE LIST
// ═══════════════════════════════════════════════════════════════════════════════

/// A keyed list of rendered items living in a host parent, positioned before
/// an anchor.
pub struct KeyedList<H: Host, K> {
    parent: H::Node,
    anchor: H::Node,
    items: Vec<(K, H::Node)>,
}

impl<H: Host, K> KeyedList<H, K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(host: &mut H, parent: H::Node) -> Self {
        let anchor = host.create_anchor();
        host.insert(&parent, &anchor, None);
        KeyedList {
            parent,
            anchor,
            items: Vec::new(),
        }
    }

    pub fn keys(&self) -> Vec<K> {
        self.items.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn node(&self, key: &K) -> Option<&H::Node> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, n)| n)
    }

    /// Bring the list in line with `keys`, rendering new items with `render`.
    pub fn update(
        &mut self,
        host: &mut H,
        keys: &[K],
        mut render: impl FnMut(&mut H, &K) -> H::Node,
    ) -> Result<KeyedPatch<K>, DuplicateKey> {
        let old_keys = self.keys();
        let patch = reconcile_keyed(&old_keys, keys)?;

        let mut live: HashMap<K, H::Node> = self.items.drain(..).collect();
        for key in &patch.destroyed {
            if let Some(node) = live.remove(key) {
                host.detach(&node);
            }
        }

        let relocate: HashSet<&K> = patch.created.iter().chain(&patch.moved).collect();
        let mut next = self.anchor.clone();
        let mut ordered: Vec<(K, H::Node)> = Vec::with_capacity(keys.len());
        for key in keys.iter().rev() {
            let node = match live.remove(key) {
                Some(node) => node,
                None => render(host, key),
            };
            if relocate.contains(key) {
                host.insert(&self.parent, &node, Some(&next));
            }
            next = node.clone();
            ordered.push((key.clone(), node));
        }
        ordered.reverse();
        self.items = ordered;
        Ok(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemoryHost, NodeRef};

    #[test]
    fn test_keyed_patch_abc_to_cad() {
        let patch = reconcile_keyed(&["A", "B", "C"], &["C", "A", "D"]).unwrap();
        assert_eq!(patch.created, vec!["D"]);
        assert_eq!(patch.destroyed, vec!["B"]);
        assert_eq!(patch.reused, vec!["C", "A"]);
        assert_eq!(patch.moved.len(), 1);
    }

    #[test]
    fn test_lis_minimises_moves() {
        let patch = reconcile_keyed(&[1, 2, 3, 4, 5], &[5, 1, 2, 3, 4]).unwrap();
        assert_eq!(patch.moved, vec![5]);
        let patch = reconcile_keyed(&[1, 2, 3], &[1, 2, 3]).unwrap();
        assert!(patch.moved.is_empty() && patch.created.is_empty());
    }

    #[test]
    fn test_lis() {
        assert_eq!(longest_increasing_subsequence(&[2, 0, 1, 3]), vec![1, 2, 3]);
        assert!(longest_increasing_subsequence(&[]).is_empty());
    }

    #[test]
    fn test_duplicate_keys() {
        let err = reconcile_keyed(&[1], &[2, 2]).unwrap_err();
        assert_eq!(err.key, "2");
    }

    #[test]
    fn test_positional() {
        assert_eq!(
            reconcile_positional(3, 5),
            PositionalPatch { patched: 3, created: 2, destroyed: 0 }
        );
        assert_eq!(
            reconcile_positional(4, 1),
            PositionalPatch { patched: 1, created: 0, destroyed: 3 }
        );
    }

    #[test]
    fn test_live_list_preserves_identity() {
        let mut host = MemoryHost::new();
        let ul = host.create_element("ul");
        let mut list: KeyedList<MemoryHost, &str> = KeyedList::new(&mut host, ul);
        let render = |host: &mut MemoryHost, key: &&str| -> NodeRef {
            let li = host.create_element("li");
            let text = host.create_text(key);
            host.insert(&li, &text, None);
            li
        };

        list.update(&mut host, &["A", "B", "C"], render).unwrap();
        let a = *list.node(&"A").unwrap();
        let c = *list.node(&"C").unwrap();
        let b = *list.node(&"B").unwrap();
        assert_eq!(host.text_content(ul), "ABC");

        host.moves = 0;
        let patch = list.update(&mut host, &["C", "A", "D"], render).unwrap();
        assert_eq!(patch.created, vec!["D"]);
        assert_eq!(patch.destroyed, vec!["B"]);
        assert_eq!(host.text_content(ul), "CAD");
        // Same host nodes survive the patch.
        assert_eq!(list.node(&"A"), Some(&a));
        assert_eq!(list.node(&"C"), Some(&c));
        assert!(!host.is_attached(b));
        assert_eq!(host.moves, 1);
    }
}
