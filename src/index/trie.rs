use std::path::Path;

use crate::core::error::{Error, Result};

/// An LCRS (left-child/right-sibling) trie over UTF-16 code units (§4.4).
/// Each node's `child` points at its first child; full sibling chains are
/// threaded through `sibling`, kept in ascending code-unit order so in-order
/// traversal yields terms in lexicographic order, which `range` relies on.
#[derive(Debug, Clone)]
struct TrieNode {
    unit: u16,
    terminal: bool,
    postings_offset: u64,
    child: Option<u32>,
    sibling: Option<u32>,
}

/// A term tree for one field. Built in memory during a write session and
/// serialized once to a `<version-id>-<field-name>.tri` file at commit.
pub struct Trie {
    nodes: Vec<TrieNode>,
    root: Option<u32>,
}

impl Trie {
    pub fn new() -> Self {
        Trie {
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Inserts `term`, attaching `postings_offset` (the page offset of its
    /// posting list) at the terminal node. Re-inserting an existing term
    /// overwrites its postings offset.
    pub fn insert(&mut self, term: &str, postings_offset: u64) {
        let units: Vec<u16> = term.encode_utf16().collect();
        if units.is_empty() {
            return;
        }

        let mut chain_head = self.root;
        let mut parent: Option<u32> = None;
        let mut node_idx = 0u32;

        for &unit in &units {
            let idx = self.find_or_insert(chain_head, parent, unit);
            node_idx = idx;
            chain_head = self.nodes[idx as usize].child;
            parent = Some(idx);
        }

        self.nodes[node_idx as usize].terminal = true;
        self.nodes[node_idx as usize].postings_offset = postings_offset;
    }

    /// Finds `unit` among the sibling chain starting at `chain_head`,
    /// inserting a new node in sorted position if absent. `parent` is the
    /// node whose `child` pointer must be updated if the new node becomes
    /// the chain's head (or `None` when the chain is the tree's root list).
    fn find_or_insert(&mut self, chain_head: Option<u32>, parent: Option<u32>, unit: u16) -> u32 {
        let mut prev: Option<u32> = None;
        let mut cursor = chain_head;
        loop {
            match cursor {
                Some(idx) => {
                    let node_unit = self.nodes[idx as usize].unit;
                    if node_unit == unit {
                        return idx;
                    }
                    if node_unit > unit {
                        break;
                    }
                    prev = Some(idx);
                    cursor = self.nodes[idx as usize].sibling;
                }
                None => break,
            }
        }

        let new_idx = self.nodes.len() as u32;
        self.nodes.push(TrieNode {
            unit,
            terminal: false,
            postings_offset: 0,
            child: None,
            sibling: cursor,
        });

        match prev {
            Some(prev_idx) => self.nodes[prev_idx as usize].sibling = Some(new_idx),
            None => match parent {
                Some(parent_idx) => self.nodes[parent_idx as usize].child = Some(new_idx),
                None => self.root = Some(new_idx),
            },
        }
        new_idx
    }

    fn chain(&self, head: Option<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = head;
        while let Some(idx) = cursor {
            out.push(idx);
            cursor = self.nodes[idx as usize].sibling;
        }
        out
    }

    pub fn has(&self, term: &str) -> Option<u64> {
        let units: Vec<u16> = term.encode_utf16().collect();
        let node = self.walk(&units)?;
        self.nodes[node as usize]
            .terminal
            .then(|| self.nodes[node as usize].postings_offset)
    }

    /// All terms in the tree that start with `prefix`, with their postings
    /// offsets.
    pub fn starts_with(&self, prefix: &str) -> Vec<(String, u64)> {
        let units: Vec<u16> = prefix.encode_utf16().collect();
        let mut out = Vec::new();
        if units.is_empty() {
            let mut buf = Vec::new();
            self.collect(self.chain(self.root), &mut buf, &mut out);
            return out;
        }
        if let Some(node) = self.walk(&units) {
            let mut buf = units.clone();
            if self.nodes[node as usize].terminal {
                out.push((from_units(&buf), self.nodes[node as usize].postings_offset));
            }
            self.collect(self.chain(self.nodes[node as usize].child), &mut buf, &mut out);
        }
        out
    }

    fn collect(&self, level: Vec<u32>, prefix: &mut Vec<u16>, out: &mut Vec<(String, u64)>) {
        for idx in level {
            let n = &self.nodes[idx as usize];
            prefix.push(n.unit);
            if n.terminal {
                out.push((from_units(prefix), n.postings_offset));
            }
            self.collect(self.chain(n.child), prefix, out);
            prefix.pop();
        }
    }

    /// All terms whose Levenshtein distance to `term` is `<= max_edits`,
    /// found by a depth-bounded walk that prunes any branch whose edit
    /// distance so far already exceeds the budget (the manual equivalent of
    /// a Levenshtein automaton).
    pub fn near(&self, term: &str, max_edits: u8) -> Vec<(String, u8, u64)> {
        let target: Vec<u16> = term.encode_utf16().collect();
        let mut out = Vec::new();
        let row: Vec<u32> = (0..=target.len() as u32).collect();
        let mut path = Vec::new();
        for idx in self.chain(self.root) {
            self.near_walk(idx, &target, &row, &mut path, max_edits, &mut out);
        }
        out.sort_by_key(|(_, dist, _)| *dist);
        out
    }

    fn near_walk(
        &self,
        node: u32,
        target: &[u16],
        prev_row: &[u32],
        path: &mut Vec<u16>,
        max_edits: u8,
        out: &mut Vec<(String, u8, u64)>,
    ) {
        let n = &self.nodes[node as usize];
        path.push(n.unit);

        let mut row = vec![prev_row[0] + 1];
        for j in 1..prev_row.len() {
            let cost = if target[j - 1] == n.unit { 0 } else { 1 };
            let value = (prev_row[j] + 1).min(row[j - 1] + 1).min(prev_row[j - 1] + cost);
            row.push(value);
        }

        if *row.iter().min().unwrap() <= max_edits as u32 {
            if n.terminal {
                let dist = row[row.len() - 1];
                if dist <= max_edits as u32 {
                    out.push((from_units(path), dist as u8, n.postings_offset));
                }
            }
            for sib in self.chain(n.child) {
                self.near_walk(sib, target, &row, path, max_edits, out);
            }
        }

        path.pop();
    }

    /// Terms in `[from, to]` lexicographic order — inclusive on both ends
    /// when `from`/`to` are themselves indexed terms, strict-lexicographic
    /// otherwise (§4.4) — found by in-order traversal of the sorted
    /// sibling chains.
    pub fn range(&self, from: &str, to: &str) -> Vec<(String, u64)> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        self.range_walk(self.chain(self.root), from, to, &mut prefix, &mut out);
        out
    }

    fn range_walk(&self, level: Vec<u32>, from: &str, to: &str, prefix: &mut Vec<u16>, out: &mut Vec<(String, u64)>) {
        for idx in level {
            let n = &self.nodes[idx as usize];
            prefix.push(n.unit);
            let current = from_units(prefix);
            if n.terminal && current.as_str() >= from && current.as_str() <= to {
                out.push((current.clone(), n.postings_offset));
            }
            // Every descendant of `current` is lexicographically >= current,
            // so once current itself has reached `to` there is nothing left
            // to find in this subtree.
            if current.as_str() < to {
                self.range_walk(self.chain(n.child), from, to, prefix, out);
            }
            prefix.pop();
        }
    }

    fn walk(&self, units: &[u16]) -> Option<u32> {
        let mut chain_head = self.root;
        let mut current = None;
        for &unit in units {
            let found = self.chain(chain_head).into_iter().find(|&idx| self.nodes[idx as usize].unit == unit)?;
            current = Some(found);
            chain_head = self.nodes[found as usize].child;
        }
        current
    }

    /// Serializes the tree depth-first: each node writes its own header,
    /// then (if present) its child subtree, then (if present) its sibling
    /// subtree. A reader needs only a one-node lookahead — the flags byte —
    /// to know which branch follows.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut buf = Vec::new();
        match self.root {
            Some(root) => {
                buf.push(1);
                self.encode_node(root, &mut buf);
            }
            None => buf.push(0),
        }
        std::fs::write(path, buf)?;
        Ok(())
    }

    fn encode_node(&self, idx: u32, buf: &mut Vec<u8>) {
        let n = &self.nodes[idx as usize];
        buf.extend_from_slice(&n.unit.to_be_bytes());
        let flags = (n.terminal as u8) | ((n.child.is_some() as u8) << 1) | ((n.sibling.is_some() as u8) << 2);
        buf.push(flags);
        if n.terminal {
            buf.extend_from_slice(&n.postings_offset.to_be_bytes());
        }
        if let Some(child) = n.child {
            self.encode_node(child, buf);
        }
        if let Some(sibling) = n.sibling {
            self.encode_node(sibling, buf);
        }
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(Error::DataMisaligned("empty trie file".into()));
        }
        let mut trie = Trie::new();
        if bytes[0] == 0 {
            return Ok(trie);
        }
        let mut pos = 1usize;
        let root = trie.decode_node(&bytes, &mut pos)?;
        trie.root = Some(root);
        Ok(trie)
    }

    fn decode_node(&mut self, bytes: &[u8], pos: &mut usize) -> Result<u32> {
        if *pos + 3 > bytes.len() {
            return Err(Error::DataMisaligned("truncated trie node".into()));
        }
        let unit = u16::from_be_bytes(bytes[*pos..*pos + 2].try_into().unwrap());
        let flags = bytes[*pos + 2];
        *pos += 3;
        let terminal = flags & 0b001 != 0;
        let has_child = flags & 0b010 != 0;
        let has_sibling = flags & 0b100 != 0;

        let postings_offset = if terminal {
            if *pos + 8 > bytes.len() {
                return Err(Error::DataMisaligned("truncated trie postings offset".into()));
            }
            let v = u64::from_be_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
            *pos += 8;
            v
        } else {
            0
        };

        let idx = self.nodes.len() as u32;
        self.nodes.push(TrieNode {
            unit,
            terminal,
            postings_offset,
            child: None,
            sibling: None,
        });

        if has_child {
            let child = self.decode_node(bytes, pos)?;
            self.nodes[idx as usize].child = Some(child);
        }
        if has_sibling {
            let sibling = self.decode_node(bytes, pos)?;
            self.nodes[idx as usize].sibling = Some(sibling);
        }
        Ok(idx)
    }
}

impl Default for Trie {
    fn default() -> Self {
        Trie::new()
    }
}

fn from_units(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn exact_and_prefix_lookup() {
        let mut trie = Trie::new();
        trie.insert("cat", 1);
        trie.insert("car", 2);
        trie.insert("cart", 3);

        assert_eq!(trie.has("cat"), Some(1));
        assert_eq!(trie.has("ca"), None);

        let mut prefixed: Vec<String> = trie.starts_with("car").into_iter().map(|(t, _)| t).collect();
        prefixed.sort();
        assert_eq!(prefixed, vec!["car".to_string(), "cart".to_string()]);
    }

    #[test]
    fn near_finds_single_edit_typo() {
        let mut trie = Trie::new();
        trie.insert("kitten", 1);
        let hits = trie.near("sitten", 1);
        assert!(hits.iter().any(|(t, dist, _)| t == "kitten" && *dist == 1));
    }

    #[test]
    fn range_is_lexicographic_and_inclusive_of_both_endpoints() {
        let mut trie = Trie::new();
        for t in ["apple", "banana", "cherry", "date"] {
            trie.insert(t, 0);
        }
        let mut hits: Vec<String> = trie.range("apple", "cherry").into_iter().map(|(t, _)| t).collect();
        hits.sort();
        assert_eq!(hits, vec!["apple".to_string(), "banana".to_string(), "cherry".to_string()]);
    }

    #[test]
    fn range_endpoints_need_not_be_indexed_terms() {
        let mut trie = Trie::new();
        for t in ["apple", "banana", "cherry", "date"] {
            trie.insert(t, 0);
        }
        let hits: Vec<String> = trie.range("aa", "cz").into_iter().map(|(t, _)| t).collect();
        assert_eq!(hits, vec!["apple".to_string(), "banana".to_string(), "cherry".to_string()]);
    }

    #[test]
    fn numeric_string_range_matches_scenario_five() {
        let mut trie = Trie::new();
        for t in ["0000123", "0000333", "0000666", "0012345", "0077777", "0100006", "1000989"] {
            trie.insert(t, 0);
        }
        let hits: Vec<String> = trie.range("0000333", "0100006").into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            hits,
            vec![
                "0000333".to_string(),
                "0000666".to_string(),
                "0012345".to_string(),
                "0077777".to_string(),
                "0100006".to_string(),
            ]
        );
    }

    #[test]
    fn survives_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1-title.tri");
        let mut trie = Trie::new();
        trie.insert("hello", 10);
        trie.insert("help", 20);
        trie.insert("world", 30);
        trie.write_to(&path).unwrap();

        let reopened = Trie::read_from(&path).unwrap();
        assert_eq!(reopened.has("hello"), Some(10));
        assert_eq!(reopened.has("help"), Some(20));
        assert_eq!(reopened.has("world"), Some(30));
        assert_eq!(reopened.has("worlds"), None);
    }

    use proptest::prelude::*;

    fn term_strategy() -> impl Strategy<Value = String> {
        "[a-z]{1,8}"
    }

    proptest! {
        // §8: "for any multiset of terms T inserted in any order: after
        // serialize+reload, has(t) holds for every t in T, and
        // starts_with("") enumerates exactly the set T in lexicographic
        // order."
        #[test]
        fn trie_round_trip_preserves_membership_and_order(
            terms in proptest::collection::vec(term_strategy(), 0..40)
        ) {
            let mut trie = Trie::new();
            let distinct: std::collections::BTreeSet<String> = terms.into_iter().collect();
            for (i, t) in distinct.iter().enumerate() {
                trie.insert(t, i as u64);
            }

            let dir = tempdir().unwrap();
            let path = dir.path().join("prop.tri");
            trie.write_to(&path).unwrap();
            let reopened = Trie::read_from(&path).unwrap();

            for t in &distinct {
                prop_assert!(reopened.has(t).is_some());
            }

            let enumerated: Vec<String> = reopened.starts_with("").into_iter().map(|(t, _)| t).collect();
            let expected: Vec<String> = distinct.into_iter().collect();
            prop_assert_eq!(enumerated, expected);
        }

        // §8: "for all terms t and edit budgets e1 <= e2, near(t, e1) is a
        // subset of near(t, e2)."
        #[test]
        fn fuzzy_near_is_monotone_in_edit_budget(
            terms in proptest::collection::vec(term_strategy(), 1..30),
            query in term_strategy(),
            e1 in 0u8..3,
            extra in 0u8..3,
        ) {
            let mut trie = Trie::new();
            for (i, t) in terms.iter().enumerate() {
                trie.insert(t, i as u64);
            }
            let e2 = e1 + extra;

            let small: std::collections::BTreeSet<String> =
                trie.near(&query, e1).into_iter().map(|(t, _, _)| t).collect();
            let large: std::collections::BTreeSet<String> =
                trie.near(&query, e2).into_iter().map(|(t, _, _)| t).collect();

            prop_assert!(small.is_subset(&large));
        }
    }
}
