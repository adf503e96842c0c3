//! Character trie over lowercased symbol names.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::symbol::Symbol;

/// A node of the prefix trie. Symbols hang off the node where their
/// lowercased name ends; every node on the way is shared by all names with
/// that prefix.
#[derive(Debug, Clone, Default)]
pub struct TrieNode {
    children: BTreeMap<char, TrieNode>,
    symbols: Vec<Arc<Symbol>>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.symbols.is_empty()
    }

    fn collect_into(&self, out: &mut Vec<Arc<Symbol>>) {
        out.extend(self.symbols.iter().cloned());
        for child in self.children.values() {
            child.collect_into(out);
        }
    }

    fn count_nodes(&self) -> usize {
        1 + self.children.values().map(TrieNode::count_nodes).sum::<usize>()
    }
}

/// Prefix trie keyed by lowercased names.
#[derive(Debug, Clone, Default)]
pub struct PrefixTrie {
    root: TrieNode,
}

impl PrefixTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: Arc<Symbol>) {
        let mut node = &mut self.root;
        for ch in symbol.name.to_lowercase().chars() {
            node = node.children.entry(ch).or_default();
        }
        node.symbols.push(symbol);
    }

    /// Remove every symbol under `name` for which `predicate` holds, pruning
    /// branches left empty. Returns how many were removed.
    pub fn remove_where<F>(&mut self, name: &str, predicate: F) -> usize
    where
        F: Fn(&Symbol) -> bool,
    {
        let key: Vec<char> = name.to_lowercase().chars().collect();
        Self::remove_rec(&mut self.root, &key, &predicate)
    }

    fn remove_rec<F>(node: &mut TrieNode, key: &[char], predicate: &F) -> usize
    where
        F: Fn(&Symbol) -> bool,
    {
        match key.split_first() {
            None => {
                let before = node.symbols.len();
                node.symbols.retain(|s| !predicate(s));
                before - node.symbols.len()
            }
            Some((ch, rest)) => {
                let Some(child) = node.children.get_mut(ch) else {
                    return 0;
                };
                let removed = Self::remove_rec(child, rest, predicate);
                if child.is_empty() {
                    node.children.remove(ch);
                }
                removed
            }
        }
    }

    /// Every symbol whose lowercased name starts with the lowercased prefix,
    /// collected depth-first. An empty prefix matches nothing.
    pub fn find_prefix(&self, prefix: &str) -> Vec<Arc<Symbol>> {
        if prefix.is_empty() {
            return Vec::new();
        }
        let mut node = &self.root;
        for ch in prefix.to_lowercase().chars() {
            match node.children.get(&ch) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        let mut out = Vec::new();
        node.collect_into(&mut out);
        out
    }

    /// Symbols whose lowercased name is exactly the lowercased `name`.
    pub fn find_exact(&self, name: &str) -> &[Arc<Symbol>] {
        let mut node = &self.root;
        for ch in name.to_lowercase().chars() {
            match node.children.get(&ch) {
                Some(child) => node = child,
                None => return &[],
            }
        }
        &node.symbols
    }

    /// Number of nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.root.count_nodes()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}
