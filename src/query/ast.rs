use serde::{Deserialize, Serialize};

/// Boolean operator a statement contributes relative to the statements
/// before it (§4.8). `Or` is the default when no operator prefix is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    And,
    Or,
    Not,
}

/// How `value` should be matched against the field's term tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Modifier {
    /// `value` — exact match via `has`.
    Exact,
    /// `value~` — fuzzy match via `near(value, default_edits)`.
    Fuzzy,
    /// `value*` — prefix match via `starts_with(value)`.
    Prefix,
    /// `key<value` / `key>value` — open-ended range bound; the full range
    /// is assembled by combining two consecutive `+`-joined range nodes.
    Range(RangeBound),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeBound {
    Lower,
    Upper,
}

/// One parsed statement (`[op] key:value`), with `then` threading any extra
/// terms produced when `value` tokenizes to more than one term — an
/// intra-statement conjunction, distinct from the inter-statement `next`
/// chain built by the top-level parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryNode {
    pub op: Op,
    pub field: String,
    pub value: String,
    pub modifier: Modifier,
    pub then: Option<Box<QueryNode>>,
    pub next: Option<Box<QueryNode>>,
}

impl QueryNode {
    pub fn new(op: Op, field: impl Into<String>, value: impl Into<String>, modifier: Modifier) -> Self {
        QueryNode {
            op,
            field: field.into(),
            value: value.into(),
            modifier,
            then: None,
            next: None,
        }
    }

    /// Iterates this node and every node reachable via `next`.
    pub fn iter_statements(&self) -> impl Iterator<Item = &QueryNode> {
        let mut current = Some(self);
        std::iter::from_fn(move || {
            let node = current?;
            current = node.next.as_deref();
            Some(node)
        })
    }

    /// Iterates this node and every node reachable via `then` (the terms
    /// within this one statement).
    pub fn iter_terms(&self) -> impl Iterator<Item = &QueryNode> {
        let mut current = Some(self);
        std::iter::from_fn(move || {
            let node = current?;
            current = node.then.as_deref();
            Some(node)
        })
    }
}
