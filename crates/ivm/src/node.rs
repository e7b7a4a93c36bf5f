//! Result nodes and relationship accessors.
//!
//! A `Node` is one emitted result row plus its named relationships. A
//! relationship accessor is re-callable: each `stream()` call redoes the
//! underlying work and yields a fresh lazy sequence; callers must not
//! assume caching. Accessors are data, not captured closures: either a
//! constrained re-fetch against an operator, or an index set into an arena
//! of already-materialized nodes.

use crate::operator::{Constraint, FetchRequest, NodeStream, Operator};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use eddy_core::Row;

/// Shared arena of materialized nodes, indexed by relationship accessors.
pub type NodeArena = Rc<RefCell<Vec<Node>>>;

/// Where a relationship's child nodes come from.
#[derive(Clone)]
pub enum RelationshipSource {
    /// Constrained re-fetch against an operator.
    Query {
        /// Operator to fetch from.
        input: Rc<dyn Operator>,
        /// Equality constraint binding the relationship.
        constraint: Constraint,
    },
    /// Positions into an arena of materialized nodes.
    Arena {
        /// The shared arena.
        arena: NodeArena,
        /// Member positions, in emission order.
        indices: Vec<usize>,
    },
}

impl fmt::Debug for RelationshipSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipSource::Query { constraint, .. } => f
                .debug_struct("Query")
                .field("constraint", constraint)
                .finish_non_exhaustive(),
            RelationshipSource::Arena { indices, .. } => f
                .debug_struct("Arena")
                .field("indices", indices)
                .finish_non_exhaustive(),
        }
    }
}

/// A named relationship attached to a node.
#[derive(Clone, Debug)]
pub struct Relationship {
    name: String,
    source: RelationshipSource,
}

impl Relationship {
    /// Creates a re-fetch relationship.
    pub fn query(name: impl Into<String>, input: Rc<dyn Operator>, constraint: Constraint) -> Self {
        Self {
            name: name.into(),
            source: RelationshipSource::Query { input, constraint },
        }
    }

    /// Creates an arena relationship.
    pub fn arena(name: impl Into<String>, arena: NodeArena, indices: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            source: RelationshipSource::Arena { arena, indices },
        }
    }

    /// Returns the relationship name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Produces a fresh lazy sequence of child nodes.
    pub fn stream(&self) -> NodeStream {
        match &self.source {
            RelationshipSource::Query { input, constraint } => Rc::clone(input)
                .fetch(FetchRequest::constrained(constraint.clone())),
            RelationshipSource::Arena { arena, indices } => Box::new(ArenaStream {
                arena: Rc::clone(arena),
                indices: indices.clone(),
                pos: 0,
            }),
        }
    }
}

struct ArenaStream {
    arena: NodeArena,
    indices: Vec<usize>,
    pos: usize,
}

impl Iterator for ArenaStream {
    type Item = crate::error::Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let index = *self.indices.get(self.pos)?;
            self.pos += 1;
            let arena = self.arena.borrow();
            match arena.get(index) {
                Some(node) => return Some(Ok(node.clone())),
                // A pruned arena slot; skip rather than yield stale data.
                None => continue,
            }
        }
    }
}

/// One result row plus its relationships.
#[derive(Clone, Debug)]
pub struct Node {
    row: Row,
    relationships: Vec<Relationship>,
}

impl Node {
    /// Creates a node with no relationships.
    pub fn leaf(row: Row) -> Self {
        Self {
            row,
            relationships: Vec::new(),
        }
    }

    /// Returns the node's row.
    #[inline]
    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Consumes the node, returning its row.
    pub fn into_row(self) -> Row {
        self.row
    }

    /// Returns the attached relationships.
    #[inline]
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Gets a relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name() == name)
    }

    /// Returns this node with a relationship attached.
    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Returns this node with a new row, keeping relationships.
    pub fn with_row(mut self, row: Row) -> Self {
        self.row = row;
        self
    }
}

impl From<Row> for Node {
    fn from(row: Row) -> Self {
        Node::leaf(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::Value;

    fn node(id: i64) -> Node {
        Node::leaf(Row::new(vec![Value::Int(id)]))
    }

    #[test]
    fn test_leaf_node() {
        let n = node(1);
        assert_eq!(n.row().get(0), Some(&Value::Int(1)));
        assert!(n.relationships().is_empty());
        assert!(n.relationship("x").is_none());
    }

    #[test]
    fn test_arena_relationship_recallable() {
        let arena: NodeArena = Rc::new(RefCell::new(vec![node(1), node(2), node(3)]));
        let rel = Relationship::arena("members", Rc::clone(&arena), vec![2, 0]);

        for _ in 0..2 {
            let rows: Vec<i64> = rel
                .stream()
                .map(|n| n.unwrap().row().get(0).unwrap().as_int().unwrap())
                .collect();
            assert_eq!(rows, vec![3, 1]);
        }
    }

    #[test]
    fn test_arena_skips_missing_slots() {
        let arena: NodeArena = Rc::new(RefCell::new(vec![node(1)]));
        let rel = Relationship::arena("members", Rc::clone(&arena), vec![0, 9]);
        assert_eq!(rel.stream().count(), 1);
    }

    #[test]
    fn test_with_relationship() {
        let arena: NodeArena = Rc::new(RefCell::new(vec![node(7)]));
        let n = node(1).with_relationship(Relationship::arena("kids", arena, vec![0]));
        assert!(n.relationship("kids").is_some());
        assert_eq!(n.relationships().len(), 1);
    }
}
