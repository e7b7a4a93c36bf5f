//! Reference terminal consumer.
//!
//! `TreeView` materializes an operator's output: ordered top-level nodes
//! with their relationships recursively drained. It is what a binding
//! layer sits on top of, and what the integration tests use to check that
//! a hydrate-then-push history converges to the same tree as a fresh
//! fetch. Application is keyed by primary key and idempotent, because a
//! reader that overlapped a push may legitimately observe a row both in
//! its fetch stream and in the forwarded change.

use crate::change::Change;
use crate::error::Result;
use crate::node::Node;
use crate::operator::{NodeStream, Output};
use eddy_core::{Row, Schema};
use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::rc::Rc;

/// A fully materialized result node.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterializedNode {
    /// The node's row.
    pub row: Row,
    /// Materialized relationships, name to ordered children.
    pub relationships: Vec<(String, Vec<MaterializedNode>)>,
}

impl MaterializedNode {
    fn from_node(node: &Node) -> Result<Self> {
        let mut relationships = Vec::with_capacity(node.relationships().len());
        for rel in node.relationships() {
            let mut children = Vec::new();
            for item in rel.stream() {
                children.push(Self::from_node(&item?)?);
            }
            relationships.push((rel.name().to_string(), children));
        }
        Ok(Self {
            row: node.row().clone(),
            relationships,
        })
    }

    fn children_mut(&mut self, relationship: &str) -> &mut Vec<MaterializedNode> {
        if let Some(i) = self
            .relationships
            .iter()
            .position(|(name, _)| name == relationship)
        {
            return &mut self.relationships[i].1;
        }
        self.relationships.push((relationship.to_string(), Vec::new()));
        let last = self.relationships.len() - 1;
        &mut self.relationships[last].1
    }
}

/// Materialized tree over an operator's output, maintained by pushes.
pub struct TreeView {
    schema: Rc<Schema>,
    roots: RefCell<Vec<MaterializedNode>>,
}

impl TreeView {
    /// Creates an empty view over the given output schema.
    pub fn new(schema: Rc<Schema>) -> Rc<Self> {
        Rc::new(Self {
            schema,
            roots: RefCell::new(Vec::new()),
        })
    }

    /// Replaces the tree with the contents of a stream.
    ///
    /// Nodes are applied one by one with no borrow held between pulls, so
    /// a push delivered while the stream is being drained interleaves with
    /// hydration instead of being lost.
    pub fn hydrate(&self, stream: NodeStream) -> Result<()> {
        self.roots.borrow_mut().clear();
        for item in stream {
            let node = item?;
            let mut roots = self.roots.borrow_mut();
            Self::apply_add(&mut roots, &self.schema, &node)?;
        }
        Ok(())
    }

    /// Returns the materialized tree.
    pub fn roots(&self) -> Vec<MaterializedNode> {
        self.roots.borrow().clone()
    }

    /// Returns the top-level rows.
    pub fn rows(&self) -> Vec<Row> {
        self.roots.borrow().iter().map(|m| m.row.clone()).collect()
    }

    /// Returns the number of top-level nodes.
    pub fn len(&self) -> usize {
        self.roots.borrow().len()
    }

    /// Returns true when the view is empty.
    pub fn is_empty(&self) -> bool {
        self.roots.borrow().is_empty()
    }

    fn apply_add(
        rows: &mut Vec<MaterializedNode>,
        schema: &Schema,
        node: &Node,
    ) -> Result<()> {
        let materialized = MaterializedNode::from_node(node)?;
        if let Some(i) = rows
            .iter()
            .position(|m| schema.same_primary_key(&m.row, &materialized.row))
        {
            rows.remove(i);
        }
        let at = rows.partition_point(|m| {
            schema.compare_rows(&m.row, &materialized.row) == CmpOrdering::Less
        });
        rows.insert(at, materialized);
        Ok(())
    }

    fn apply_remove(rows: &mut Vec<MaterializedNode>, schema: &Schema, node: &Node) {
        if let Some(i) = rows
            .iter()
            .position(|m| schema.same_primary_key(&m.row, node.row()))
        {
            rows.remove(i);
        }
    }

    fn apply(
        rows: &mut Vec<MaterializedNode>,
        schema: &Schema,
        change: Change,
    ) -> Result<()> {
        match change {
            Change::Add(node) => Self::apply_add(rows, schema, &node)?,
            Change::Remove(node) => Self::apply_remove(rows, schema, &node),
            Change::Edit { old, new } => {
                Self::apply_remove(rows, schema, &old);
                Self::apply_add(rows, schema, &new)?;
            }
            Change::Child { node, child } => {
                let Some(target) = rows
                    .iter_mut()
                    .find(|m| schema.same_primary_key(&m.row, node.row()))
                else {
                    // A nested change under a row this view never saw;
                    // nothing to maintain.
                    return Ok(());
                };
                let child_schema = match schema.relationship(&child.relationship) {
                    Some(s) => Rc::clone(s),
                    None => return Ok(()),
                };
                let children = target.children_mut(&child.relationship);
                Self::apply(children, &child_schema, *child.change)?;
            }
        }
        Ok(())
    }
}

impl Output for TreeView {
    fn push(&self, change: Change) -> Result<()> {
        let mut roots = self.roots.borrow_mut();
        Self::apply(&mut roots, &self.schema, change)
    }
}
