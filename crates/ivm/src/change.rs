//! Change events flowing through the graph.
//!
//! A `Change` describes one mutation at an operator's output granularity.
//! Operators forward changes in arrival order and never batch them. Edits
//! must keep their primary key at every non-join operator; correlated joins
//! are the one place an edit may re-key.

use crate::node::Node;

/// A nested change inside one of a node's relationships.
#[derive(Clone, Debug)]
pub struct ChildChange {
    /// Name of the relationship the change occurred under.
    pub relationship: String,
    /// The nested change.
    pub change: Box<Change>,
}

/// One mutation event.
#[derive(Clone, Debug)]
pub enum Change {
    /// A node newly present.
    Add(Node),
    /// A node no longer present.
    Remove(Node),
    /// Same identity, different content.
    Edit {
        /// The node as it was.
        old: Node,
        /// The node as it is now.
        new: Node,
    },
    /// A nested change within one of `node`'s relationships. The outer node
    /// is a snapshot of the enclosing row at the time of the nested change.
    Child {
        /// The enclosing node.
        node: Node,
        /// The nested change and where it happened.
        child: ChildChange,
    },
}

impl Change {
    /// Creates an add change.
    pub fn add(node: impl Into<Node>) -> Self {
        Change::Add(node.into())
    }

    /// Creates a remove change.
    pub fn remove(node: impl Into<Node>) -> Self {
        Change::Remove(node.into())
    }

    /// Creates an edit change.
    pub fn edit(old: impl Into<Node>, new: impl Into<Node>) -> Self {
        Change::Edit {
            old: old.into(),
            new: new.into(),
        }
    }

    /// Creates a nested child change.
    pub fn child(node: impl Into<Node>, relationship: impl Into<String>, change: Change) -> Self {
        Change::Child {
            node: node.into(),
            child: ChildChange {
                relationship: relationship.into(),
                change: Box::new(change),
            },
        }
    }

    /// The node the change is about. For edits, the new node; for child
    /// changes, the enclosing node.
    pub fn node(&self) -> &Node {
        match self {
            Change::Add(node) | Change::Remove(node) => node,
            Change::Edit { new, .. } => new,
            Change::Child { node, .. } => node,
        }
    }

    /// Like `node`, but the old node for edits.
    pub fn old_node(&self) -> &Node {
        match self {
            Change::Edit { old, .. } => old,
            other => other.node(),
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Change::Add(_) => "add",
            Change::Remove(_) => "remove",
            Change::Edit { .. } => "edit",
            Change::Child { .. } => "child",
        }
    }

    /// Rebuilds the change around transformed nodes, preserving the kind.
    ///
    /// The mapper is applied to each top-level node (old and new for edits).
    pub fn map_nodes(self, mut f: impl FnMut(Node) -> Node) -> Self {
        match self {
            Change::Add(node) => Change::Add(f(node)),
            Change::Remove(node) => Change::Remove(f(node)),
            Change::Edit { old, new } => Change::Edit {
                old: f(old),
                new: f(new),
            },
            Change::Child { node, child } => Change::Child {
                node: f(node),
                child,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::{Row, Value};

    fn node(id: i64) -> Node {
        Node::leaf(Row::new(vec![Value::Int(id)]))
    }

    #[test]
    fn test_change_kinds() {
        assert_eq!(Change::add(node(1)).kind(), "add");
        assert_eq!(Change::remove(node(1)).kind(), "remove");
        assert_eq!(Change::edit(node(1), node(1)).kind(), "edit");
        assert_eq!(
            Change::child(node(1), "kids", Change::add(node(2))).kind(),
            "child"
        );
    }

    #[test]
    fn test_change_node_access() {
        let edit = Change::edit(node(1), node(2));
        assert_eq!(edit.node().row().get(0), Some(&Value::Int(2)));
        assert_eq!(edit.old_node().row().get(0), Some(&Value::Int(1)));

        let child = Change::child(node(3), "kids", Change::add(node(4)));
        assert_eq!(child.node().row().get(0), Some(&Value::Int(3)));
    }

    #[test]
    fn test_map_nodes_keeps_kind() {
        let mapped = Change::edit(node(1), node(2))
            .map_nodes(|n| Node::leaf(Row::new(vec![Value::Int(
                n.row().get(0).unwrap().as_int().unwrap() + 10,
            )])));
        match mapped {
            Change::Edit { old, new } => {
                assert_eq!(old.row().get(0), Some(&Value::Int(11)));
                assert_eq!(new.row().get(0), Some(&Value::Int(12)));
            }
            _ => panic!("kind changed"),
        }
    }

    #[test]
    fn test_nested_child_change() {
        let inner = Change::add(node(5));
        let outer = Change::child(node(1), "posts", inner);
        match outer {
            Change::Child { child, .. } => {
                assert_eq!(child.relationship, "posts");
                assert_eq!(child.change.kind(), "add");
            }
            _ => panic!("not a child change"),
        }
    }
}
