//! Parent-driving join orientation.
//!
//! Output follows the parent schema order, one node per parent row, with
//! the child rows attached under the relationship name as a constrained
//! lazy re-fetch. Parents with no children are still emitted; inner-join
//! visibility is the child-driving orientation's concern. The operator is
//! stateless: membership questions are answered by constrained fetches
//! against the live upstreams.

use crate::change::{Change, ChildChange};
use crate::error::Result;
use crate::node::{Node, NodeArena, Relationship};
use crate::operator::{FetchRequest, NodeStream, Operator, Output, OutputSlot};
use eddy_core::{Schema, Value};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

use super::{wire_sides, JoinKeys, Side, SidedPush};

/// Hierarchical join emitting parent rows with lazy child relationships.
pub struct ParentJoin {
    parent: Rc<dyn Operator>,
    child: Rc<dyn Operator>,
    keys: JoinKeys,
    relationship: String,
    hidden: bool,
    schema: Rc<Schema>,
    output: OutputSlot,
}

impl ParentJoin {
    /// Creates the operator. Correlation key lists are positionally paired
    /// and must have equal length.
    pub fn new(
        parent: Rc<dyn Operator>,
        child: Rc<dyn Operator>,
        parent_key: &[&str],
        child_key: &[&str],
        relationship: impl Into<String>,
        hidden: bool,
    ) -> Result<Rc<Self>> {
        let parent_schema = parent.schema();
        let child_schema = child.schema();
        let keys = JoinKeys::resolve(&parent_schema, &child_schema, parent_key, child_key)?;
        let relationship = relationship.into();
        let schema = if hidden {
            Rc::clone(&parent_schema)
        } else {
            Rc::new(parent_schema.with_relationship(relationship.clone(), child_schema))
        };
        Ok(Rc::new(Self {
            parent,
            child,
            keys,
            relationship,
            hidden,
            schema,
            output: OutputSlot::new(),
        }))
    }

    /// Registers this join as the output of both upstream operators.
    pub fn connect(self: &Rc<Self>) {
        wire_sides(self, &self.parent, &self.child);
    }

    /// Attaches the relationship accessor to a parent node.
    fn attach(&self, node: Node) -> Node {
        if self.hidden {
            return node;
        }
        let key = self.keys.parent_values(node.row());
        let constraint = self.keys.child_constraint(&key);
        let rel = Relationship::query(self.relationship.clone(), Rc::clone(&self.child), constraint);
        node.with_relationship(rel)
    }

    /// Parents currently matching a correlation key, in parent order.
    fn matching_parents(&self, key: &[Value]) -> Result<Vec<Node>> {
        let constraint = self.keys.parent_constraint(key);
        Rc::clone(&self.parent)
            .fetch(FetchRequest::constrained(constraint))
            .collect()
    }

    fn push_parent(&self, change: Change) -> Result<()> {
        trace!(kind = change.kind(), "parent join: parent push");
        let change = change.map_nodes(|n| self.attach(n));
        self.output.forward("parent-join", change)
    }

    fn push_child(&self, change: Change) -> Result<()> {
        trace!(kind = change.kind(), "parent join: child push");
        if self.hidden {
            return Ok(());
        }
        match change {
            Change::Add(child) => {
                let key = self.keys.child_values(child.row());
                self.forward_under_parents(&key, |_| Change::Add(child.clone()))
            }
            Change::Remove(child) => {
                let key = self.keys.child_values(child.row());
                self.forward_under_parents(&key, |_| Change::Remove(child.clone()))
            }
            Change::Edit { old, new } => {
                let old_key = self.keys.child_values(old.row());
                let new_key = self.keys.child_values(new.row());
                if old_key == new_key {
                    self.forward_under_parents(&old_key, |_| Change::Edit {
                        old: old.clone(),
                        new: new.clone(),
                    })
                } else {
                    // The child moved between correlation groups: it leaves
                    // the old parents and joins the new ones.
                    self.forward_under_parents(&old_key, |_| Change::Remove(old.clone()))?;
                    self.forward_under_parents(&new_key, |_| Change::Add(new.clone()))
                }
            }
            Change::Child { node, child } => {
                let key = self.keys.child_values(node.row());
                self.forward_under_parents(&key, |_| Change::Child {
                    node: node.clone(),
                    child: ChildChange {
                        relationship: child.relationship.clone(),
                        change: child.change.clone(),
                    },
                })
            }
        }
    }

    /// Forwards one nested change per parent currently matching `key`.
    fn forward_under_parents(
        &self,
        key: &[Value],
        make: impl Fn(&Node) -> Change,
    ) -> Result<()> {
        for parent in self.matching_parents(key)? {
            let inner = make(&parent);
            let change = Change::Child {
                node: self.attach(parent),
                child: ChildChange {
                    relationship: self.relationship.clone(),
                    change: Box::new(inner),
                },
            };
            self.output.forward("parent-join", change)?;
        }
        Ok(())
    }
}

impl SidedPush for ParentJoin {
    fn push_from(&self, side: Side, change: Change) -> Result<()> {
        match side {
            Side::Parent => self.push_parent(change),
            Side::Child => self.push_child(change),
        }
    }
}

impl Output for ParentJoin {
    /// A direct push targets the driving (parent) side.
    fn push(&self, change: Change) -> Result<()> {
        self.push_parent(change)
    }
}

impl Operator for ParentJoin {
    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn set_output(&self, output: Rc<dyn Output>) {
        self.output.set(output);
    }

    fn fetch(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        let upstream = Rc::clone(&self.parent).fetch(request);
        Box::new(ParentJoinStream { op: self, upstream })
    }

    fn cleanup(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        let upstream = Rc::clone(&self.parent).cleanup(request);
        Box::new(ParentJoinCleanup { op: self, upstream })
    }

    fn destroy(&self) {
        self.output.clear();
        self.parent.destroy();
        self.child.destroy();
    }
}

struct ParentJoinStream {
    op: Rc<ParentJoin>,
    upstream: NodeStream,
}

impl Iterator for ParentJoinStream {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.upstream.next()? {
            Ok(node) => Some(Ok(self.op.attach(node))),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Cleanup drains the child side eagerly per parent so child-side state for
/// the scanned range is discarded too, and attaches the drained nodes so
/// the caller still observes a correct final view.
struct ParentJoinCleanup {
    op: Rc<ParentJoin>,
    upstream: NodeStream,
}

impl Iterator for ParentJoinCleanup {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = match self.upstream.next()? {
            Ok(node) => node,
            Err(e) => return Some(Err(e)),
        };
        if self.op.hidden {
            return Some(Ok(node));
        }
        let key = self.op.keys.parent_values(node.row());
        let constraint = self.op.keys.child_constraint(&key);
        let mut children = Vec::new();
        for item in Rc::clone(&self.op.child).cleanup(FetchRequest::constrained(constraint)) {
            match item {
                Ok(child) => children.push(child),
                Err(e) => return Some(Err(e)),
            }
        }
        let indices = (0..children.len()).collect();
        let arena: NodeArena = Rc::new(RefCell::new(children));
        Some(Ok(node.with_relationship(Relationship::arena(
            self.op.relationship.clone(),
            arena,
            indices,
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use eddy_core::{DataType, Order, Row, SchemaBuilder, Value};

    fn users_schema() -> Schema {
        SchemaBuilder::new("users")
            .unwrap()
            .column("id", DataType::Int)
            .unwrap()
            .column("name", DataType::String)
            .unwrap()
            .primary_key(&["id"])
            .build()
            .unwrap()
    }

    fn posts_schema() -> Schema {
        SchemaBuilder::new("posts")
            .unwrap()
            .column("id", DataType::Int)
            .unwrap()
            .column("author", DataType::Int)
            .unwrap()
            .column("title", DataType::String)
            .unwrap()
            .primary_key(&["id"])
            .order_by("title", Order::Asc)
            .build()
            .unwrap()
    }

    fn user(id: i64, name: &str) -> Row {
        Row::new(vec![Value::Int(id), name.into()])
    }

    fn post(id: i64, author: i64, title: &str) -> Row {
        Row::new(vec![Value::Int(id), Value::Int(author), title.into()])
    }

    #[derive(Default)]
    struct Log {
        entries: RefCell<Vec<String>>,
    }
    impl Output for Log {
        fn push(&self, change: Change) -> Result<()> {
            let mut label = change.kind().to_string();
            if let Change::Child { child, .. } = &change {
                label.push(':');
                label.push_str(&child.relationship);
                label.push(':');
                label.push_str(child.change.kind());
            }
            self.entries.borrow_mut().push(label);
            Ok(())
        }
    }

    fn graph(
        users: Vec<Row>,
        posts: Vec<Row>,
    ) -> (Rc<MemorySource>, Rc<MemorySource>, Rc<ParentJoin>, Rc<Log>) {
        let parent = MemorySource::with_rows(users_schema(), users);
        let child = MemorySource::with_rows(posts_schema(), posts);
        let join = ParentJoin::new(
            parent.clone() as Rc<dyn Operator>,
            child.clone() as Rc<dyn Operator>,
            &["id"],
            &["author"],
            "posts",
            false,
        )
        .unwrap();
        join.connect();
        let log = Rc::new(Log::default());
        join.set_output(log.clone());
        (parent, child, join, log)
    }

    #[test]
    fn test_fetch_attaches_children() {
        let (_, _, join, _) = graph(
            vec![user(1, "ann"), user(2, "bob")],
            vec![post(10, 1, "a"), post(11, 1, "b"), post(12, 2, "c")],
        );
        let nodes: Vec<Node> = join
            .fetch(FetchRequest::all())
            .map(|n| n.unwrap())
            .collect();
        assert_eq!(nodes.len(), 2);

        let rel = nodes[0].relationship("posts").unwrap();
        let titles: Vec<String> = rel
            .stream()
            .map(|n| n.unwrap().row().get(2).unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["a", "b"]);

        // Accessors are re-callable.
        assert_eq!(rel.stream().count(), 2);
    }

    #[test]
    fn test_parent_without_children_still_emitted() {
        let (_, _, join, _) = graph(vec![user(1, "ann")], vec![]);
        let nodes: Vec<Node> = join
            .fetch(FetchRequest::all())
            .map(|n| n.unwrap())
            .collect();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].relationship("posts").unwrap().stream().count(), 0);
    }

    #[test]
    fn test_parent_push_retargeted() {
        let (parent, _, _join, log) = graph(vec![], vec![post(10, 1, "a")]);
        parent.insert(user(1, "ann")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["add"]);
    }

    #[test]
    fn test_child_push_nested_under_parent() {
        let (_, child, _join, log) = graph(vec![user(1, "ann")], vec![]);
        child.insert(post(10, 1, "a")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["child:posts:add"]);
    }

    #[test]
    fn test_child_push_without_parent_absorbed() {
        let (_, child, _join, log) = graph(vec![user(1, "ann")], vec![]);
        child.insert(post(10, 9, "a")).unwrap();
        assert!(log.entries.borrow().is_empty());
    }

    #[test]
    fn test_child_edit_moves_between_parents() {
        let (_, child, _join, log) = graph(
            vec![user(1, "ann"), user(2, "bob")],
            vec![post(10, 1, "a")],
        );
        child.update(post(10, 1, "a"), post(10, 2, "a")).unwrap();
        assert_eq!(
            *log.entries.borrow(),
            vec!["child:posts:remove", "child:posts:add"]
        );
    }

    #[test]
    fn test_hidden_relationship_not_exposed() {
        let parent = MemorySource::with_rows(users_schema(), vec![user(1, "ann")]);
        let child = MemorySource::with_rows(posts_schema(), vec![post(10, 1, "a")]);
        let join = ParentJoin::new(
            parent.clone() as Rc<dyn Operator>,
            child.clone() as Rc<dyn Operator>,
            &["id"],
            &["author"],
            "posts",
            true,
        )
        .unwrap();
        join.connect();
        let log = Rc::new(Log::default());
        join.set_output(log.clone());

        assert!(join.schema().relationship("posts").is_none());
        let nodes: Vec<Node> = join
            .clone()
            .fetch(FetchRequest::all())
            .map(|n| n.unwrap())
            .collect();
        assert!(nodes[0].relationship("posts").is_none());

        child.insert(post(11, 1, "b")).unwrap();
        assert!(log.entries.borrow().is_empty());
    }

    #[test]
    fn test_cleanup_materializes_children() {
        let (_, _, join, _) = graph(
            vec![user(1, "ann")],
            vec![post(10, 1, "a"), post(11, 1, "b")],
        );
        let nodes: Vec<Node> = join
            .cleanup(FetchRequest::all())
            .map(|n| n.unwrap())
            .collect();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].relationship("posts").unwrap().stream().count(), 2);
    }
}
