//! Row-predicate filter operator.
//!
//! Stateless: membership is decided per row. The interesting part is the
//! push matrix for edits, where a row may cross the predicate boundary in
//! either direction and the forwarded change kind shifts accordingly.

use crate::change::Change;
use crate::error::Result;
use crate::node::Node;
use crate::operator::{FetchRequest, NodeStream, Operator, Output, OutputSlot};
use eddy_core::{Row, Schema};
use std::rc::Rc;
use tracing::trace;

/// Predicate filter over an upstream operator.
pub struct Filter {
    input: Rc<dyn Operator>,
    schema: Rc<Schema>,
    predicate: Box<dyn Fn(&Row) -> bool>,
    output: OutputSlot,
}

impl Filter {
    /// Creates a filter with the given row predicate.
    pub fn new(input: Rc<dyn Operator>, predicate: impl Fn(&Row) -> bool + 'static) -> Rc<Self> {
        let schema = input.schema();
        Rc::new(Self {
            input,
            schema,
            predicate: Box::new(predicate),
            output: OutputSlot::new(),
        })
    }

    fn passes(&self, row: &Row) -> bool {
        (self.predicate)(row)
    }
}

impl Output for Filter {
    fn push(&self, change: Change) -> Result<()> {
        trace!(table = %self.schema.table_name(), kind = change.kind(), "filter push");
        let forward = match change {
            Change::Add(node) => self.passes(node.row()).then_some(Change::Add(node)),
            Change::Remove(node) => self.passes(node.row()).then_some(Change::Remove(node)),
            Change::Edit { old, new } => {
                match (self.passes(old.row()), self.passes(new.row())) {
                    (true, true) => Some(Change::Edit { old, new }),
                    (true, false) => Some(Change::Remove(old)),
                    (false, true) => Some(Change::Add(new)),
                    (false, false) => None,
                }
            }
            Change::Child { node, child } => {
                self.passes(node.row()).then_some(Change::Child { node, child })
            }
        };
        match forward {
            Some(change) => self.output.forward("filter", change),
            None => Ok(()),
        }
    }
}

impl Operator for Filter {
    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn set_output(&self, output: Rc<dyn Output>) {
        self.output.set(output);
    }

    fn fetch(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        let upstream = Rc::clone(&self.input).fetch(request);
        Box::new(FilterStream { op: self, upstream })
    }

    fn cleanup(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        let upstream = Rc::clone(&self.input).cleanup(request);
        Box::new(FilterStream { op: self, upstream })
    }

    fn destroy(&self) {
        self.output.clear();
        self.input.destroy();
    }
}

struct FilterStream {
    op: Rc<Filter>,
    upstream: NodeStream,
}

impl Iterator for FilterStream {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.upstream.next()? {
                Ok(node) if self.op.passes(node.row()) => return Some(Ok(node)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use eddy_core::{DataType, SchemaBuilder, Value};

    fn schema() -> Schema {
        SchemaBuilder::new("scores")
            .unwrap()
            .column("id", DataType::Int)
            .unwrap()
            .column("score", DataType::Int)
            .unwrap()
            .primary_key(&["id"])
            .build()
            .unwrap()
    }

    fn row(id: i64, score: i64) -> Row {
        Row::new(vec![Value::Int(id), Value::Int(score)])
    }

    fn passing(rows: Vec<Row>) -> Rc<Filter> {
        let source = MemorySource::with_rows(schema(), rows);
        let filter = Filter::new(source.clone() as Rc<dyn Operator>, |r| {
            r.get(1).and_then(|v| v.as_int()).map(|s| s >= 50).unwrap_or(false)
        });
        source.set_output(filter.clone());
        filter
    }

    /// Captures forwarded changes for assertions.
    #[derive(Default)]
    struct Log {
        kinds: std::cell::RefCell<Vec<&'static str>>,
    }
    impl Output for Log {
        fn push(&self, change: Change) -> Result<()> {
            self.kinds.borrow_mut().push(change.kind());
            Ok(())
        }
    }

    #[test]
    fn test_fetch_filters() {
        let filter = passing(vec![row(1, 10), row(2, 60), row(3, 80)]);
        let ids: Vec<i64> = filter
            .fetch(FetchRequest::all())
            .map(|n| n.unwrap().row().get(0).unwrap().as_int().unwrap())
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_push_matrix() {
        let filter = passing(vec![]);
        let log = Rc::new(Log::default());
        filter.set_output(log.clone());

        // add below threshold absorbed, above forwarded
        filter.push(Change::add(Node::leaf(row(1, 10)))).unwrap();
        filter.push(Change::add(Node::leaf(row(2, 90)))).unwrap();

        // edit crossing up -> add; crossing down -> remove; staying -> edit
        filter
            .push(Change::edit(Node::leaf(row(1, 10)), Node::leaf(row(1, 70))))
            .unwrap();
        filter
            .push(Change::edit(Node::leaf(row(2, 90)), Node::leaf(row(2, 20))))
            .unwrap();
        filter
            .push(Change::edit(Node::leaf(row(1, 70)), Node::leaf(row(1, 75))))
            .unwrap();
        // both below -> absorbed
        filter
            .push(Change::edit(Node::leaf(row(2, 20)), Node::leaf(row(2, 30))))
            .unwrap();

        assert_eq!(
            *log.kinds.borrow(),
            vec!["add", "add", "remove", "edit"]
        );
    }

    #[test]
    fn test_child_gated_by_predicate() {
        let filter = passing(vec![]);
        let log = Rc::new(Log::default());
        filter.set_output(log.clone());

        let inner = Change::add(Node::leaf(row(9, 0)));
        filter
            .push(Change::child(Node::leaf(row(1, 80)), "kids", inner.clone()))
            .unwrap();
        filter
            .push(Change::child(Node::leaf(row(2, 10)), "kids", inner))
            .unwrap();
        assert_eq!(*log.kinds.borrow(), vec!["child"]);
    }
}
