//! In-memory base table: the graph's root.
//!
//! A `MemorySource` keeps its rows sorted by the schema comparator. Writers
//! deliver mutations through `push`, which applies the change to the data
//! first and then forwards it downstream. Fetch streams are re-seek
//! cursors over the live ordered data: the cursor remembers the last row it
//! yielded and looks up its successor on every pull, so a mutation landing
//! in the unscanned region becomes visible to an in-flight stream exactly
//! once, and already-yielded output is never invalidated.

use crate::change::Change;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::operator::{FetchRequest, NodeStream, Operator, Output, OutputSlot};
use eddy_core::{Row, Schema};
use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::rc::Rc;
use tracing::{debug, trace};

/// Sorted in-memory table of rows.
pub struct MemorySource {
    schema: Rc<Schema>,
    rows: RefCell<Vec<Row>>,
    output: OutputSlot,
}

impl MemorySource {
    /// Creates an empty source.
    pub fn new(schema: Schema) -> Rc<Self> {
        Self::with_rows(schema, Vec::new())
    }

    /// Creates a source seeded with rows. Rows are sorted on entry.
    pub fn with_rows(schema: Schema, mut rows: Vec<Row>) -> Rc<Self> {
        let schema = Rc::new(schema);
        rows.sort_by(|a, b| schema.compare_rows(a, b));
        Rc::new(Self {
            schema,
            rows: RefCell::new(rows),
            output: OutputSlot::new(),
        })
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.borrow().len()
    }

    /// Returns true when the source holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.borrow().is_empty()
    }

    /// Writer convenience: push an add for `row`.
    pub fn insert(&self, row: Row) -> Result<()> {
        self.push(Change::add(Node::leaf(row)))
    }

    /// Writer convenience: push a remove for `row`.
    pub fn delete(&self, row: Row) -> Result<()> {
        self.push(Change::remove(Node::leaf(row)))
    }

    /// Writer convenience: push an edit from `old` to `new`.
    pub fn update(&self, old: Row, new: Row) -> Result<()> {
        self.push(Change::edit(Node::leaf(old), Node::leaf(new)))
    }

    /// Position of the first row sorting at-or-after `row`.
    fn lower_bound(rows: &[Row], schema: &Schema, row: &Row) -> usize {
        rows.partition_point(|r| schema.compare_rows(r, row) == CmpOrdering::Less)
    }

    /// A persisted row must be addressable by its primary key.
    fn check_primary_key(&self, row: &Row) -> Result<()> {
        if self.schema.primary_key_values(row).iter().all(|v| v.is_null()) {
            return Err(Error::Schema(eddy_core::Error::invalid_schema(
                "primary key must not be all null",
            )));
        }
        Ok(())
    }

    fn find_by_pk(rows: &[Row], schema: &Schema, row: &Row) -> Option<usize> {
        rows.iter().position(|r| schema.same_primary_key(r, row))
    }

    /// Applies the change to the sorted row set. Returns false when the
    /// change had no effect and should be absorbed.
    fn apply(&self, change: &Change) -> Result<bool> {
        let mut rows = self.rows.borrow_mut();
        match change {
            Change::Add(node) => {
                let row = node.row();
                self.check_primary_key(row)?;
                if let Some(i) = Self::find_by_pk(&rows, &self.schema, row) {
                    // Replaying a row that is already present: keep the
                    // latest content at its sorted position.
                    rows.remove(i);
                }
                let at = Self::lower_bound(&rows, &self.schema, row);
                rows.insert(at, row.clone());
                Ok(true)
            }
            Change::Remove(node) => {
                match Self::find_by_pk(&rows, &self.schema, node.row()) {
                    Some(i) => {
                        rows.remove(i);
                        Ok(true)
                    }
                    None => {
                        debug!(table = %self.schema.table_name(), "remove of absent row absorbed");
                        Ok(false)
                    }
                }
            }
            Change::Edit { old, new } => {
                self.check_primary_key(new.row())?;
                if !self.schema.same_primary_key(old.row(), new.row()) {
                    return Err(Error::rekeyed_edit(self.schema.table_name()));
                }
                if let Some(i) = Self::find_by_pk(&rows, &self.schema, old.row()) {
                    rows.remove(i);
                }
                let at = Self::lower_bound(&rows, &self.schema, new.row());
                rows.insert(at, new.row().clone());
                Ok(true)
            }
            Change::Child { .. } => Err(Error::UnsupportedChange {
                operator: self.schema.table_name().into(),
                kind: change.kind(),
            }),
        }
    }
}

impl Output for MemorySource {
    fn push(&self, change: Change) -> Result<()> {
        trace!(table = %self.schema.table_name(), kind = change.kind(), "source push");
        if !self.apply(&change)? {
            return Ok(());
        }
        self.output.forward(self.schema.table_name(), change)
    }
}

impl Operator for MemorySource {
    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn set_output(&self, output: Rc<dyn Output>) {
        self.output.set(output);
    }

    fn fetch(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        Box::new(SourceStream {
            source: self,
            request,
            last: None,
            done: false,
        })
    }

    fn cleanup(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        // The source holds no derived state, so cleanup is a plain scan.
        self.fetch(request)
    }

    fn destroy(&self) {
        self.output.clear();
        self.rows.borrow_mut().clear();
    }
}

/// Re-seek cursor over the live sorted rows.
struct SourceStream {
    source: Rc<MemorySource>,
    request: FetchRequest,
    last: Option<Row>,
    done: bool,
}

impl Iterator for SourceStream {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let schema = &self.source.schema;
        let rows = self.source.rows.borrow();

        let found = if self.request.reverse {
            // Scan down from just below the previous position.
            let end = match &self.last {
                Some(last) => MemorySource::lower_bound(&rows, schema, last),
                None => rows.len(),
            };
            rows[..end]
                .iter()
                .rev()
                .find(|r| self.request.matches(schema, r))
        } else {
            // Scan up from just above the previous position.
            let start = match &self.last {
                Some(last) => rows.partition_point(|r| {
                    schema.compare_rows(r, last) != CmpOrdering::Greater
                }),
                None => 0,
            };
            rows[start..]
                .iter()
                .find(|r| self.request.matches(schema, r))
        };

        match found {
            Some(row) => {
                let row = row.clone();
                drop(rows);
                self.last = Some(row.clone());
                Some(Ok(Node::leaf(row)))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
