//! The operator contract.
//!
//! Operators form a single-threaded pull/push graph: a terminal consumer
//! pulls ordered nodes through `fetch`, while sources deliver row mutations
//! downstream through `push`. The two are not synchronized by a scheduler:
//! a push may arrive while a fetch stream is still being drained, which is
//! why streams re-borrow their operator on every `next` call instead of
//! holding a borrow across yields.

use crate::change::Change;
use crate::error::{Error, Result};
use crate::node::Node;
use eddy_core::{Row, Schema, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A lazy, restartable, terminating sequence of result nodes.
///
/// Per-call state lives in the stream object; dropping a stream releases
/// whatever per-call resources it holds.
pub type NodeStream = Box<dyn Iterator<Item = Result<Node>>>;

/// Column-equality constraint carried by a fetch request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Constraint {
    entries: Vec<(String, Value)>,
}

impl Constraint {
    /// Creates an empty constraint (matches every row).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column-equality entry.
    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.entries.push((column.into(), value));
        self
    }

    /// Returns the constraint entries.
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Returns true when no entries are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the constrained value for a column, if any.
    pub fn value_for(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    /// Returns true when `row` satisfies every entry under `schema`.
    ///
    /// An entry naming a column the schema does not have never matches.
    pub fn matches(&self, schema: &Schema, row: &Row) -> bool {
        self.entries.iter().all(|(column, value)| {
            schema
                .column_index(column)
                .and_then(|i| row.get(i))
                .map(|v| v == value)
                .unwrap_or(false)
        })
    }

    /// Merges another constraint's entries into this one.
    pub fn merge(mut self, other: &Constraint) -> Self {
        self.entries.extend(other.entries.iter().cloned());
        self
    }
}

/// A fetch/cleanup request: optional equality constraint plus direction.
#[derive(Clone, Debug, Default)]
pub struct FetchRequest {
    /// Optional column-equality filter.
    pub constraint: Option<Constraint>,
    /// Reverse the schema ordering when set.
    pub reverse: bool,
}

impl FetchRequest {
    /// An unconstrained forward request.
    pub fn all() -> Self {
        Self::default()
    }

    /// An unconstrained reverse request.
    pub fn reversed() -> Self {
        Self {
            constraint: None,
            reverse: true,
        }
    }

    /// A constrained forward request.
    pub fn constrained(constraint: Constraint) -> Self {
        Self {
            constraint: Some(constraint),
            reverse: false,
        }
    }

    /// Returns true when `row` satisfies the request's constraint.
    pub fn matches(&self, schema: &Schema, row: &Row) -> bool {
        match &self.constraint {
            Some(c) => c.matches(schema, row),
            None => true,
        }
    }
}

/// Downstream receiver of changes.
///
/// Operators implement this to receive pushes from their upstream; a
/// terminal consumer implements it alone.
pub trait Output {
    /// Delivers one change. Must update state before forwarding onward.
    fn push(&self, change: Change) -> Result<()>;
}

impl fmt::Debug for dyn Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Output")
    }
}

/// The unit of composition in the dataflow graph.
///
/// Every operator is observed by exactly one downstream output, registered
/// at graph-construction time. Handles are `Rc`: the graph is
/// single-threaded by design, and reentrancy is cooperative.
pub trait Operator: Output {
    /// Returns the operator's output schema. Stable for its lifetime.
    fn schema(&self) -> Rc<Schema>;

    /// Registers the downstream receiver, replacing any prior one.
    fn set_output(&self, output: Rc<dyn Output>);

    /// Produces the operator's current result as an ordered lazy stream.
    fn fetch(self: Rc<Self>, request: FetchRequest) -> NodeStream;

    /// Like `fetch`, but discards persisted state for the scanned range.
    fn cleanup(self: Rc<Self>, request: FetchRequest) -> NodeStream;

    /// Releases resources and propagates destruction upstream. Terminal.
    fn destroy(&self);
}

/// Shared output slot used by every operator implementation.
///
/// Cloning the handle out before pushing keeps the slot unborrowed while
/// downstream code runs, so a consumer may re-enter the operator.
#[derive(Default)]
pub(crate) struct OutputSlot {
    slot: RefCell<Option<Rc<dyn Output>>>,
}

impl OutputSlot {
    pub(crate) fn new() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }

    pub(crate) fn set(&self, output: Rc<dyn Output>) {
        *self.slot.borrow_mut() = Some(output);
    }

    pub(crate) fn clear(&self) {
        *self.slot.borrow_mut() = None;
    }

    /// Returns the registered output or the fail-fast contract error.
    pub(crate) fn get(&self, operator: &str) -> Result<Rc<dyn Output>> {
        self.slot
            .borrow()
            .clone()
            .ok_or_else(|| Error::no_output(operator))
    }

    /// Forwards one change to the registered output.
    pub(crate) fn forward(&self, operator: &str, change: Change) -> Result<()> {
        let out = self.get(operator)?;
        out.push(change)
    }
}
