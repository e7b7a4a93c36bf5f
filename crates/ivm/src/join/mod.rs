//! Correlated join family.
//!
//! Two orientations over the same correlation config:
//!
//! - [`ParentJoin`] drives from the parent side: every parent row is
//!   emitted, children hang off it as a lazy constrained re-fetch.
//! - [`ChildJoin`] drives from the child side: a sort-merge across one
//!   constrained child stream per parent row, emitting child rows with
//!   their matching parent set attached. A child row with no matching
//!   parent is invisible, which is what makes this side stateful.
//!
//! Both sides receive pushes; the adapters below give each upstream its own
//! `Output` endpoint so a single join can tell them apart.

mod child;
mod parent;

pub use child::ChildJoin;
pub use parent::ParentJoin;

use crate::change::Change;
use crate::error::{Error, Result};
use crate::operator::{Constraint, Operator, Output};
use eddy_core::{Row, Schema, Value};
use eddy_storage::{encode_values, MemoryStorage, Storage};
use std::rc::{Rc, Weak};

/// Which upstream a push came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Parent,
    Child,
}

/// Implemented by join operators that accept pushes from both sides.
pub(crate) trait SidedPush {
    fn push_from(&self, side: Side, change: Change) -> Result<()>;
}

/// Per-side `Output` endpoint registered on an upstream operator.
///
/// Holds the join weakly: the upstream -> endpoint -> join chain must not
/// keep the join alive once the graph drops it.
pub(crate) struct SideInput<J: SidedPush> {
    join: Weak<J>,
    side: Side,
}

impl<J: SidedPush> Output for SideInput<J> {
    fn push(&self, change: Change) -> Result<()> {
        match self.join.upgrade() {
            Some(join) => join.push_from(self.side, change),
            None => Err(Error::no_output("join")),
        }
    }
}

/// Registers a join's side endpoints on its upstream operators.
pub(crate) fn wire_sides<J: SidedPush + 'static>(
    join: &Rc<J>,
    parent: &Rc<dyn Operator>,
    child: &Rc<dyn Operator>,
) {
    parent.set_output(Rc::new(SideInput {
        join: Rc::downgrade(join),
        side: Side::Parent,
    }));
    child.set_output(Rc::new(SideInput {
        join: Rc::downgrade(join),
        side: Side::Child,
    }));
}

/// Resolved correlation key lists, positionally paired.
#[derive(Clone, Debug)]
pub(crate) struct JoinKeys {
    parent_cols: Vec<usize>,
    parent_names: Vec<String>,
    child_cols: Vec<usize>,
    child_names: Vec<String>,
}

impl JoinKeys {
    pub(crate) fn resolve(
        parent: &Schema,
        child: &Schema,
        parent_key: &[&str],
        child_key: &[&str],
    ) -> Result<Self> {
        if parent_key.len() != child_key.len() {
            return Err(Error::CorrelationKeyLengths {
                parent: parent_key.len(),
                child: child_key.len(),
            });
        }
        Ok(Self {
            parent_cols: parent.column_indices(parent_key)?,
            parent_names: parent_key.iter().map(|s| s.to_string()).collect(),
            child_cols: child.column_indices(child_key)?,
            child_names: child_key.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Correlation values of a parent row.
    pub(crate) fn parent_values(&self, row: &Row) -> Vec<Value> {
        row.project(&self.parent_cols)
    }

    /// Correlation values of a child row.
    pub(crate) fn child_values(&self, row: &Row) -> Vec<Value> {
        row.project(&self.child_cols)
    }

    /// Constraint selecting child rows with the given correlation values.
    pub(crate) fn child_constraint(&self, key: &[Value]) -> Constraint {
        let mut c = Constraint::new();
        for (name, value) in self.child_names.iter().zip(key) {
            c = c.with(name.clone(), value.clone());
        }
        c
    }

    /// Constraint selecting parent rows with the given correlation values.
    pub(crate) fn parent_constraint(&self, key: &[Value]) -> Constraint {
        let mut c = Constraint::new();
        for (name, value) in self.parent_names.iter().zip(key) {
            c = c.with(name.clone(), value.clone());
        }
        c
    }

    /// Translates a request constraint on child correlation columns into
    /// the parent-side constraint that bounds parent materialization.
    pub(crate) fn parent_constraint_from_request(
        &self,
        constraint: Option<&Constraint>,
    ) -> Option<Constraint> {
        let constraint = constraint?;
        let mut out = Constraint::new();
        for (i, child_name) in self.child_names.iter().enumerate() {
            if let Some(value) = constraint.value_for(child_name) {
                out = out.with(self.parent_names[i].clone(), value.clone());
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

/// Typed capability over the raw store: the set of
/// (correlation key, primary key) tuples the join has made visible.
///
/// The composite key layout keeps every tuple for one correlation key
/// under a common prefix, so membership counting is a prefix scan.
pub(crate) struct CorrelationStore {
    inner: Box<dyn Storage<()>>,
}

impl CorrelationStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: Box::new(MemoryStorage::new()),
        }
    }

    fn tuple_key(key: &[Value], pk: &[Value]) -> String {
        let mut s = encode_values(key);
        s.push_str(&encode_values(pk));
        s
    }

    /// Records a tuple. Returns false when it was already present.
    pub(crate) fn insert(&mut self, key: &[Value], pk: &[Value]) -> bool {
        let k = Self::tuple_key(key, pk);
        if self.inner.get(&k).is_some() {
            false
        } else {
            self.inner.set(k, ());
            true
        }
    }

    /// Removes a tuple. Returns false when it was not present.
    pub(crate) fn remove(&mut self, key: &[Value], pk: &[Value]) -> bool {
        self.inner.del(&Self::tuple_key(key, pk)).is_some()
    }

    pub(crate) fn contains(&self, key: &[Value], pk: &[Value]) -> bool {
        self.inner.get(&Self::tuple_key(key, pk)).is_some()
    }

    /// Number of tuples under one correlation key.
    pub(crate) fn count(&self, key: &[Value]) -> usize {
        self.inner.scan(&encode_values(key)).count()
    }

    /// Drops every tuple under one correlation key.
    pub(crate) fn retire(&mut self, key: &[Value]) {
        let prefix = encode_values(key);
        let stale: Vec<String> = self
            .inner
            .scan(&prefix)
            .map(|(k, _)| k.to_string())
            .collect();
        for k in stale {
            self.inner.del(&k);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.inner.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
