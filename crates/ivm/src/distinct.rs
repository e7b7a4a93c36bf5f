//! Deduplication operator.
//!
//! `Distinct` collapses rows sharing a key (typically the fan-out a
//! one-to-many join introduces), keeping the first-seen row for each key.
//! The first-seen record is persisted in the operator's own store so the
//! decision survives across separate fetch and push calls; a per-scan seen
//! set additionally suppresses duplicates within a single stream.

use crate::change::Change;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::operator::{FetchRequest, NodeStream, Operator, Output, OutputSlot};
use eddy_core::{Row, Schema};
use eddy_storage::{encode_values, MemoryStorage, Storage};
use hashbrown::HashSet;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

/// Typed capability over the raw store: encoded key -> first-seen row.
pub struct DistinctStore {
    inner: Box<dyn Storage<Row>>,
}

impl DistinctStore {
    fn new() -> Self {
        Self {
            inner: Box::new(MemoryStorage::new()),
        }
    }

    fn get(&self, key: &str) -> Option<&Row> {
        self.inner.get(key)
    }

    fn insert(&mut self, key: String, row: Row) {
        self.inner.set(key, row);
    }

    fn remove(&mut self, key: &str) -> Option<Row> {
        self.inner.del(key)
    }

    fn clear(&mut self) {
        self.inner.clear();
    }
}

/// First-seen deduplication over a configured key column set.
pub struct Distinct {
    input: Rc<dyn Operator>,
    schema: Rc<Schema>,
    key_columns: Vec<usize>,
    store: RefCell<DistinctStore>,
    output: OutputSlot,
}

impl fmt::Debug for Distinct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distinct")
            .field("key_columns", &self.key_columns)
            .finish_non_exhaustive()
    }
}

impl Distinct {
    /// Creates a dedup operator keyed by `key_columns` of the input schema.
    pub fn new(input: Rc<dyn Operator>, key_columns: &[&str]) -> Result<Rc<Self>> {
        if key_columns.is_empty() {
            return Err(Error::EmptyDistinctKey);
        }
        let schema = input.schema();
        let resolved = schema.column_indices(key_columns)?;
        Ok(Rc::new(Self {
            input,
            schema,
            key_columns: resolved,
            store: RefCell::new(DistinctStore::new()),
            output: OutputSlot::new(),
        }))
    }

    fn key(&self, row: &Row) -> String {
        encode_values(&row.project(&self.key_columns))
    }

    /// Computes the changes to forward for one incoming push, updating the
    /// persisted state. Returns 0, 1, or 2 changes.
    fn apply_push(&self, change: Change) -> Vec<Change> {
        let mut store = self.store.borrow_mut();
        match change {
            Change::Add(node) => {
                let key = self.key(node.row());
                if store.get(&key).is_some() {
                    trace!(key = %key, "duplicate add absorbed");
                    Vec::new()
                } else {
                    store.insert(key, node.row().clone());
                    vec![Change::Add(node)]
                }
            }
            Change::Remove(node) => {
                let key = self.key(node.row());
                if store.remove(&key).is_some() {
                    vec![Change::Remove(node)]
                } else {
                    trace!(key = %key, "remove of untracked key absorbed");
                    Vec::new()
                }
            }
            Change::Edit { old, new } => {
                let old_key = self.key(old.row());
                let new_key = self.key(new.row());
                if old_key == new_key {
                    if store.get(&old_key).is_some() {
                        store.insert(old_key, new.row().clone());
                        vec![Change::Edit { old, new }]
                    } else {
                        // An untracked row surfacing through an edit is new
                        // to every consumer downstream.
                        store.insert(new_key, new.row().clone());
                        vec![Change::Add(new)]
                    }
                } else {
                    debug!(old = %old_key, new = %new_key, "edit re-keys; splitting");
                    let mut out = Vec::with_capacity(2);
                    if store.remove(&old_key).is_some() {
                        out.push(Change::Remove(old));
                    }
                    if store.get(&new_key).is_none() {
                        store.insert(new_key, new.row().clone());
                        out.push(Change::Add(new));
                    }
                    out
                }
            }
            Change::Child { node, child } => {
                let key = self.key(node.row());
                if store.get(&key).is_some() {
                    vec![Change::Child { node, child }]
                } else {
                    trace!(key = %key, "child change under losing row dropped");
                    Vec::new()
                }
            }
        }
    }
}

impl Output for Distinct {
    fn push(&self, change: Change) -> Result<()> {
        trace!(table = %self.schema.table_name(), kind = change.kind(), "distinct push");
        let forwards = self.apply_push(change);
        for change in forwards {
            self.output.forward("distinct", change)?;
        }
        Ok(())
    }
}

impl Operator for Distinct {
    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn set_output(&self, output: Rc<dyn Output>) {
        self.output.set(output);
    }

    fn fetch(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        let upstream = Rc::clone(&self.input).fetch(request);
        Box::new(DistinctStream {
            op: self,
            upstream,
            seen: HashSet::new(),
            persist: true,
            done: false,
        })
    }

    fn cleanup(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        // Discard persisted state up front; the returned snapshot is
        // deduplicated with the per-scan set only.
        self.store.borrow_mut().clear();
        let upstream = Rc::clone(&self.input).cleanup(request);
        Box::new(DistinctStream {
            op: self,
            upstream,
            seen: HashSet::new(),
            persist: false,
            done: false,
        })
    }

    fn destroy(&self) {
        self.store.borrow_mut().clear();
        self.output.clear();
        self.input.destroy();
    }
}

struct DistinctStream {
    op: Rc<Distinct>,
    upstream: NodeStream,
    seen: HashSet<String>,
    persist: bool,
    done: bool,
}

impl Iterator for DistinctStream {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let node = match self.upstream.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(node)) => node,
            };

            let key = self.op.key(node.row());
            // Once a key is resolved in this scan, later copies are
            // suppressed unconditionally.
            if self.seen.contains(&key) {
                continue;
            }
            if !self.persist {
                self.seen.insert(key);
                return Some(Ok(node));
            }

            let mut store = self.op.store.borrow_mut();
            match store.get(&key) {
                None => {
                    store.insert(key.clone(), node.row().clone());
                    drop(store);
                    self.seen.insert(key);
                    return Some(Ok(node));
                }
                Some(persisted) => {
                    if persisted == node.row() {
                        drop(store);
                        self.seen.insert(key);
                        return Some(Ok(node));
                    }
                    // A copy that disagrees with the persisted winner is
                    // skipped without resolving the key: the winning row
                    // still yields at its own position, whichever scan
                    // direction reaches it.
                    debug!(key = %key, "row disagrees with persisted winner; skipped");
                    continue;
                }
            }
        }
    }
}
