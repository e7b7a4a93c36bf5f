//! Windowed limit operator.
//!
//! Caps the result at the first `n` rows of the upstream order. Pushes are
//! maintained by a bounded upstream re-fetch of `n + 1` rows: enough to
//! decide window membership and to name the row evicted from or admitted
//! into the window. Changes entirely below the window are absorbed.

use crate::change::Change;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::operator::{FetchRequest, NodeStream, Operator, Output, OutputSlot};
use eddy_core::{Row, Schema};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// First-n window over an upstream operator.
pub struct Limit {
    input: Rc<dyn Operator>,
    schema: Rc<Schema>,
    limit: usize,
    output: OutputSlot,
}

impl fmt::Debug for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limit")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl Limit {
    /// Creates a limit operator with a positive row budget.
    pub fn new(input: Rc<dyn Operator>, limit: usize) -> Result<Rc<Self>> {
        if limit == 0 {
            return Err(Error::ZeroLimit);
        }
        let schema = input.schema();
        Ok(Rc::new(Self {
            input,
            schema,
            limit,
            output: OutputSlot::new(),
        }))
    }

    /// Fetches the first `limit + 1` upstream rows (post-change state).
    fn window_plus_one(&self) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(self.limit + 1);
        let mut stream = Rc::clone(&self.input).fetch(FetchRequest::all());
        while rows.len() <= self.limit {
            match stream.next() {
                Some(Ok(node)) => rows.push(node.into_row()),
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        Ok(rows)
    }

    fn before(&self, a: &Row, b: &Row) -> bool {
        self.schema.compare_rows(a, b) == CmpOrdering::Less
    }

    fn position_by_pk(&self, rows: &[Row], row: &Row) -> Option<usize> {
        rows.iter()
            .position(|r| self.schema.same_primary_key(r, row))
    }

    /// Computes the forwarded changes for one push against the post-change
    /// upstream window.
    fn apply_push(&self, change: Change) -> Result<Vec<Change>> {
        let w = self.window_plus_one()?;
        let limit = self.limit;
        Ok(match change {
            Change::Add(node) => {
                match self.position_by_pk(&w, node.row()) {
                    Some(pos) if pos < limit => {
                        let mut out = vec![Change::Add(node)];
                        if w.len() == limit + 1 {
                            out.push(Change::remove(Node::leaf(w[limit].clone())));
                        }
                        out
                    }
                    _ => Vec::new(),
                }
            }
            Change::Remove(node) => {
                let ahead = w.iter().filter(|r| self.before(r, node.row())).count();
                if ahead < limit {
                    let mut out = vec![Change::Remove(node)];
                    if w.len() >= limit {
                        out.push(Change::add(Node::leaf(w[limit - 1].clone())));
                    }
                    out
                } else {
                    Vec::new()
                }
            }
            Change::Edit { old, new } => {
                // v: the post-change window rows without the edited row.
                let v: Vec<&Row> = w
                    .iter()
                    .filter(|r| !self.schema.same_primary_key(r, new.row()))
                    .collect();
                let new_in = self
                    .position_by_pk(&w, new.row())
                    .map(|p| p < limit)
                    .unwrap_or(false);
                let old_in = v.iter().filter(|r| self.before(r, old.row())).count() < limit;
                match (old_in, new_in) {
                    (true, true) => vec![Change::Edit { old, new }],
                    (true, false) => {
                        let mut out = vec![Change::Remove(old)];
                        if let Some(admitted) = v.get(limit - 1) {
                            out.push(Change::add(Node::leaf((*admitted).clone())));
                        }
                        out
                    }
                    (false, true) => {
                        let mut out = Vec::with_capacity(2);
                        if let Some(evicted) = v.get(limit - 1) {
                            out.push(Change::remove(Node::leaf((*evicted).clone())));
                        }
                        out.push(Change::Add(new));
                        out
                    }
                    (false, false) => Vec::new(),
                }
            }
            Change::Child { node, child } => {
                match self.position_by_pk(&w, node.row()) {
                    Some(pos) if pos < limit => vec![Change::Child { node, child }],
                    _ => Vec::new(),
                }
            }
        })
    }
}

impl Output for Limit {
    fn push(&self, change: Change) -> Result<()> {
        trace!(table = %self.schema.table_name(), kind = change.kind(), "limit push");
        let forwards = self.apply_push(change)?;
        for change in forwards {
            self.output.forward("limit", change)?;
        }
        Ok(())
    }
}

impl Operator for Limit {
    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn set_output(&self, output: Rc<dyn Output>) {
        self.output.set(output);
    }

    fn fetch(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        self.stream(request, false)
    }

    fn cleanup(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        self.stream(request, true)
    }

    fn destroy(&self) {
        self.output.clear();
        self.input.destroy();
    }
}

impl Limit {
    /// The window is defined over the forward order; a reverse request
    /// yields the same window reversed, and a constraint filters it.
    fn stream(self: Rc<Self>, request: FetchRequest, cleanup: bool) -> NodeStream {
        let upstream = if cleanup {
            Rc::clone(&self.input).cleanup(FetchRequest::all())
        } else {
            Rc::clone(&self.input).fetch(FetchRequest::all())
        };
        if request.reverse {
            let mut window = Vec::with_capacity(self.limit);
            let mut failed = None;
            for item in upstream.take(self.limit) {
                match item {
                    Ok(node) => window.push(node),
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }
            window.reverse();
            let op = self;
            Box::new(
                window
                    .into_iter()
                    .filter(move |n| request.matches(&op.schema, n.row()))
                    .map(Ok)
                    .chain(failed.into_iter().map(Err)),
            )
        } else {
            let op = self;
            Box::new(LimitStream {
                op,
                upstream,
                request,
                yielded_upstream: 0,
            })
        }
    }
}

struct LimitStream {
    op: Rc<Limit>,
    upstream: NodeStream,
    request: FetchRequest,
    yielded_upstream: usize,
}

impl Iterator for LimitStream {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.yielded_upstream >= self.op.limit {
                return None;
            }
            match self.upstream.next()? {
                Ok(node) => {
                    self.yielded_upstream += 1;
                    if self.request.matches(&self.op.schema, node.row()) {
                        return Some(Ok(node));
                    }
                }
                Err(e) => {
                    self.yielded_upstream = self.op.limit;
                    return Some(Err(e));
                }
            }
        }
    }
}
