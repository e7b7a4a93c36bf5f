//! Child-driving join orientation: sort-merge with relationship
//! materialization and the reentrancy overlay.
//!
//! Fetch materializes the parent side into an arena, opens one constrained
//! child stream per parent row, and k-way merges them by the child
//! comparator, grouping ties. Each emitted node is a child row with its
//! matching parent set attached through an arena accessor; a child row with
//! zero matching parents is never emitted.
//!
//! While a parent-side push is being processed the operator is in the
//! `Overlaying` state: a single cursor records the triggering effect and
//! the last child position visited. A fetch stream that was opened before
//! the push and is advanced re-entrantly (from inside the push's downstream
//! delivery) adopts the overlay and shows, for each affected row, the
//! post-push version once the cursor has passed it and the pre-push version
//! beyond it, so a reader never observes a half-applied state. After
//! the push completes the stream's remainder converges on the post-push
//! version. An overlay whose mandatory row can no longer be emitted in
//! order fails fast at the end of the stream.

use crate::change::{Change, ChildChange};
use crate::error::{Error, Result};
use crate::node::{Node, NodeArena, Relationship};
use crate::operator::{FetchRequest, NodeStream, Operator, Output, OutputSlot};
use eddy_core::{Row, Schema, Value};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering as CmpOrdering;
use std::rc::Rc;
use tracing::{debug, trace};

use super::{wire_sides, CorrelationStore, JoinKeys, Side, SidedPush};

/// Row-level effect an in-progress parent push will have on the output.
#[derive(Clone, Debug)]
enum OverlayEffect {
    /// First matching parent arrived: affected child rows become visible.
    Reveal { parent: Node },
    /// Last matching parent left: affected child rows disappear.
    Conceal,
    /// Parent membership or content changes under visible child rows.
    Mutate {
        add: Option<Node>,
        remove: Option<Row>,
    },
}

/// The in-progress change cursor: triggering effect plus the last child
/// position the push's internal scan has visited.
#[derive(Clone, Debug)]
struct OverlaySpan {
    generation: u64,
    key: Vec<Value>,
    effect: OverlayEffect,
    cursor: Option<Row>,
}

/// Owned reentrancy state machine.
#[derive(Debug)]
enum Overlay {
    Idle,
    Overlaying(OverlaySpan),
}

/// Sort-merge join emitting child rows with their parent set attached.
pub struct ChildJoin {
    parent: Rc<dyn Operator>,
    child: Rc<dyn Operator>,
    keys: JoinKeys,
    relationship: String,
    hidden: bool,
    schema: Rc<Schema>,
    parent_schema: Rc<Schema>,
    child_schema: Rc<Schema>,
    store: RefCell<CorrelationStore>,
    overlay: RefCell<Overlay>,
    generation: Cell<u64>,
    output: OutputSlot,
}

impl ChildJoin {
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
            Rc::clone(&child_schema)
        } else {
            Rc::new(child_schema.with_relationship(
                relationship.clone(),
                Rc::clone(&parent_schema),
            ))
        };
        Ok(Rc::new(Self {
            parent,
            child,
            keys,
            relationship,
            hidden,
            schema,
            parent_schema,
            child_schema,
            store: RefCell::new(CorrelationStore::new()),
            overlay: RefCell::new(Overlay::Idle),
            generation: Cell::new(0),
            output: OutputSlot::new(),
        }))
    }

    /// Registers this join as the output of both upstream operators.
    pub fn connect(self: &Rc<Self>) {
        wire_sides(self, &self.parent, &self.child);
    }

    fn pk(&self, row: &Row) -> Vec<Value> {
        self.child_schema.primary_key_values(row)
    }

    /// Parents currently matching a correlation key, in parent order.
    fn matching_parents(&self, key: &[Value]) -> Result<Vec<Node>> {
        let constraint = self.keys.parent_constraint(key);
        Rc::clone(&self.parent)
            .fetch(FetchRequest::constrained(constraint))
            .collect()
    }

    fn count_parents(&self, key: &[Value]) -> Result<usize> {
        let constraint = self.keys.parent_constraint(key);
        let mut n = 0;
        for item in Rc::clone(&self.parent).fetch(FetchRequest::constrained(constraint)) {
            item?;
            n += 1;
        }
        Ok(n)
    }

    /// All child rows with the key, in child order.
    fn children_with_key(&self, key: &[Value]) -> Result<Vec<Node>> {
        let constraint = self.keys.child_constraint(key);
        Rc::clone(&self.child)
            .fetch(FetchRequest::constrained(constraint))
            .collect()
    }

    /// Child rows with the key that downstream has been shown.
    fn visible_children(&self, key: &[Value]) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        for node in self.children_with_key(key)? {
            let pk = self.pk(node.row());
            if self.store.borrow().contains(key, &pk) {
                out.push(node);
            }
        }
        Ok(out)
    }

    /// Builds the joined output node for a child row.
    fn joined(&self, node: Node, parents: Vec<Node>) -> Node {
        if self.hidden {
            return node;
        }
        let indices = (0..parents.len()).collect();
        let arena: NodeArena = Rc::new(RefCell::new(parents));
        node.with_relationship(Relationship::arena(
            self.relationship.clone(),
            arena,
            indices,
        ))
    }

    /// Enters the Overlaying state, returning the state to restore on exit
    /// so that a nested push composes instead of clobbering.
    fn begin_overlay(&self, key: Vec<Value>, effect: OverlayEffect) -> Overlay {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        std::mem::replace(
            &mut *self.overlay.borrow_mut(),
            Overlay::Overlaying(OverlaySpan {
                generation,
                key,
                effect,
                cursor: None,
            }),
        )
    }

    fn advance_overlay(&self, row: &Row) {
        if let Overlay::Overlaying(span) = &mut *self.overlay.borrow_mut() {
            span.cursor = Some(row.clone());
        }
    }

    fn end_overlay(&self, previous: Overlay) {
        *self.overlay.borrow_mut() = previous;
    }

    fn push_parent(&self, change: Change) -> Result<()> {
        trace!(kind = change.kind(), "child join: parent push");
        match change {
            Change::Add(parent) => self.parent_added(parent),
            Change::Remove(parent) => self.parent_removed(parent),
            Change::Edit { old, new } => {
                let old_key = self.keys.parent_values(old.row());
                let new_key = self.keys.parent_values(new.row());
                if old_key == new_key {
                    self.parent_mutated(old_key, Some(new), Some(old.into_row()))
                } else {
                    self.parent_removed(old)?;
                    self.parent_added(new)
                }
            }
            Change::Child { node, child } => self.parent_nested(node, child),
        }
    }

    fn parent_added(&self, parent: Node) -> Result<()> {
        let key = self.keys.parent_values(parent.row());
        if self.count_parents(&key)? == 1 {
            // First matching parent: every child row with the key becomes
            // a visible joined node.
            let children = self.children_with_key(&key)?;
            debug!(children = children.len(), "first parent reveals children");
            let prior = self.begin_overlay(
                key.clone(),
                OverlayEffect::Reveal {
                    parent: parent.clone(),
                },
            );
            let result = (|| {
                for child in children {
                    self.advance_overlay(child.row());
                    let pk = self.pk(child.row());
                    self.store.borrow_mut().insert(&key, &pk);
                    let node = self.joined(child, vec![parent.clone()]);
                    self.output.forward("child-join", Change::Add(node))?;
                }
                Ok(())
            })();
            self.end_overlay(prior);
            result
        } else {
            self.parent_mutated(key, Some(parent), None)
        }
    }

    fn parent_removed(&self, parent: Node) -> Result<()> {
        let key = self.keys.parent_values(parent.row());
        if self.count_parents(&key)? == 0 {
            // Last matching parent left: joined nodes for the key retire.
            let children = self.visible_children(&key)?;
            debug!(children = children.len(), "last parent conceals children");
            let prior = self.begin_overlay(key.clone(), OverlayEffect::Conceal);
            let result = (|| {
                for child in children {
                    self.advance_overlay(child.row());
                    let pk = self.pk(child.row());
                    self.store.borrow_mut().remove(&key, &pk);
                    let node = self.joined(child, vec![parent.clone()]);
                    self.output.forward("child-join", Change::Remove(node))?;
                }
                Ok(())
            })();
            self.store.borrow_mut().retire(&key);
            self.end_overlay(prior);
            result
        } else {
            self.parent_mutated(key, None, Some(parent.into_row()))
        }
    }

    /// A parent joined, left, or changed under child rows that stay
    /// visible: nested relationship changes, one per visible child.
    fn parent_mutated(
        &self,
        key: Vec<Value>,
        add: Option<Node>,
        remove: Option<Row>,
    ) -> Result<()> {
        if self.hidden || (add.is_none() && remove.is_none()) {
            return Ok(());
        }
        let children = self.visible_children(&key)?;
        if children.is_empty() {
            return Ok(());
        }
        let parents = self.matching_parents(&key)?;
        let prior = self.begin_overlay(
            key.clone(),
            OverlayEffect::Mutate {
                add: add.clone(),
                remove: remove.clone(),
            },
        );
        let result = (|| {
            for child in children {
                self.advance_overlay(child.row());
                let inner = match (&add, &remove) {
                    (Some(a), Some(r)) => {
                        Change::Edit {
                            old: Node::leaf(r.clone()),
                            new: a.clone(),
                        }
                    }
                    (Some(a), None) => Change::Add(a.clone()),
                    (None, Some(r)) => Change::Remove(Node::leaf(r.clone())),
                    (None, None) => return Ok(()),
                };
                let node = self.joined(child, parents.clone());
                let change = Change::Child {
                    node,
                    child: ChildChange {
                        relationship: self.relationship.clone(),
                        change: Box::new(inner),
                    },
                };
                self.output.forward("child-join", change)?;
            }
            Ok(())
        })();
        self.end_overlay(prior);
        result
    }

    /// A change nested inside a parent's own relationships: recurse it
    /// under every visible child of the parent's correlation key. The
    /// relationship accessors on emitted nodes are live, so no overlay
    /// state is required here.
    fn parent_nested(&self, node: Node, child: ChildChange) -> Result<()> {
        if self.hidden {
            return Ok(());
        }
        let key = self.keys.parent_values(node.row());
        let children = self.visible_children(&key)?;
        if children.is_empty() {
            return Ok(());
        }
        let parents = self.matching_parents(&key)?;
        for c in children {
            let inner = Change::Child {
                node: node.clone(),
                child: ChildChange {
                    relationship: child.relationship.clone(),
                    change: child.change.clone(),
                },
            };
            let change = Change::Child {
                node: self.joined(c, parents.clone()),
                child: ChildChange {
                    relationship: self.relationship.clone(),
                    change: Box::new(inner),
                },
            };
            self.output.forward("child-join", change)?;
        }
        Ok(())
    }

    fn push_child(&self, change: Change) -> Result<()> {
        trace!(kind = change.kind(), "child join: child push");
        match change {
            Change::Add(child) => {
                let key = self.keys.child_values(child.row());
                let parents = self.matching_parents(&key)?;
                if parents.is_empty() {
                    trace!("child add without parents absorbed");
                    return Ok(());
                }
                let pk = self.pk(child.row());
                self.store.borrow_mut().insert(&key, &pk);
                let node = self.joined(child, parents);
                self.output.forward("child-join", Change::Add(node))
            }
            Change::Remove(child) => {
                let key = self.keys.child_values(child.row());
                let pk = self.pk(child.row());
                if !self.store.borrow().contains(&key, &pk) {
                    trace!("child remove of invisible row absorbed");
                    return Ok(());
                }
                self.store.borrow_mut().remove(&key, &pk);
                let parents = self.matching_parents(&key)?;
                let node = self.joined(child, parents);
                self.output.forward("child-join", Change::Remove(node))
            }
            Change::Edit { old, new } => {
                let old_key = self.keys.child_values(old.row());
                let new_key = self.keys.child_values(new.row());
                let old_pk = self.pk(old.row());
                let new_pk = self.pk(new.row());
                if old_key == new_key {
                    let tracked = self.store.borrow().contains(&old_key, &old_pk);
                    if tracked {
                        if old_pk != new_pk {
                            let mut store = self.store.borrow_mut();
                            store.remove(&old_key, &old_pk);
                            store.insert(&new_key, &new_pk);
                        }
                        let parents = self.matching_parents(&old_key)?;
                        let change = Change::Edit {
                            old: self.joined(old, parents.clone()),
                            new: self.joined(new, parents),
                        };
                        self.output.forward("child-join", change)
                    } else {
                        let parents = self.matching_parents(&new_key)?;
                        if parents.is_empty() {
                            return Ok(());
                        }
                        self.store.borrow_mut().insert(&new_key, &new_pk);
                        let node = self.joined(new, parents);
                        self.output.forward("child-join", Change::Add(node))
                    }
                } else {
                    // Correlation re-key: leaves the old group, may enter
                    // the new one. Remove first, then add.
                    if self.store.borrow().contains(&old_key, &old_pk) {
                        self.store.borrow_mut().remove(&old_key, &old_pk);
                        let parents = self.matching_parents(&old_key)?;
                        let node = self.joined(old, parents);
                        self.output.forward("child-join", Change::Remove(node))?;
                    }
                    let parents = self.matching_parents(&new_key)?;
                    if !parents.is_empty() {
                        self.store.borrow_mut().insert(&new_key, &new_pk);
                        let node = self.joined(new, parents);
                        self.output.forward("child-join", Change::Add(node))?;
                    }
                    Ok(())
                }
            }
            Change::Child { node, child } => {
                let key = self.keys.child_values(node.row());
                let pk = self.pk(node.row());
                if !self.store.borrow().contains(&key, &pk) {
                    return Ok(());
                }
                let parents = self.matching_parents(&key)?;
                let change = Change::Child {
                    node: self.joined(node, parents),
                    child,
                };
                self.output.forward("child-join", change)
            }
        }
    }
}

impl SidedPush for ChildJoin {
    fn push_from(&self, side: Side, change: Change) -> Result<()> {
        match side {
            Side::Parent => self.push_parent(change),
            Side::Child => self.push_child(change),
        }
    }
}

impl Output for ChildJoin {
    /// A direct push targets the driving (parent) side.
    fn push(&self, change: Change) -> Result<()> {
        self.push_parent(change)
    }
}

impl Operator for ChildJoin {
    fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.schema)
    }

    fn set_output(&self, output: Rc<dyn Output>) {
        self.output.set(output);
    }

    fn fetch(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        Box::new(ChildJoinStream::new(self, request, false))
    }

    fn cleanup(self: Rc<Self>, request: FetchRequest) -> NodeStream {
        Box::new(ChildJoinStream::new(self, request, true))
    }

    fn destroy(&self) {
        self.output.clear();
        self.store.borrow_mut().clear();
        *self.overlay.borrow_mut() = Overlay::Idle;
        self.parent.destroy();
        self.child.destroy();
    }
}

/// One open child stream plus the arena positions of the parents it serves.
struct MergeCursor {
    stream: NodeStream,
    head: Option<Node>,
    parents: Vec<usize>,
}

/// An overlay this stream has observed, frozen once the push completes.
struct SpanState {
    generation: u64,
    key: Vec<Value>,
    effect: OverlayEffect,
    complete: bool,
    arena_index: Option<usize>,
    /// The stream's emission frontier when the overlay was adopted. Rows
    /// at or behind it were never this stream's to emit; the push itself
    /// delivered them downstream.
    frontier: Option<Row>,
}

struct ChildJoinStream {
    op: Rc<ChildJoin>,
    request: FetchRequest,
    cleanup: bool,
    generation: u64,
    started: bool,
    arena: NodeArena,
    cursors: Vec<MergeCursor>,
    spans: Vec<SpanState>,
    last_yielded: Option<Row>,
    missed: bool,
    done: bool,
}

impl ChildJoinStream {
    fn new(op: Rc<ChildJoin>, request: FetchRequest, cleanup: bool) -> Self {
        Self {
            op,
            request,
            cleanup,
            generation: 0,
            started: false,
            arena: Rc::new(RefCell::new(Vec::new())),
            cursors: Vec::new(),
            spans: Vec::new(),
            last_yielded: None,
            missed: false,
            done: false,
        }
    }

    /// Materializes the parent side and opens one child cursor per parent.
    ///
    /// The generation snapshot happens here, not at stream creation: the
    /// baseline reflects pushes completed before the first pull, and only
    /// pushes after that point are overlay-adopted.
    fn init(&mut self) -> Result<()> {
        self.generation = self.op.generation.get();
        let parent_request = FetchRequest {
            constraint: self
                .op
                .keys
                .parent_constraint_from_request(self.request.constraint.as_ref()),
            reverse: false,
        };
        let parent_stream = if self.cleanup {
            Rc::clone(&self.op.parent).cleanup(parent_request)
        } else {
            Rc::clone(&self.op.parent).fetch(parent_request)
        };
        let parents: Vec<Node> = parent_stream.collect::<Result<_>>()?;

        for (i, parent) in parents.iter().enumerate() {
            let key = self.op.keys.parent_values(parent.row());
            self.cursors.push(MergeCursor {
                stream: self.open_child_stream(&key),
                head: None,
                parents: vec![i],
            });
        }
        *self.arena.borrow_mut() = parents;
        Ok(())
    }

    fn open_child_stream(&self, key: &[Value]) -> NodeStream {
        let mut constraint = self.op.keys.child_constraint(key);
        if let Some(rc) = &self.request.constraint {
            constraint = constraint.merge(rc);
        }
        let request = FetchRequest {
            constraint: Some(constraint),
            reverse: self.request.reverse,
        };
        if self.cleanup {
            Rc::clone(&self.op.child).cleanup(request)
        } else {
            Rc::clone(&self.op.child).fetch(request)
        }
    }

    /// Adopts a newly-observed overlay and freezes spans whose push ended.
    fn sync_overlay(&mut self) {
        let observed = match &*self.op.overlay.borrow() {
            Overlay::Overlaying(span) if span.generation > self.generation => {
                Some((span.generation, span.key.clone(), span.effect.clone()))
            }
            _ => None,
        };
        match observed {
            Some((generation, key, effect)) => {
                if self.spans.iter().any(|s| s.generation == generation) {
                    return;
                }
                // A new push is in flight; anything adopted earlier is over.
                for span in &mut self.spans {
                    span.complete = true;
                }
                let mut state = SpanState {
                    generation,
                    key,
                    effect,
                    complete: false,
                    arena_index: None,
                    frontier: self.last_yielded.clone(),
                };
                match &state.effect {
                    OverlayEffect::Reveal { parent } => {
                        let index = {
                            let mut arena = self.arena.borrow_mut();
                            arena.push(parent.clone());
                            arena.len() - 1
                        };
                        state.arena_index = Some(index);
                        // The baseline merge has no cursor for this key;
                        // inject one so revealed rows can surface.
                        self.cursors.push(MergeCursor {
                            stream: self.open_child_stream(&state.key),
                            head: None,
                            parents: vec![index],
                        });
                    }
                    OverlayEffect::Mutate { add: Some(parent), .. } => {
                        let index = {
                            let mut arena = self.arena.borrow_mut();
                            arena.push(parent.clone());
                            arena.len() - 1
                        };
                        state.arena_index = Some(index);
                    }
                    _ => {}
                }
                self.spans.push(state);
            }
            None => {
                for span in &mut self.spans {
                    span.complete = true;
                }
            }
        }
    }

    /// Has the in-progress push passed this row's position?
    fn span_passed(&self, span: &SpanState, row: &Row) -> bool {
        if span.complete {
            return true;
        }
        match &*self.op.overlay.borrow() {
            Overlay::Overlaying(live) if live.generation == span.generation => {
                match &live.cursor {
                    Some(cursor) => {
                        self.op.child_schema.compare_rows(row, cursor) != CmpOrdering::Greater
                    }
                    None => false,
                }
            }
            // The push ended between sync and use.
            _ => true,
        }
    }

    /// A head held back because its reveal has not reached it yet.
    fn head_blocked(&self, row: &Row) -> bool {
        self.spans.iter().any(|span| {
            matches!(span.effect, OverlayEffect::Reveal { .. })
                && span.key == self.op.keys.child_values(row)
                && !self.span_passed(span, row)
        })
    }

    /// A row the overlay obliged this stream to emit but that can no
    /// longer surface in order. Rows at or behind the adoption frontier
    /// are exempt: the push delivered those downstream itself.
    fn missed_mandatory(&self, row: &Row) -> bool {
        self.spans.iter().any(|span| {
            if !matches!(span.effect, OverlayEffect::Reveal { .. })
                || span.key != self.op.keys.child_values(row)
                || !self.span_passed(span, row)
            {
                return false;
            }
            match &span.frontier {
                Some(frontier) => self.directed(row, frontier) == CmpOrdering::Greater,
                None => true,
            }
        })
    }

    fn directed(&self, a: &Row, b: &Row) -> CmpOrdering {
        self.op
            .child_schema
            .comparator()
            .compare_directed(a, b, self.request.reverse)
    }
}

impl Iterator for ChildJoinStream {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            if let Err(e) = self.init() {
                self.done = true;
                return Some(Err(e));
            }
        }
        loop {
            self.sync_overlay();

            // Fill cursor heads. An error from one child stream releases
            // every other open stream before surfacing.
            let mut failed = None;
            for i in 0..self.cursors.len() {
                if self.cursors[i].head.is_none() {
                    match self.cursors[i].stream.next() {
                        Some(Ok(node)) => self.cursors[i].head = Some(node),
                        Some(Err(e)) => {
                            failed = Some(e);
                            break;
                        }
                        None => {}
                    }
                }
            }
            if let Some(e) = failed {
                self.cursors.clear();
                self.done = true;
                return Some(Err(e));
            }

            // Select the directed minimum among unblocked heads.
            let mut best: Option<(usize, Row)> = None;
            let mut blocked = false;
            for (i, cursor) in self.cursors.iter().enumerate() {
                let Some(head) = &cursor.head else { continue };
                if self.head_blocked(head.row()) {
                    blocked = true;
                    continue;
                }
                best = match best {
                    None => Some((i, head.row().clone())),
                    Some((b, row)) => {
                        if self.directed(head.row(), &row) == CmpOrdering::Less {
                            Some((i, head.row().clone()))
                        } else {
                            Some((b, row))
                        }
                    }
                };
            }

            let Some((best, _)) = best else {
                if blocked {
                    // Every remaining head waits on the in-progress push.
                    // Not exhausted: a later pull, once the cursor has
                    // advanced, resumes the merge.
                    return None;
                }
                self.done = true;
                if self.missed {
                    return Some(Err(Error::unresolved_overlay(
                        self.op.child_schema.table_name(),
                    )));
                }
                return None;
            };

            // Group ties: every cursor whose head is the same child row
            // contributes its parents and advances.
            let Some(best_node) = self.cursors[best].head.clone() else {
                continue;
            };
            let mut parent_indices: Vec<usize> = Vec::new();
            for cursor in &mut self.cursors {
                let same = cursor
                    .head
                    .as_ref()
                    .map(|h| {
                        self.op.child_schema.compare_rows(h.row(), best_node.row())
                            == CmpOrdering::Equal
                    })
                    .unwrap_or(false);
                if same {
                    for &p in &cursor.parents {
                        if !parent_indices.contains(&p) {
                            parent_indices.push(p);
                        }
                    }
                    cursor.head = None;
                }
            }
            parent_indices.sort_unstable();

            // A candidate at or behind the emission frontier cannot be
            // yielded in order. If the overlay obliges it, the stream can
            // no longer resolve and must fail at its end.
            if let Some(last) = &self.last_yielded {
                if self.directed(best_node.row(), last) != CmpOrdering::Greater {
                    if self.missed_mandatory(best_node.row()) {
                        self.missed = true;
                    }
                    continue;
                }
            }

            // Apply adopted overlays to the candidate.
            let key = self.op.keys.child_values(best_node.row());
            let mut suppress = false;
            for i in 0..self.spans.len() {
                if self.spans[i].key != key {
                    continue;
                }
                let passed = self.span_passed(&self.spans[i], best_node.row());
                match &self.spans[i].effect {
                    OverlayEffect::Reveal { .. } => {
                        if !passed {
                            suppress = true;
                        }
                    }
                    OverlayEffect::Conceal => {
                        if passed {
                            suppress = true;
                        }
                    }
                    OverlayEffect::Mutate { remove, .. } => {
                        if passed {
                            if let Some(removed) = remove.clone() {
                                let arena = self.arena.borrow();
                                parent_indices.retain(|&p| {
                                    arena
                                        .get(p)
                                        .map(|n| {
                                            !self
                                                .op
                                                .parent_schema
                                                .same_primary_key(n.row(), &removed)
                                        })
                                        .unwrap_or(false)
                                });
                            }
                            if let Some(index) = self.spans[i].arena_index {
                                if !parent_indices.contains(&index) {
                                    parent_indices.push(index);
                                }
                            }
                        }
                    }
                }
            }
            if suppress || parent_indices.is_empty() {
                continue;
            }

            let pk = self.op.pk(best_node.row());
            if self.cleanup {
                self.op.store.borrow_mut().remove(&key, &pk);
            } else {
                self.op.store.borrow_mut().insert(&key, &pk);
            }
            self.last_yielded = Some(best_node.row().clone());

            let node = if self.op.hidden {
                best_node
            } else {
                best_node.with_relationship(Relationship::arena(
                    self.op.relationship.clone(),
                    Rc::clone(&self.arena),
                    parent_indices,
                ))
            };
            return Some(Ok(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use eddy_core::{DataType, Order, SchemaBuilder};

    fn artists_schema() -> Schema {
        SchemaBuilder::new("artists")
            .unwrap()
            .column("id", DataType::Int)
            .unwrap()
            .column("genre", DataType::String)
            .unwrap()
            .primary_key(&["id"])
            .build()
            .unwrap()
    }

    fn tracks_schema() -> Schema {
        SchemaBuilder::new("tracks")
            .unwrap()
            .column("id", DataType::Int)
            .unwrap()
            .column("genre", DataType::String)
            .unwrap()
            .column("title", DataType::String)
            .unwrap()
            .primary_key(&["id"])
            .order_by("title", Order::Asc)
            .build()
            .unwrap()
    }

    fn artist(id: i64, genre: &str) -> Row {
        Row::new(vec![Value::Int(id), genre.into()])
    }

    fn track(id: i64, genre: &str, title: &str) -> Row {
        Row::new(vec![Value::Int(id), genre.into(), title.into()])
    }

    #[derive(Default)]
    struct Log {
        entries: RefCell<Vec<String>>,
    }
    impl Output for Log {
        fn push(&self, change: Change) -> Result<()> {
            let id = change.node().row().get(0).unwrap().as_int().unwrap();
            let mut label = format!("{}:{}", change.kind(), id);
            if let Change::Child { child, .. } = &change {
                label.push(':');
                label.push_str(child.change.kind());
            }
            self.entries.borrow_mut().push(label);
            Ok(())
        }
    }

    fn graph(
        artists: Vec<Row>,
        tracks: Vec<Row>,
    ) -> (Rc<MemorySource>, Rc<MemorySource>, Rc<ChildJoin>, Rc<Log>) {
        let parent = MemorySource::with_rows(artists_schema(), artists);
        let child = MemorySource::with_rows(tracks_schema(), tracks);
        let join = ChildJoin::new(
            parent.clone() as Rc<dyn Operator>,
            child.clone() as Rc<dyn Operator>,
            &["genre"],
            &["genre"],
            "artists",
            false,
        )
        .unwrap();
        join.connect();
        let log = Rc::new(Log::default());
        join.set_output(log.clone());
        (parent, child, join, log)
    }

    fn track_ids(stream: NodeStream) -> Vec<i64> {
        stream
            .map(|n| n.unwrap().row().get(0).unwrap().as_int().unwrap())
            .collect()
    }

    fn parent_ids(node: &Node) -> Vec<i64> {
        node.relationship("artists")
            .unwrap()
            .stream()
            .map(|n| n.unwrap().row().get(0).unwrap().as_int().unwrap())
            .collect()
    }

    #[test]
    fn test_fetch_merges_and_groups_ties() {
        let (_, _, join, _) = graph(
            vec![artist(1, "jazz"), artist(2, "jazz"), artist(3, "rock")],
            vec![
                track(10, "jazz", "a"),
                track(11, "rock", "b"),
                track(12, "jazz", "c"),
                track(13, "pop", "d"),
            ],
        );
        let nodes: Vec<Node> = join
            .fetch(FetchRequest::all())
            .map(|n| n.unwrap())
            .collect();
        // Track 13 has no matching artist and is invisible.
        let ids: Vec<i64> = nodes
            .iter()
            .map(|n| n.row().get(0).unwrap().as_int().unwrap())
            .collect();
        assert_eq!(ids, vec![10, 11, 12]);

        // Both jazz artists are grouped onto each jazz track.
        assert_eq!(parent_ids(&nodes[0]), vec![1, 2]);
        assert_eq!(parent_ids(&nodes[1]), vec![3]);
        assert_eq!(parent_ids(&nodes[2]), vec![1, 2]);
    }

    #[test]
    fn test_fetch_reverse_is_mirror() {
        let (_, _, join, _) = graph(
            vec![artist(1, "jazz")],
            vec![track(10, "jazz", "a"), track(12, "jazz", "c")],
        );
        let forward = track_ids(join.clone().fetch(FetchRequest::all()));
        let mut reverse = track_ids(join.fetch(FetchRequest::reversed()));
        reverse.reverse();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_first_parent_reveals() {
        let (parent, _, _join, log) = graph(
            vec![],
            vec![track(10, "jazz", "a"), track(12, "jazz", "c")],
        );
        parent.insert(artist(1, "jazz")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["add:10", "add:12"]);
    }

    #[test]
    fn test_second_parent_is_child_change() {
        let (parent, _, join, log) = graph(
            vec![artist(1, "jazz")],
            vec![track(10, "jazz", "a")],
        );
        // Hydrate so the join tracks its visible children.
        assert_eq!(track_ids(join.clone().fetch(FetchRequest::all())), vec![10]);

        parent.insert(artist(2, "jazz")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["child:10:add"]);
    }

    #[test]
    fn test_last_parent_conceals() {
        let (parent, _, join, log) = graph(
            vec![artist(1, "jazz")],
            vec![track(10, "jazz", "a")],
        );
        assert_eq!(track_ids(join.clone().fetch(FetchRequest::all())), vec![10]);

        parent.delete(artist(1, "jazz")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["remove:10"]);
    }

    #[test]
    fn test_parent_removal_among_several_is_child_change() {
        let (parent, _, join, log) = graph(
            vec![artist(1, "jazz"), artist(2, "jazz")],
            vec![track(10, "jazz", "a")],
        );
        assert_eq!(track_ids(join.clone().fetch(FetchRequest::all())), vec![10]);

        parent.delete(artist(2, "jazz")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["child:10:remove"]);
    }

    #[test]
    fn test_child_add_with_and_without_parents() {
        let (_, child, _join, log) = graph(vec![artist(1, "jazz")], vec![]);
        child.insert(track(10, "jazz", "a")).unwrap();
        child.insert(track(11, "pop", "b")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["add:10"]);
    }

    #[test]
    fn test_child_remove_tracked_only() {
        let (_, child, join, log) = graph(
            vec![artist(1, "jazz")],
            vec![track(10, "jazz", "a"), track(11, "pop", "b")],
        );
        assert_eq!(track_ids(join.clone().fetch(FetchRequest::all())), vec![10]);

        child.delete(track(11, "pop", "b")).unwrap();
        child.delete(track(10, "jazz", "a")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["remove:10"]);
    }

    #[test]
    fn test_child_rekey_moves_groups() {
        let (_, child, join, log) = graph(
            vec![artist(1, "jazz"), artist(2, "rock")],
            vec![track(10, "jazz", "a")],
        );
        assert_eq!(track_ids(join.clone().fetch(FetchRequest::all())), vec![10]);

        child
            .update(track(10, "jazz", "a"), track(10, "rock", "a"))
            .unwrap();
        assert_eq!(*log.entries.borrow(), vec!["remove:10", "add:10"]);
    }

    #[test]
    fn test_parent_edit_same_key_is_nested_edit() {
        let (parent, _, join, log) = graph(
            vec![artist(1, "jazz")],
            vec![track(10, "jazz", "a")],
        );
        assert_eq!(track_ids(join.clone().fetch(FetchRequest::all())), vec![10]);

        parent.update(artist(1, "jazz"), artist(1, "jazz")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["child:10:edit"]);
    }

    #[test]
    fn test_parent_rekey_conceals_then_reveals() {
        let (parent, _, join, log) = graph(
            vec![artist(1, "jazz")],
            vec![track(10, "jazz", "a"), track(11, "rock", "b")],
        );
        assert_eq!(track_ids(join.clone().fetch(FetchRequest::all())), vec![10]);

        parent.update(artist(1, "jazz"), artist(1, "rock")).unwrap();
        assert_eq!(*log.entries.borrow(), vec!["remove:10", "add:11"]);
    }

    #[test]
    fn test_constrained_fetch() {
        let (_, _, join, _) = graph(
            vec![artist(1, "jazz"), artist(2, "rock")],
            vec![track(10, "jazz", "a"), track(11, "rock", "b")],
        );
        let req = FetchRequest::constrained(
            crate::operator::Constraint::new().with("genre", "rock".into()),
        );
        assert_eq!(track_ids(join.fetch(req)), vec![11]);
    }

    #[test]
    fn test_cleanup_prunes_state() {
        let (_, _, join, _) = graph(
            vec![artist(1, "jazz")],
            vec![track(10, "jazz", "a")],
        );
        assert_eq!(track_ids(join.clone().fetch(FetchRequest::all())), vec![10]);
        assert!(!join.store.borrow().is_empty());

        assert_eq!(track_ids(join.clone().cleanup(FetchRequest::all())), vec![10]);
        assert!(join.store.borrow().is_empty());
    }

    #[test]
    fn test_hidden_join_is_semi_join() {
        let parent = MemorySource::with_rows(artists_schema(), vec![artist(1, "jazz")]);
        let child = MemorySource::with_rows(
            tracks_schema(),
            vec![track(10, "jazz", "a"), track(11, "pop", "b")],
        );
        let join = ChildJoin::new(
            parent.clone() as Rc<dyn Operator>,
            child.clone() as Rc<dyn Operator>,
            &["genre"],
            &["genre"],
            "artists",
            true,
        )
        .unwrap();
        join.connect();
        let log = Rc::new(Log::default());
        join.set_output(log.clone());

        assert!(join.schema().relationship("artists").is_none());
        let nodes: Vec<Node> = join
            .clone()
            .fetch(FetchRequest::all())
            .map(|n| n.unwrap())
            .collect();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].relationship("artists").is_none());
    }
}
