//! Connection-wide priority tree.
//!
//! Every transaction on a connection owns one node of a shared dependency
//! tree (HTTP/2 style: parent, weight, exclusive flag). Nodes live in a
//! slab, so a [`PriorityHandle`] stays valid while other nodes are
//! reparented or removed. A transaction only ever touches its own handle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use slab::Slab;
use tracing::trace;

use crate::types::StreamId;

/// Wire weight used when a stream has no explicit priority (effective 16).
pub const DEFAULT_WEIGHT: u8 = 15;

/// Shared, single-threaded handle to a connection's priority tree.
pub type SharedPriorityTree = Rc<RefCell<PriorityTree>>;

/// Priority of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityUpdate {
    /// Parent stream; `None` depends on the root.
    pub stream_dependency: Option<StreamId>,
    pub exclusive: bool,
    /// Wire weight, 0..=255. Effective weight is one more.
    pub weight: u8,
}

impl PriorityUpdate {
    pub fn new(stream_dependency: Option<StreamId>, exclusive: bool, weight: u8) -> Self {
        Self {
            stream_dependency,
            exclusive,
            weight,
        }
    }

    pub fn effective_weight(&self) -> u16 {
        u16::from(self.weight) + 1
    }
}

impl Default for PriorityUpdate {
    fn default() -> Self {
        Self::new(None, false, DEFAULT_WEIGHT)
    }
}

/// Stable position of a transaction inside a [`PriorityTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriorityHandle(usize);

#[derive(Debug)]
struct Node {
    stream_id: Option<StreamId>,
    parent: Option<usize>,
    children: Vec<usize>,
    weight: u16,
    enqueued: bool,
}

/// Result of inserting a stream into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    pub handle: PriorityHandle,
    pub depth: u64,
    /// Requested parent was unknown; the stream was placed under the root.
    pub fallback: bool,
}

#[derive(Debug)]
pub struct PriorityTree {
    nodes: Slab<Node>,
    root: usize,
    by_stream: HashMap<StreamId, usize>,
}

impl PriorityTree {
    pub fn new() -> Self {
        let mut nodes = Slab::new();
        let root = nodes.insert(Node {
            stream_id: None,
            parent: None,
            children: Vec::new(),
            weight: 256,
            enqueued: false,
        });
        Self {
            nodes,
            root,
            by_stream: HashMap::new(),
        }
    }

    pub fn shared() -> SharedPriorityTree {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Number of streams in the tree.
    pub fn len(&self) -> usize {
        self.by_stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_stream.is_empty()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.by_stream.contains_key(&id)
    }

    pub fn add_transaction(&mut self, id: StreamId, pri: PriorityUpdate) -> Insertion {
        let (parent, fallback) = self.resolve_parent(pri.stream_dependency, None);
        let idx = self.nodes.insert(Node {
            stream_id: Some(id),
            parent: None,
            children: Vec::new(),
            weight: pri.effective_weight(),
            enqueued: false,
        });
        self.attach(idx, parent, pri.exclusive);
        self.by_stream.insert(id, idx);
        let depth = self.depth_of(idx);
        trace!(stream_id = %id, depth, fallback, "priority node added");
        Insertion {
            handle: PriorityHandle(idx),
            depth,
            fallback,
        }
    }

    /// Reparent and reweight. Returns the node's new depth.
    pub fn update_priority(&mut self, handle: PriorityHandle, pri: PriorityUpdate) -> u64 {
        let idx = handle.0;
        if !self.nodes.contains(idx) {
            return 0;
        }
        let (parent, _) = self.resolve_parent(pri.stream_dependency, Some(idx));

        // Moving under one of our own descendants: lift that descendant to
        // our current parent first.
        if self.is_descendant(parent, idx) {
            let old_parent = self.nodes[idx].parent.unwrap_or(self.root);
            self.detach(parent);
            self.attach(parent, old_parent, false);
        }

        self.detach(idx);
        self.nodes[idx].weight = pri.effective_weight();
        self.attach(idx, parent, pri.exclusive);
        self.depth_of(idx)
    }

    /// Remove a stream. Its children move up to its parent.
    pub fn remove_transaction(&mut self, handle: PriorityHandle) {
        let idx = handle.0;
        if idx == self.root || !self.nodes.contains(idx) {
            return;
        }
        let parent = self.nodes[idx].parent.unwrap_or(self.root);
        self.detach(idx);
        let children = std::mem::take(&mut self.nodes[idx].children);
        for child in children {
            self.nodes[child].parent = Some(parent);
            self.nodes[parent].children.push(child);
        }
        let node = self.nodes.remove(idx);
        if let Some(id) = node.stream_id {
            self.by_stream.remove(&id);
        }
    }

    pub fn depth(&self, handle: PriorityHandle) -> u64 {
        if self.nodes.contains(handle.0) {
            self.depth_of(handle.0)
        } else {
            0
        }
    }

    pub fn signal_pending_egress(&mut self, handle: PriorityHandle) {
        if let Some(node) = self.nodes.get_mut(handle.0) {
            node.enqueued = true;
        }
    }

    pub fn clear_pending_egress(&mut self, handle: PriorityHandle) {
        if let Some(node) = self.nodes.get_mut(handle.0) {
            node.enqueued = false;
        }
    }

    pub fn is_enqueued(&self, handle: PriorityHandle) -> bool {
        self.nodes.get(handle.0).map(|n| n.enqueued).unwrap_or(false)
    }

    /// Enqueued streams in scheduling order, each with its share of
    /// connection egress relative to competing siblings.
    ///
    /// An enqueued node shadows its subtree; an idle node passes its share
    /// to children that have pending egress somewhere below them.
    pub fn next_egress(&self) -> Vec<(StreamId, f64)> {
        let mut out = Vec::new();
        self.collect_egress(self.root, 1.0, &mut out);
        out
    }

    fn collect_egress(&self, idx: usize, share: f64, out: &mut Vec<(StreamId, f64)>) {
        let node = &self.nodes[idx];
        if node.enqueued {
            if let Some(id) = node.stream_id {
                out.push((id, share));
                return;
            }
        }
        let eligible: Vec<usize> = node
            .children
            .iter()
            .copied()
            .filter(|&child| self.has_pending(child))
            .collect();
        let total: u32 = eligible
            .iter()
            .map(|&child| u32::from(self.nodes[child].weight))
            .sum();
        for child in eligible {
            let ratio = f64::from(self.nodes[child].weight) / f64::from(total);
            self.collect_egress(child, share * ratio, out);
        }
    }

    fn has_pending(&self, idx: usize) -> bool {
        let node = &self.nodes[idx];
        node.enqueued || node.children.iter().any(|&child| self.has_pending(child))
    }

    fn resolve_parent(&self, dependency: Option<StreamId>, own: Option<usize>) -> (usize, bool) {
        match dependency {
            None => (self.root, false),
            Some(id) => match self.by_stream.get(&id) {
                Some(&idx) if Some(idx) != own => (idx, false),
                _ => (self.root, true),
            },
        }
    }

    fn attach(&mut self, idx: usize, parent: usize, exclusive: bool) {
        if exclusive {
            let adopted = std::mem::take(&mut self.nodes[parent].children);
            for child in &adopted {
                self.nodes[*child].parent = Some(idx);
            }
            self.nodes[idx].children.extend(adopted);
        }
        self.nodes[idx].parent = Some(parent);
        self.nodes[parent].children.push(idx);
    }

    fn detach(&mut self, idx: usize) {
        if let Some(parent) = self.nodes[idx].parent.take() {
            self.nodes[parent].children.retain(|&child| child != idx);
        }
    }

    fn is_descendant(&self, candidate: usize, ancestor: usize) -> bool {
        let mut cursor = self.nodes[candidate].parent;
        while let Some(idx) = cursor {
            if idx == ancestor {
                return true;
            }
            cursor = self.nodes[idx].parent;
        }
        false
    }

    fn depth_of(&self, idx: usize) -> u64 {
        let mut depth = 0;
        let mut cursor = self.nodes[idx].parent;
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.nodes[parent].parent;
        }
        depth
    }
}

impl Default for PriorityTree {
    fn default() -> Self {
        Self::new()
    }
}
