//! Tree nodes, their visit statistics and the virtual-loss protocol.
//!
//! Children are owned by their parent through a singly-linked sibling
//! chain kept in strictly ascending edge-index order; the `parent` field
//! is a plain non-owning back-reference used only while backing values
//! up. Statistics are individually atomic so any number of workers can
//! select and back up concurrently, but no lock protects cross-field
//! consistency: readers may observe e.g. `n` updated before `q`, and the
//! selection formula upstream is tolerant of that.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use games_xiangqi::{GameResult, Move};

use crate::edge::{Edge, EdgeList};
use crate::gc;

/// A single search-tree node.
///
/// Structural fields (`edges`, `child`, `sibling`) live in `UnsafeCell`s
/// and are only ever mutated by the worker that holds the exclusive
/// first in-flight visit of an unvisited node (the
/// `try_start_score_update` gate) or by the single-threaded tree owner.
/// That exclusivity is the safety argument for the manual `Send`/`Sync`
/// below; every `unsafe` block in this module leans on it.
pub struct Node {
    parent: *const Node,
    index: u16,
    edges: UnsafeCell<EdgeList>,
    child: UnsafeCell<Option<Box<Node>>>,
    sibling: UnsafeCell<Option<Box<Node>>>,
    n: AtomicU32,
    n_in_flight: AtomicU32,
    // f32 bit patterns.
    q: AtomicU32,
    visited_policy: AtomicU32,
    max_depth: AtomicU16,
    full_depth: AtomicU16,
    terminal: AtomicBool,
}

unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    pub(crate) fn new(parent: *const Node, index: u16) -> Node {
        Node {
            parent,
            index,
            edges: UnsafeCell::new(EdgeList::default()),
            child: UnsafeCell::new(None),
            sibling: UnsafeCell::new(None),
            n: AtomicU32::new(0),
            n_in_flight: AtomicU32::new(0),
            q: AtomicU32::new(0.0f32.to_bits()),
            visited_policy: AtomicU32::new(0.0f32.to_bits()),
            max_depth: AtomicU16::new(0),
            full_depth: AtomicU16::new(0),
            terminal: AtomicBool::new(false),
        }
    }

    /// A root node with no parent.
    pub fn new_root() -> Node {
        Node::new(ptr::null(), 0)
    }

    /// Completed visits.
    #[inline]
    pub fn n(&self) -> u32 {
        self.n.load(Ordering::Acquire)
    }

    /// Selections currently traversing this node whose backup has not
    /// completed yet.
    #[inline]
    pub fn n_in_flight(&self) -> u32 {
        self.n_in_flight.load(Ordering::Acquire)
    }

    /// Running mean of backed-up values.
    #[inline]
    pub fn q(&self) -> f32 {
        f32::from_bits(self.q.load(Ordering::Relaxed))
    }

    /// Sum of priors of children visited at least once.
    #[inline]
    pub fn visited_policy(&self) -> f32 {
        f32::from_bits(self.visited_policy.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    #[inline]
    pub fn max_depth(&self) -> u16 {
        self.max_depth.load(Ordering::Acquire)
    }

    #[inline]
    pub fn full_depth(&self) -> u16 {
        self.full_depth.load(Ordering::Acquire)
    }

    /// Position of this node within the parent's edge list.
    #[inline]
    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn parent(&self) -> Option<&Node> {
        unsafe { self.parent.as_ref() }
    }

    pub(crate) fn parent_raw(&self) -> *const Node {
        self.parent
    }

    pub fn num_edges(&self) -> usize {
        unsafe { (*self.edges.get()).len() }
    }

    /// The edge that spawned `child`.
    pub fn edge_to(&self, child: &Node) -> &Edge {
        assert!(
            ptr::eq(child.parent, self),
            "node is not a child of this parent"
        );
        unsafe { &(&*self.edges.get())[child.index as usize] }
    }

    /// Install the edge list from the legal moves of this position.
    ///
    /// May be called once; the caller must be the exclusive expander
    /// (the worker holding the only in-flight visit of this unvisited
    /// node).
    pub fn create_edges(&self, moves: &[Move]) {
        // Exclusive by the virtual-loss gate.
        let edges = unsafe { &mut *self.edges.get() };
        assert!(edges.is_empty(), "node expanded twice");
        assert!(
            unsafe { (*self.child.get()).is_none() },
            "node has children but no edges"
        );
        *edges = EdgeList::new(moves);
    }

    /// Install a singleton edge list and immediately materialize its one
    /// child. Used by the tree when a played move has no matching edge.
    pub fn create_single_child_node(&mut self, mv: Move) -> &mut Node {
        let parent = self as *const Node;
        let edges = self.edges.get_mut();
        assert!(edges.is_empty(), "node expanded twice");
        *edges = EdgeList::new(&[mv]);
        let child = self.child.get_mut();
        assert!(child.is_none());
        *child = Some(Box::new(Node::new(parent, 0)));
        child.as_mut().unwrap()
    }

    /// Joint walk over the edge list and the materialized children.
    pub fn edges(&self) -> EdgeWalk<'_> {
        EdgeWalk {
            node: self,
            link: self.child.get(),
            i: 0,
        }
    }

    /// The materialized children, in ascending index order.
    pub fn child_nodes(&self) -> ChildNodes<'_> {
        ChildNodes {
            next: unsafe { (*self.child.get()).as_deref() },
        }
    }

    /// Enter this node during selection.
    ///
    /// Returns false when another worker already holds the expansion
    /// visit of this unvisited node; the caller must pick another path.
    /// Otherwise the in-flight count (virtual loss) is incremented.
    pub fn try_start_score_update(&self) -> bool {
        if self.n.load(Ordering::Acquire) == 0 {
            // Only one worker may own the first visit; it is the one
            // that expands the node.
            self.n_in_flight
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        } else {
            self.n_in_flight.fetch_add(1, Ordering::AcqRel);
            true
        }
    }

    /// Abandon a selection before backup, undoing the virtual loss.
    pub fn cancel_score_update(&self) {
        let prev = self.n_in_flight.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "cancel without a matching start");
    }

    /// Fold an evaluation into the node and complete the visit.
    pub fn finalize_score_update(&self, v: f32) {
        let n = self.n.load(Ordering::Relaxed);
        // Incremental mean.
        let q = self.q();
        self.q
            .store((q + (v - q) / (n as f32 + 1.0)).to_bits(), Ordering::Relaxed);
        // On the first visit, tell the parent one more of its priors has
        // been explored. Exclusive while n == 0 thanks to the gate.
        if n == 0 {
            if let Some(parent) = self.parent() {
                let p = unsafe { &(&*parent.edges.get())[self.index as usize] }.p();
                parent.add_visited_policy(p);
            }
        }
        // The release store publishes the edges written during expansion
        // to every worker that acquires n afterwards.
        self.n.fetch_add(1, Ordering::AcqRel);
        let prev = self.n_in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "finalize without a matching start");
    }

    fn add_visited_policy(&self, p: f32) {
        let _ = self
            .visited_policy
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |bits| {
                Some((f32::from_bits(bits) + p).to_bits())
            });
    }

    /// Mark the node as ending the game: q becomes 0 for a draw and 1
    /// for a win of the side to move. The score still flows through
    /// `finalize_score_update`.
    pub fn make_terminal(&self, result: GameResult) {
        self.terminal.store(true, Ordering::Release);
        let q = if result == GameResult::Draw { 0.0f32 } else { 1.0 };
        self.q.store(q.to_bits(), Ordering::Relaxed);
    }

    /// Raise the deepest-expansion watermark.
    pub fn update_max_depth(&self, depth: u16) {
        self.max_depth.fetch_max(depth, Ordering::AcqRel);
    }

    /// Recompute how deep every path beneath this node reaches. Slots
    /// without a materialized child count as depth 0. Returns true when
    /// the node's own full depth increased.
    pub fn update_full_depth(&self, depth: &mut u16) -> bool {
        if self.full_depth.load(Ordering::Acquire) > *depth {
            return false;
        }
        for item in self.edges() {
            let child_depth = item.node().map_or(0, Node::full_depth);
            if *depth > child_depth {
                *depth = child_depth;
            }
        }
        if *depth >= self.full_depth.load(Ordering::Acquire) {
            *depth += 1;
            self.full_depth.store(*depth, Ordering::Release);
            return true;
        }
        false
    }

    /// Hand the whole child chain to the garbage collector.
    pub fn release_children(&mut self) {
        gc::global().add_to_queue(self.take_child());
    }

    /// Keep only the child `keep` points at; every other subtree goes to
    /// the collector. When `keep` is null (or not found) all children
    /// are released.
    pub fn release_children_except_one(&mut self, keep: *const Node) {
        let mut saved: Option<Box<Node>> = None;
        let mut link: *mut Option<Box<Node>> = self.child.get_mut();
        unsafe {
            while let Some(node) = (*link).as_mut() {
                if ptr::eq(node.as_ref(), keep) {
                    // Cut the survivor loose; its trailing siblings go to
                    // the collector with everything below them.
                    gc::global().add_to_queue(node.sibling.get_mut().take());
                    saved = (*link).take();
                    break;
                }
                link = node.sibling.get_mut();
            }
        }
        // Whatever still hangs off `child` precedes the survivor (or is
        // the whole chain when nothing survived).
        gc::global().add_to_queue(self.child.get_mut().take());
        *self.child.get_mut() = saved;
    }

    pub(crate) fn take_child(&mut self) -> Option<Box<Node>> {
        self.child.get_mut().take()
    }

    pub(crate) fn take_sibling(&mut self) -> Option<Box<Node>> {
        self.sibling.get_mut().take()
    }

    pub(crate) fn set_sibling(&mut self, sibling: Option<Box<Node>>) {
        *self.sibling.get_mut() = sibling;
    }

    /// Return the existing node for `index`, or splice a fresh one into
    /// the chain in ascending-index position. `link` may lag behind
    /// (point at an earlier slot); smaller-index nodes are skipped
    /// first.
    ///
    /// # Safety
    ///
    /// `link` must point into `parent`'s child chain at or before the
    /// insertion point for `index`, and the caller must be serialized
    /// with every other structural mutation of `parent` (the expansion
    /// gate or the single-threaded tree owner provides this).
    unsafe fn get_or_spawn(
        mut link: *mut Option<Box<Node>>,
        parent: *const Node,
        index: u16,
    ) -> *mut Node {
        loop {
            match &mut *link {
                Some(existing) if existing.index == index => {
                    return existing.as_mut() as *mut Node;
                }
                Some(existing) if existing.index < index => {
                    link = existing.sibling.get();
                }
                slot => {
                    let mut node = Box::new(Node::new(parent, index));
                    *node.sibling.get_mut() = slot.take();
                    let raw = node.as_mut() as *mut Node;
                    *slot = Some(node);
                    return raw;
                }
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node(index={} n={} in_flight={} q={:.3} edges={} terminal={})",
            self.index,
            self.n(),
            self.n_in_flight(),
            self.q(),
            self.num_edges(),
            self.is_terminal()
        )
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // Detached subtrees can hold millions of nodes; an explicit
        // worklist keeps the teardown off the call stack.
        let mut pending: Vec<Box<Node>> = Vec::new();
        pending.extend(self.child.get_mut().take());
        pending.extend(self.sibling.get_mut().take());
        while let Some(mut node) = pending.pop() {
            pending.extend(node.child.get_mut().take());
            pending.extend(node.sibling.get_mut().take());
        }
    }
}

/// One slot of the joint edge/child walk: an edge plus its materialized
/// node, if any.
pub struct EdgeAndNode<'a> {
    edge: &'a Edge,
    node: Option<&'a Node>,
    link: *mut Option<Box<Node>>,
    index: u16,
}

impl<'a> EdgeAndNode<'a> {
    #[inline]
    pub fn edge(&self) -> &'a Edge {
        self.edge
    }

    #[inline]
    pub fn node(&self) -> Option<&'a Node> {
        self.node
    }

    /// Completed visits of the child, 0 when not materialized.
    #[inline]
    pub fn n(&self) -> u32 {
        self.node.map_or(0, Node::n)
    }

    /// Q of the child, or `default` when not materialized or unvisited.
    #[inline]
    pub fn q_or(&self, default: f32) -> f32 {
        match self.node {
            Some(node) if node.n() > 0 => node.q(),
            _ => default,
        }
    }

    /// The child node for this edge, creating and splicing it into the
    /// chain if it does not exist yet. The caller must be serialized
    /// with other structural mutations of `parent`.
    pub fn get_or_spawn_node(&self, parent: &Node) -> &'a Node {
        unsafe { &*Node::get_or_spawn(self.link, parent as *const Node, self.index) }
    }
}

impl fmt::Debug for EdgeAndNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?}", self.edge, self.node)
    }
}

/// Iterator produced by [`Node::edges`]. Walks the edge list in order
/// while advancing a cursor through the child chain, so pairing each
/// edge with its node is O(1) amortized.
pub struct EdgeWalk<'a> {
    node: &'a Node,
    link: *mut Option<Box<Node>>,
    i: usize,
}

impl<'a> Iterator for EdgeWalk<'a> {
    type Item = EdgeAndNode<'a>;

    fn next(&mut self) -> Option<EdgeAndNode<'a>> {
        let edges: &'a EdgeList = unsafe { &*self.node.edges.get() };
        if self.i >= edges.len() {
            return None;
        }
        let index = self.i as u16;
        // Catch the cursor up: nodes spawned behind it (smaller index)
        // are skipped, so in an ascending chain only the node at the
        // cursor can belong to this slot.
        unsafe {
            while let Some(node) = (*self.link).as_deref() {
                if node.index >= index {
                    break;
                }
                self.link = node.sibling.get();
            }
        }
        let here: Option<&'a Node> =
            unsafe { (*self.link).as_deref() }.filter(|node| node.index == index);
        let item = EdgeAndNode {
            edge: &edges[self.i],
            node: here,
            link: self.link,
            index,
        };
        self.i += 1;
        Some(item)
    }
}

/// Iterator over materialized children only.
pub struct ChildNodes<'a> {
    next: Option<&'a Node>,
}

impl<'a> Iterator for ChildNodes<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<&'a Node> {
        let current = self.next?;
        self.next = unsafe { (*current.sibling.get()).as_deref() };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use games_xiangqi::Board;

    fn opening_moves() -> Vec<Move> {
        Board::starting().generate_moves()
    }

    fn expanded_root(priors: f32) -> Node {
        let root = Node::new_root();
        let moves = opening_moves();
        root.create_edges(&moves);
        for item in root.edges() {
            item.edge().set_p(priors);
        }
        root
    }

    #[test]
    fn test_new_node_defaults() {
        let node = Node::new_root();
        assert_eq!(node.n(), 0);
        assert_eq!(node.n_in_flight(), 0);
        assert_eq!(node.q(), 0.0);
        assert_eq!(node.visited_policy(), 0.0);
        assert_eq!(node.num_edges(), 0);
        assert!(!node.is_terminal());
        assert!(node.parent().is_none());
        assert_eq!(node.child_nodes().count(), 0);
    }

    #[test]
    fn test_create_edges_installs_all_moves() {
        let root = expanded_root(1.0 / 44.0);
        assert_eq!(root.num_edges(), 44);
        assert_eq!(root.edges().count(), 44);
        for item in root.edges() {
            assert!(item.node().is_none());
            assert_eq!(item.n(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "expanded twice")]
    fn test_double_expansion_is_fatal() {
        let root = Node::new_root();
        let moves = opening_moves();
        root.create_edges(&moves);
        root.create_edges(&moves);
    }

    #[test]
    fn test_create_single_child_node() {
        let mut root = Node::new_root();
        let mv = Move::parse("b2e2").unwrap();
        let child_index = root.create_single_child_node(mv).index();
        assert_eq!(child_index, 0);
        assert_eq!(root.num_edges(), 1);
        assert_eq!(root.child_nodes().count(), 1);
        assert_eq!(root.edges().next().unwrap().edge().mv(false), mv);
    }

    #[test]
    fn test_try_cancel_pairs_leave_node_unchanged() {
        let root = expanded_root(1.0 / 44.0);
        assert!(root.try_start_score_update());
        root.finalize_score_update(0.25);
        let (n, q, vp) = (root.n(), root.q(), root.visited_policy());

        for _ in 0..5 {
            assert!(root.try_start_score_update());
        }
        assert_eq!(root.n_in_flight(), 5);
        for _ in 0..5 {
            root.cancel_score_update();
        }
        assert_eq!(root.n_in_flight(), 0);
        assert_eq!(root.n(), n);
        assert_eq!(root.q(), q);
        assert_eq!(root.visited_policy(), vp);
    }

    #[test]
    fn test_welford_mean_converges() {
        let node = Node::new_root();
        let values = [0.5f32, -0.25, 1.0, 0.0, -1.0, 0.125];
        for v in values {
            assert!(node.try_start_score_update());
            node.finalize_score_update(v);
        }
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        assert_eq!(node.n(), values.len() as u32);
        assert!((node.q() - mean).abs() < 1e-6);
    }

    #[test]
    fn test_virtual_loss_excludes_second_expander() {
        let root = Node::new_root();
        // Worker A enters the unvisited node.
        assert!(root.try_start_score_update());
        // Worker B must back off while A is expanding.
        assert!(!root.try_start_score_update());
        root.finalize_score_update(0.1);
        // After the first visit completed, B may enter.
        assert!(root.try_start_score_update());
        root.cancel_score_update();
    }

    #[test]
    fn test_first_visit_updates_parent_visited_policy() {
        let root = expanded_root(1.0 / 44.0);
        assert!(root.try_start_score_update());
        root.finalize_score_update(0.0);

        let item = root.edges().nth(3).unwrap();
        let child = item.get_or_spawn_node(&root);
        assert!(child.try_start_score_update());
        child.finalize_score_update(-0.5);
        assert!((root.visited_policy() - 1.0 / 44.0).abs() < 1e-6);

        // A second visit of the same child adds nothing.
        assert!(child.try_start_score_update());
        child.finalize_score_update(-0.5);
        assert!((root.visited_policy() - 1.0 / 44.0).abs() < 1e-6);
    }

    #[test]
    fn test_get_or_spawn_keeps_ascending_order() {
        let root = expanded_root(1.0 / 44.0);
        let spawn = |i: usize| {
            let item = root.edges().nth(i).unwrap();
            item.get_or_spawn_node(&root) as *const Node
        };
        let c2 = spawn(2);
        let c0 = spawn(0);
        let c1 = spawn(1);
        // Spawning again returns the same nodes.
        assert_eq!(spawn(2), c2);
        assert_eq!(spawn(0), c0);
        assert_eq!(spawn(1), c1);

        let indices: Vec<u16> = root.child_nodes().map(Node::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        for child in root.child_nodes() {
            assert!(ptr::eq(child.parent_raw(), &root));
        }
    }

    #[test]
    fn test_edges_walk_pairs_nodes_with_their_edges() {
        let root = expanded_root(1.0 / 44.0);
        for i in [1usize, 4, 7] {
            let item = root.edges().nth(i).unwrap();
            item.get_or_spawn_node(&root);
        }
        for (i, item) in root.edges().enumerate() {
            match i {
                1 | 4 | 7 => {
                    let node = item.node().expect("node should be materialized");
                    assert_eq!(node.index() as usize, i);
                    assert_eq!(root.edge_to(node).mv(false), item.edge().mv(false));
                }
                _ => assert!(item.node().is_none()),
            }
        }
    }

    #[test]
    fn test_make_terminal_sets_q() {
        let node = Node::new_root();
        node.make_terminal(GameResult::Draw);
        assert!(node.is_terminal());
        assert_eq!(node.q(), 0.0);

        let node = Node::new_root();
        node.make_terminal(GameResult::RedWon);
        assert!(node.is_terminal());
        assert_eq!(node.q(), 1.0);
    }

    #[test]
    fn test_depth_summaries() {
        let root = expanded_root(1.0 / 44.0);
        root.update_max_depth(3);
        root.update_max_depth(1);
        assert_eq!(root.max_depth(), 3);

        let item = root.edges().next().unwrap();
        let child = item.get_or_spawn_node(&root);
        let mut depth = 0;
        assert!(child.update_full_depth(&mut depth));
        assert_eq!(child.full_depth(), 1);
        // 43 sibling slots are unmaterialized, so the root's full depth
        // only reaches the single-increment level.
        let mut depth = 0;
        assert!(root.update_full_depth(&mut depth));
        assert_eq!(root.full_depth(), 1);
        let mut depth = 5;
        assert!(!root.update_full_depth(&mut depth));
    }

    #[test]
    fn test_release_children_except_one() {
        let mut root = expanded_root(1.0 / 44.0);
        let keep = {
            let spawn = |i: usize| {
                let item = root.edges().nth(i).unwrap();
                item.get_or_spawn_node(&root) as *const Node
            };
            spawn(0);
            let keep = spawn(5);
            spawn(9);
            keep
        };
        root.release_children_except_one(keep);
        let children: Vec<u16> = root.child_nodes().map(Node::index).collect();
        assert_eq!(children, vec![5]);

        root.release_children_except_one(ptr::null());
        assert_eq!(root.child_nodes().count(), 0);
    }

    #[test]
    fn test_deep_chain_drops_without_recursion() {
        let mut root = Node::new_root();
        let mv = Move::parse("e3e4").unwrap();
        let mut cursor = &mut root;
        for _ in 0..50_000 {
            cursor = cursor.create_single_child_node(mv);
        }
        drop(root); // must not overflow the stack
    }

    #[test]
    fn test_concurrent_score_updates_balance() {
        const THREADS: usize = 4;
        const VISITS: usize = 500;
        let root = expanded_root(1.0 / 44.0);
        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..VISITS {
                        while !root.try_start_score_update() {
                            std::thread::yield_now();
                        }
                        root.finalize_score_update(0.5);
                    }
                });
            }
        });
        assert_eq!(root.n(), (THREADS * VISITS) as u32);
        assert_eq!(root.n_in_flight(), 0);
        assert!((root.q() - 0.5).abs() < 1e-6);
    }
}
