//! Tree ownership and game-play reuse.
//!
//! `NodeTree` owns the root of the whole game tree and tracks the
//! current search head somewhere on the spine below it. Playing a move
//! keeps the chosen child's subtree and hands everything else to the
//! garbage collector; resetting to a position replays the game and only
//! rebuilds what actually diverged.

use std::ptr;

use tracing::{debug, trace};

use games_xiangqi::{Board, FenError, Move, Position, PositionHistory};

use crate::gc;
use crate::node::Node;

/// Owner of the game tree and the current search head.
///
/// All operations here run on the single driver thread, between
/// searches; only the nodes themselves are shared with workers.
pub struct NodeTree {
    gamebegin_node: Option<Box<Node>>,
    current_head: *mut Node,
    history: PositionHistory,
}

unsafe impl Send for NodeTree {}

impl NodeTree {
    pub fn new() -> Self {
        NodeTree {
            gamebegin_node: None,
            current_head: ptr::null_mut(),
            history: PositionHistory::new(),
        }
    }

    /// The node the next search starts from.
    pub fn current_head(&self) -> &Node {
        unsafe { self.current_head.as_ref() }.expect("tree is not initialized")
    }

    pub fn is_initialized(&self) -> bool {
        !self.current_head.is_null()
    }

    pub fn history(&self) -> &PositionHistory {
        &self.history
    }

    /// The position at the current head.
    pub fn head_position(&self) -> &Position {
        self.history.last()
    }

    /// Advance the head by one (absolute-perspective) move.
    ///
    /// The move is canonicalised to the stored perspective first. If the
    /// head has a matching edge its (possibly fresh) child becomes the
    /// new head and every sibling subtree is released; a move without an
    /// edge extends an unexpanded head with a singleton child.
    pub fn make_move(&mut self, mut mv: Move) {
        assert!(self.is_initialized(), "tree is not initialized");
        if self.head_position().is_black_to_move() {
            mv = mv.mirror();
        }

        let mut new_head: *const Node = ptr::null();
        {
            let head = unsafe { &*self.current_head };
            for item in head.edges() {
                if item.edge().mv(false) == mv {
                    new_head = item.get_or_spawn_node(head);
                    break;
                }
            }
        }

        let head = unsafe { &mut *self.current_head };
        head.release_children_except_one(new_head);
        self.current_head = if new_head.is_null() {
            head.create_single_child_node(mv) as *mut Node
        } else {
            new_head as *mut Node
        };
        self.history.append(mv);
        trace!(
            mv = %mv,
            fingerprint = self.head_position().fingerprint(),
            "advanced head"
        );
    }

    /// Clear everything below the head and reset its statistics, keeping
    /// its place in the parent's sibling chain. Used when the previous
    /// search state would mislead the next search.
    pub fn trim_tree_at_head(&mut self) {
        let head = unsafe { self.current_head.as_mut() }.expect("tree is not initialized");
        let sibling = head.take_sibling();
        gc::global().add_to_queue(head.take_child());
        *head = Node::new(head.parent_raw(), head.index());
        head.set_sibling(sibling);
    }

    /// Point the tree at `starting_fen` plus `moves`.
    ///
    /// A different starting board deallocates the whole tree; otherwise
    /// the moves are replayed through `make_move`, reusing every subtree
    /// on the way. When the previous head is not on the replayed line
    /// the new head is trimmed so the next search starts clean.
    pub fn reset_to_position(
        &mut self,
        starting_fen: &str,
        moves: &[Move],
    ) -> Result<(), FenError> {
        let (starting_board, no_capture_ply, full_moves) = Board::from_fen(starting_fen)?;
        if self.gamebegin_node.is_some() && self.history.starting().board() != &starting_board {
            debug!("starting position changed, rebuilding the tree");
            self.deallocate_tree();
        }

        if self.gamebegin_node.is_none() {
            self.gamebegin_node = Some(Box::new(Node::new_root()));
        }

        let game_ply = full_moves.max(1) * 2 - if starting_board.flipped() { 1 } else { 2 };
        self.history.reset(starting_board, no_capture_ply, game_ply);

        let old_head = self.current_head;
        self.current_head = &mut **self.gamebegin_node.as_mut().unwrap() as *mut Node;
        let mut seen_old_head = ptr::eq(self.current_head, old_head);
        for &mv in moves {
            self.make_move(mv);
            if ptr::eq(old_head, self.current_head) {
                seen_old_head = true;
            }
        }

        // Not seeing the old head means the new line is shorter than or
        // divergent from the previous one; its statistics would mislead
        // the next search.
        if !seen_old_head {
            self.trim_tree_at_head();
        }
        Ok(())
    }

    /// Hand the whole tree to the collector.
    pub fn deallocate_tree(&mut self) {
        gc::global().add_to_queue(self.gamebegin_node.take());
        self.current_head = ptr::null_mut();
    }
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NodeTree {
    fn drop(&mut self) {
        self.deallocate_tree();
    }
}
