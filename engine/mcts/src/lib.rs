//! Search-tree core for the xiangqi engine.
//!
//! This crate owns the MCTS tree itself, not the search: the node/edge
//! data model, the virtual-loss protocol that lets many workers select
//! and back up concurrently, incremental reuse of subtrees as the game
//! advances, background reclamation of detached subtrees, and the
//! extraction of training records from the accumulated statistics. PUCT
//! scoring, batching and inference live in the driver above.
//!
//! # A worker's life
//!
//! A search worker descends from the head through [`Node::edges`],
//! calling [`Node::try_start_score_update`] on every node it enters.
//! `false` means another worker already owns the expansion of that
//! unvisited node: back off and pick another path (cancelling the
//! virtual losses already taken). The worker that reaches a fresh leaf
//! expands it with [`Node::create_edges`], and the evaluation then flows
//! back up through [`Node::finalize_score_update`], leaf first.
//!
//! When a move is actually played, [`NodeTree::make_move`] keeps the
//! chosen child's subtree and hands everything else to the background
//! [`gc`] worker, so the reply arrives without waiting on a
//! multi-million-node teardown.

pub mod edge;
pub mod gc;
pub mod node;
pub mod training;
pub mod tree;

// Re-export main types
pub use edge::{Edge, EdgeList};
pub use gc::NodeGarbageCollector;
pub use node::{ChildNodes, EdgeAndNode, EdgeWalk, Node};
pub use training::{V3TrainingData, TRAINING_FORMAT_VERSION};
pub use tree::NodeTree;
