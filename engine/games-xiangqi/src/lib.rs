//! Chinese chess (xiangqi) rules layer for the engine.
//!
//! Provides what the search tree consumes: a canonical-perspective board
//! with FEN parsing and deterministic legal move generation, an opaque
//! `Move` identity with side-to-move mirroring, position histories, and
//! the neural-network input encoder. The board is always stored from the
//! side to move's point of view; the `flipped` flag says whether that
//! side is Black.

pub mod board;
pub mod encoder;
pub mod hash;
pub mod moves;
pub mod position;

pub use board::{Board, FenError, Piece, PieceKind, ALL_KINDS, STARTING_FEN};
pub use encoder::{
    encode_position_for_nn, InputPlane, HISTORY_PLIES, INPUT_PLANE_COUNT, PLANES_PER_POSITION,
};
pub use moves::{Move, MoveList, MoveParseError, Square, NN_POLICY_SIZE, SQUARES};
pub use position::{GameResult, Position, PositionHistory};
