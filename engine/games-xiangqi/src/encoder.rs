//! Neural-network input planes for a position history.
//!
//! A 90-square occupancy does not fit one 64-bit word, so every piece
//! feature is emitted as two planes: squares 0-63 and squares 64-89. All
//! planes are oriented to the head position's side to move, mirroring the
//! plies where the opponent was the mover.

use crate::board::{Board, PieceKind, ALL_KINDS};
use crate::moves::{Square, SQUARES};
use crate::position::PositionHistory;

/// How many trailing plies feed the network.
pub const HISTORY_PLIES: usize = 8;
/// Piece features per position: 7 kinds for each side.
pub const FEATURES_PER_POSITION: usize = ALL_KINDS.len() * 2;
/// Planes per position: every feature needs two 64-bit words.
pub const PLANES_PER_POSITION: usize = FEATURES_PER_POSITION * 2;
/// Total number of planes produced for one history.
pub const INPUT_PLANE_COUNT: usize = HISTORY_PLIES * PLANES_PER_POSITION;

/// One 64-bit occupancy plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputPlane {
    pub mask: u64,
}

/// Encode the last `last_plies` positions of `history` as input planes.
///
/// Shorter games repeat the starting position so the output length is
/// always `last_plies * PLANES_PER_POSITION`.
pub fn encode_position_for_nn(history: &PositionHistory, last_plies: usize) -> Vec<InputPlane> {
    let positions = history.positions();
    assert!(!positions.is_empty(), "cannot encode an empty history");

    let head_black = history.last().is_black_to_move();
    let mut planes = Vec::with_capacity(last_plies * PLANES_PER_POSITION);

    for ply in 0..last_plies {
        let index = positions.len().saturating_sub(ply + 1);
        let position = &positions[index];
        let same_perspective = position.is_black_to_move() == head_black;

        for kind in ALL_KINDS {
            for ours in [true, false] {
                let mask = feature_mask(position.board(), kind, ours, same_perspective);
                planes.push(InputPlane { mask: mask as u64 });
                planes.push(InputPlane {
                    mask: (mask >> 64) as u64,
                });
            }
        }
    }

    planes
}

fn feature_mask(board: &Board, kind: PieceKind, ours: bool, same_perspective: bool) -> u128 {
    if same_perspective {
        board.kind_mask(kind, ours)
    } else {
        // The stored board belongs to the other mover: swap sides and
        // flip ranks to land in the head's frame.
        mirror_mask(board.kind_mask(kind, !ours))
    }
}

fn mirror_mask(mask: u128) -> u128 {
    let mut mirrored = 0u128;
    let mut remaining = mask;
    while remaining != 0 {
        let sq = remaining.trailing_zeros() as usize;
        remaining &= remaining - 1;
        mirrored |= 1 << Square::from_index(sq).mirror().index();
    }
    mirrored
}
