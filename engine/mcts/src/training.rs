//! Extraction of training records from the statistics on the tree.
//!
//! The record layout is fixed by the training pipeline: a version byte,
//! the visit distribution over the policy head, the bit-reversed input
//! planes, then the scalar flags. Xiangqi has no castling, but the four
//! castling flags stay in the record so the byte layout matches.

use games_xiangqi::{
    encode_position_for_nn, GameResult, PositionHistory, HISTORY_PLIES, INPUT_PLANE_COUNT,
    NN_POLICY_SIZE,
};

use crate::node::Node;

/// Version byte of the record format.
pub const TRAINING_FORMAT_VERSION: u8 = 3;

/// One self-play training record, extracted at a search head.
#[derive(Clone)]
pub struct V3TrainingData {
    pub version: u8,
    /// Visit fractions indexed by `Move::as_nn_index`.
    pub probabilities: [f32; NN_POLICY_SIZE],
    /// Input planes with bits reversed within each byte.
    pub planes: [u64; INPUT_PLANE_COUNT],
    pub castling_us_ooo: u8,
    pub castling_us_oo: u8,
    pub castling_them_ooo: u8,
    pub castling_them_oo: u8,
    /// 1 when Black is to move at the head.
    pub side_to_move: u8,
    pub rule50_count: u8,
    pub move_count: u8,
    /// Game outcome from the head's side-to-move perspective.
    pub result: i8,
}

impl V3TrainingData {
    /// Size of the encoded record in bytes.
    pub const ENCODED_SIZE: usize =
        1 + 4 * NN_POLICY_SIZE + 8 * INPUT_PLANE_COUNT + 4 + 1 + 1 + 1 + 1;

    /// Snapshot the visit distribution and encoded position at `head`.
    ///
    /// `head` must have completed at least one visit beyond its own
    /// expansion so the child visits have something to normalize by.
    pub fn from_head(head: &Node, game_result: GameResult, history: &PositionHistory) -> Self {
        // The first visit was the expansion of the head itself.
        let total_n = (head.n() - 1) as f32;
        let mut probabilities = [0.0f32; NN_POLICY_SIZE];
        for item in head.edges() {
            probabilities[item.edge().mv(false).as_nn_index()] = item.n() as f32 / total_n;
        }

        let input = encode_position_for_nn(history, HISTORY_PLIES);
        debug_assert_eq!(input.len(), INPUT_PLANE_COUNT);
        let mut planes = [0u64; INPUT_PLANE_COUNT];
        for (dst, plane) in planes.iter_mut().zip(input) {
            *dst = reverse_bits_in_bytes(plane.mask);
        }

        let position = history.last();
        let black_to_move = position.is_black_to_move();
        let result = match game_result {
            GameResult::RedWon => {
                if black_to_move {
                    -1
                } else {
                    1
                }
            }
            GameResult::BlackWon => {
                if black_to_move {
                    1
                } else {
                    -1
                }
            }
            GameResult::Draw | GameResult::Undecided => 0,
        };

        V3TrainingData {
            version: TRAINING_FORMAT_VERSION,
            probabilities,
            planes,
            castling_us_ooo: 0,
            castling_us_oo: 0,
            castling_them_ooo: 0,
            castling_them_oo: 0,
            side_to_move: black_to_move as u8,
            rule50_count: position.no_capture_ply().min(u8::MAX as u32) as u8,
            move_count: 0,
            result,
        }
    }

    /// Serialize the record little-endian in pipeline field order.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.reserve(Self::ENCODED_SIZE);
        out.push(self.version);
        for &p in self.probabilities.iter() {
            out.extend_from_slice(&p.to_le_bytes());
        }
        for &plane in self.planes.iter() {
            out.extend_from_slice(&plane.to_le_bytes());
        }
        out.push(self.castling_us_ooo);
        out.push(self.castling_us_oo);
        out.push(self.castling_them_ooo);
        out.push(self.castling_them_oo);
        out.push(self.side_to_move);
        out.push(self.rule50_count);
        out.push(self.move_count);
        out.extend_from_slice(&self.result.to_le_bytes());
    }
}

/// Reverse the bits within every byte of `v` (the training pipeline's
/// byte-level bit order).
fn reverse_bits_in_bytes(v: u64) -> u64 {
    let v = ((v >> 1) & 0x5555_5555_5555_5555) | ((v & 0x5555_5555_5555_5555) << 1);
    let v = ((v >> 2) & 0x3333_3333_3333_3333) | ((v & 0x3333_3333_3333_3333) << 2);
    ((v >> 4) & 0x0f0f_0f0f_0f0f_0f0f) | ((v & 0x0f0f_0f0f_0f0f_0f0f) << 4)
}
