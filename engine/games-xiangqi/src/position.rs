//! Game positions and the move history leading to them.

use crate::board::Board;
use crate::hash;
use crate::moves::Move;

/// Outcome of a finished game, in absolute colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Undecided,
    RedWon,
    Draw,
    BlackWon,
}

/// A board plus the counters that are not part of the piece placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    board: Board,
    no_capture_ply: u32,
    game_ply: u32,
}

impl Position {
    pub fn new(board: Board, no_capture_ply: u32, game_ply: u32) -> Self {
        Position {
            board,
            no_capture_ply,
            game_ply,
        }
    }

    /// The position after playing `mv`, seen from the next mover's
    /// perspective.
    pub fn play(&self, mv: Move) -> Position {
        let mut board = self.board.clone();
        let capture = board.apply_move(mv);
        board.mirror();
        Position {
            board,
            no_capture_ply: if capture { 0 } else { self.no_capture_ply + 1 },
            game_ply: self.game_ply + 1,
        }
    }

    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Whether Black is the side to move.
    #[inline]
    pub fn is_black_to_move(&self) -> bool {
        self.board.flipped()
    }

    #[inline]
    pub fn no_capture_ply(&self) -> u32 {
        self.no_capture_ply
    }

    #[inline]
    pub fn game_ply(&self) -> u32 {
        self.game_ply
    }

    /// Fingerprint covering placement, perspective and the rule counter.
    pub fn fingerprint(&self) -> u64 {
        hash::hash_cat(self.board.hash(), self.no_capture_ply as u64)
    }
}

/// The ordered positions from the start of the game to the current head.
#[derive(Debug, Clone, Default)]
pub struct PositionHistory {
    positions: Vec<Position>,
}

impl PositionHistory {
    pub fn new() -> Self {
        PositionHistory {
            positions: Vec::new(),
        }
    }

    /// The position the game began from.
    pub fn starting(&self) -> &Position {
        self.positions.first().expect("history is empty")
    }

    /// The current (head) position.
    pub fn last(&self) -> &Position {
        self.positions.last().expect("history is empty")
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Play a move from the last position and push the result.
    pub fn append(&mut self, mv: Move) {
        let next = self.last().play(mv);
        self.positions.push(next);
    }

    /// Restart the history from a fresh starting position.
    pub fn reset(&mut self, board: Board, no_capture_ply: u32, game_ply: u32) {
        self.positions.clear();
        self.positions
            .push(Position::new(board, no_capture_ply, game_ply));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::STARTING_FEN;

    fn start_history() -> PositionHistory {
        let (board, no_capture_ply, _) = Board::from_fen(STARTING_FEN).unwrap();
        let mut history = PositionHistory::new();
        history.reset(board, no_capture_ply, 0);
        history
    }

    #[test]
    fn test_play_alternates_perspective() {
        let mut history = start_history();
        assert!(!history.last().is_black_to_move());
        history.append(Move::parse("b2e2").unwrap());
        assert!(history.last().is_black_to_move());
        history.append(Move::parse("h2e2").unwrap());
        assert!(!history.last().is_black_to_move());
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().game_ply(), 2);
    }

    #[test]
    fn test_no_capture_counter_resets_on_capture() {
        let mut history = start_history();
        history.append(Move::parse("b2e2").unwrap());
        assert_eq!(history.last().no_capture_ply(), 1);
        // Black replies in its own (mirrored) coordinates; a quiet horse
        // development keeps the counter running.
        history.append(Move::parse("b0c2").unwrap());
        assert_eq!(history.last().no_capture_ply(), 2);
        // The centre cannon takes the black soldier on e6 over the e3
        // screen.
        history.append(Move::parse("e2e6").unwrap());
        assert_eq!(history.last().no_capture_ply(), 0);
    }

    #[test]
    fn test_reset_clears_previous_line() {
        let mut history = start_history();
        history.append(Move::parse("b2e2").unwrap());
        let (board, _, _) = Board::from_fen(STARTING_FEN).unwrap();
        history.reset(board, 0, 0);
        assert_eq!(history.len(), 1);
        assert_eq!(history.starting(), history.last());
    }

    /// Play random legal games and verify the rules invariants hold at
    /// every ply.
    #[test]
    fn test_random_playouts_keep_invariants() {
        use crate::board::PieceKind;
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha20Rng;

        for seed in 0..20 {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let mut position = Position::new(Board::starting(), 0, 0);

            for ply in 0..80 {
                let moves = position.board().generate_moves();
                if moves.is_empty() {
                    break;
                }
                let mv = moves[rng.gen_range(0..moves.len())];
                let next = position.play(mv);

                assert_eq!(
                    next.is_black_to_move(),
                    !position.is_black_to_move(),
                    "perspective must alternate (seed={}, ply={})",
                    seed,
                    ply
                );
                for ours in [true, false] {
                    assert_eq!(
                        next.board().kind_mask(PieceKind::General, ours).count_ones(),
                        1,
                        "a general vanished (seed={}, ply={})",
                        seed,
                        ply
                    );
                }
                assert!(
                    next.no_capture_ply() == 0
                        || next.no_capture_ply() == position.no_capture_ply() + 1
                );
                position = next;
            }
        }
    }

    #[test]
    fn test_fingerprint_tracks_state() {
        let history = start_history();
        let a = history.last().fingerprint();
        assert_eq!(a, history.last().fingerprint());

        let next = history.last().play(Move::parse("b2e2").unwrap());
        assert_ne!(a, next.fingerprint());
    }
}
