//! Canonical-perspective xiangqi board: FEN parsing, legal move
//! generation and move application.
//!
//! The board always stores the position from the side to move's point of
//! view: "our" pieces start on ranks 0-4 and advance toward rank 9. The
//! `flipped` flag records whether the side at the bottom is actually
//! Black. Keeping one perspective here means the search tree never has to
//! reason about whose turn it is; mirroring happens at the boundaries.

use std::fmt;

use thiserror::Error;

use crate::hash;
use crate::moves::{Move, MoveList, Square, FILES, RANKS, SQUARES};

/// Starting position in xiangqi FEN.
pub const STARTING_FEN: &str =
    "rnbakabnr/9/1c5c1/p1p1p1p1p/9/9/P1P1P1P1P/1C5C1/9/RNBAKABNR w - - 0 1";

/// The seven xiangqi piece kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    Soldier,
    Cannon,
    Chariot,
    Horse,
    Elephant,
    Advisor,
    General,
}

/// All piece kinds in the order the encoder emits them.
pub const ALL_KINDS: [PieceKind; 7] = [
    PieceKind::Soldier,
    PieceKind::Cannon,
    PieceKind::Chariot,
    PieceKind::Horse,
    PieceKind::Elephant,
    PieceKind::Advisor,
    PieceKind::General,
];

/// A piece on the board, from the side to move's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub kind: PieceKind,
    pub ours: bool,
}

/// Errors produced while parsing a FEN string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FenError {
    #[error("FEN is missing the {0} field")]
    MissingField(&'static str),

    #[error("expected 10 ranks in the piece placement, found {0}")]
    BadRankCount(usize),

    #[error("rank {0} does not describe exactly 9 files")]
    BadFileCount(usize),

    #[error("unrecognized piece character '{0}'")]
    BadPiece(char),

    #[error("invalid side to move '{0}'")]
    BadSideToMove(String),

    #[error("invalid move counter '{0}'")]
    BadCounter(String),

    #[error("each side needs exactly one general")]
    MissingGeneral,
}

const ORTHOGONAL: [(i8, i8); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];
const DIAGONAL: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];
// (file step, rank step, leg file, leg rank)
const HORSE_JUMPS: [(i8, i8, i8, i8); 8] = [
    (1, 2, 0, 1),
    (-1, 2, 0, 1),
    (1, -2, 0, -1),
    (-1, -2, 0, -1),
    (2, 1, 1, 0),
    (2, -1, 1, 0),
    (-2, 1, -1, 0),
    (-2, -1, -1, 0),
];

/// The board proper.
#[derive(Clone, PartialEq, Eq)]
pub struct Board {
    squares: [Option<Piece>; SQUARES],
    flipped: bool,
}

impl Board {
    /// An empty board with Red (the unflipped side) to move.
    pub fn empty() -> Self {
        Board {
            squares: [None; SQUARES],
            flipped: false,
        }
    }

    /// The standard starting position.
    pub fn starting() -> Self {
        Board::from_fen(STARTING_FEN)
            .expect("starting FEN is valid")
            .0
    }

    /// Parse a FEN string into a canonical board plus the no-capture ply
    /// and full-move counters.
    pub fn from_fen(fen: &str) -> Result<(Board, u32, u32), FenError> {
        let mut parts = fen.split_whitespace();
        let placement = parts
            .next()
            .ok_or(FenError::MissingField("piece placement"))?;
        let side_to_move = parts.next().ok_or(FenError::MissingField("side to move"))?;
        // Castling and en-passant fields are carried by the notation but
        // meaningless in xiangqi.
        let _ = parts.next();
        let _ = parts.next();
        let parse_counter = |field: Option<&str>, default: u32| -> Result<u32, FenError> {
            match field {
                Some(s) => s.parse().map_err(|_| FenError::BadCounter(s.to_string())),
                None => Ok(default),
            }
        };
        let no_capture_ply = parse_counter(parts.next(), 0)?;
        let full_moves = parse_counter(parts.next(), 1)?;

        let rows: Vec<&str> = placement.split('/').collect();
        if rows.len() != RANKS as usize {
            return Err(FenError::BadRankCount(rows.len()));
        }

        let mut board = Board::empty();
        for (i, row) in rows.iter().enumerate() {
            // FEN lists ranks from Black's back rank down to Red's.
            let rank = RANKS - 1 - i as u8;
            let mut file = 0u8;
            for ch in row.chars() {
                if let Some(skip) = ch.to_digit(10) {
                    file += skip as u8;
                    continue;
                }
                let kind = match ch.to_ascii_lowercase() {
                    'k' => PieceKind::General,
                    'a' => PieceKind::Advisor,
                    'b' | 'e' => PieceKind::Elephant,
                    'n' | 'h' => PieceKind::Horse,
                    'r' => PieceKind::Chariot,
                    'c' => PieceKind::Cannon,
                    'p' => PieceKind::Soldier,
                    _ => return Err(FenError::BadPiece(ch)),
                };
                if file >= FILES {
                    return Err(FenError::BadFileCount(rank as usize));
                }
                board.squares[Square::new(file, rank).index()] = Some(Piece {
                    kind,
                    ours: ch.is_ascii_uppercase(),
                });
                file += 1;
            }
            if file != FILES {
                return Err(FenError::BadFileCount(rank as usize));
            }
        }

        match side_to_move {
            "w" | "r" => {}
            "b" => board.mirror(),
            other => return Err(FenError::BadSideToMove(other.to_string())),
        }

        if board.general(true).is_none() || board.general(false).is_none() {
            return Err(FenError::MissingGeneral);
        }

        Ok((board, no_capture_ply, full_moves))
    }

    /// Whether the side at the bottom of the canonical board is Black.
    #[inline]
    pub fn flipped(&self) -> bool {
        self.flipped
    }

    #[inline]
    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.index()]
    }

    /// Flip the board to the other player's perspective.
    pub fn mirror(&mut self) {
        for rank in 0..RANKS / 2 {
            for file in 0..FILES {
                let a = Square::new(file, rank).index();
                let b = Square::new(file, RANKS - 1 - rank).index();
                self.squares.swap(a, b);
            }
        }
        for square in self.squares.iter_mut() {
            if let Some(piece) = square {
                piece.ours = !piece.ours;
            }
        }
        self.flipped = !self.flipped;
    }

    /// Apply a move for the side to move without changing perspective.
    /// Returns true when the move captured a piece.
    pub fn apply_move(&mut self, mv: Move) -> bool {
        let capture = self.squares[mv.to_sq().index()].is_some();
        self.move_piece(mv);
        capture
    }

    fn move_piece(&mut self, mv: Move) {
        debug_assert!(
            matches!(self.squares[mv.from_sq().index()], Some(p) if p.ours),
            "no piece of ours on {}",
            mv.from_sq()
        );
        self.squares[mv.to_sq().index()] = self.squares[mv.from_sq().index()].take();
    }

    /// All legal moves for the side to move, in a deterministic order
    /// (ascending from-square, fixed direction order per piece).
    pub fn generate_moves(&self) -> MoveList {
        let mut moves = MoveList::new();
        self.pseudo_moves_into(true, &mut moves);
        moves.retain(|&mv| self.is_legal(mv));
        moves
    }

    /// Whether our general is currently attacked.
    pub fn is_check(&self) -> bool {
        match self.general(true) {
            Some(sq) => self.is_attacked(sq, false),
            None => false,
        }
    }

    /// Occupancy mask of one piece kind for one side, bit per square.
    pub fn kind_mask(&self, kind: PieceKind, ours: bool) -> u128 {
        let mut mask = 0u128;
        for (i, square) in self.squares.iter().enumerate() {
            if matches!(square, Some(p) if p.kind == kind && p.ours == ours) {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// Fingerprint of the piece placement and perspective.
    pub fn hash(&self) -> u64 {
        // 4 bits per square: 0 empty, 1-7 ours, 8-14 theirs.
        let mut words = [0u64; SQUARES / 16 + 1];
        for (i, square) in self.squares.iter().enumerate() {
            let code = match square {
                None => 0u64,
                Some(p) => p.kind as u64 + 1 + if p.ours { 0 } else { 7 },
            };
            words[i / 16] |= code << ((i % 16) * 4);
        }
        hash::hash_cat(hash::hash_all(words), self.flipped as u64)
    }

    fn general(&self, ours: bool) -> Option<Square> {
        self.squares.iter().position(|square| {
            matches!(square, Some(p) if p.kind == PieceKind::General && p.ours == ours)
        })
        .map(Square::from_index)
    }

    fn is_legal(&self, mv: Move) -> bool {
        let mut board = self.clone();
        board.move_piece(mv);
        let safe = match board.general(true) {
            Some(sq) => !board.is_attacked(sq, false),
            // Capturing the enemy general never occurs from a legal
            // position, and our own cannot disappear.
            None => true,
        };
        safe && !board.generals_facing()
    }

    fn is_attacked(&self, target: Square, by_ours: bool) -> bool {
        let mut moves = MoveList::new();
        self.pseudo_moves_into(by_ours, &mut moves);
        moves.iter().any(|mv| mv.to_sq() == target)
    }

    fn generals_facing(&self) -> bool {
        let (Some(ours), Some(theirs)) = (self.general(true), self.general(false)) else {
            return false;
        };
        if ours.file() != theirs.file() {
            return false;
        }
        let (low, high) = (ours.rank().min(theirs.rank()), ours.rank().max(theirs.rank()));
        (low + 1..high).all(|rank| self.piece_at(Square::new(ours.file(), rank)).is_none())
    }

    fn offset(sq: Square, df: i8, dr: i8) -> Option<Square> {
        let file = sq.file() as i8 + df;
        let rank = sq.rank() as i8 + dr;
        if (0..FILES as i8).contains(&file) && (0..RANKS as i8).contains(&rank) {
            Some(Square::new(file as u8, rank as u8))
        } else {
            None
        }
    }

    fn in_palace(sq: Square, ours: bool) -> bool {
        (3..=5).contains(&sq.file())
            && if ours {
                sq.rank() <= 2
            } else {
                sq.rank() >= RANKS - 3
            }
    }

    fn on_own_half(sq: Square, ours: bool) -> bool {
        if ours {
            sq.rank() < RANKS / 2
        } else {
            sq.rank() >= RANKS / 2
        }
    }

    /// Pseudo-legal moves for one side. `ours` pieces advance toward rank
    /// 9, `theirs` toward rank 0.
    fn pseudo_moves_into(&self, ours: bool, moves: &mut MoveList) {
        let forward: i8 = if ours { 1 } else { -1 };
        for index in 0..SQUARES {
            let from = Square::from_index(index);
            let piece = match self.squares[index] {
                Some(p) if p.ours == ours => p,
                _ => continue,
            };
            match piece.kind {
                PieceKind::General => {
                    for (df, dr) in ORTHOGONAL {
                        if let Some(to) = Self::offset(from, df, dr) {
                            if Self::in_palace(to, ours) {
                                self.push_step(from, to, ours, moves);
                            }
                        }
                    }
                }
                PieceKind::Advisor => {
                    for (df, dr) in DIAGONAL {
                        if let Some(to) = Self::offset(from, df, dr) {
                            if Self::in_palace(to, ours) {
                                self.push_step(from, to, ours, moves);
                            }
                        }
                    }
                }
                PieceKind::Elephant => {
                    for (df, dr) in DIAGONAL {
                        let eye = match Self::offset(from, df, dr) {
                            Some(sq) => sq,
                            None => continue,
                        };
                        let to = match Self::offset(from, df * 2, dr * 2) {
                            Some(sq) => sq,
                            None => continue,
                        };
                        if self.piece_at(eye).is_none() && Self::on_own_half(to, ours) {
                            self.push_step(from, to, ours, moves);
                        }
                    }
                }
                PieceKind::Horse => {
                    for (df, dr, leg_df, leg_dr) in HORSE_JUMPS {
                        let leg = match Self::offset(from, leg_df, leg_dr) {
                            Some(sq) => sq,
                            None => continue,
                        };
                        let to = match Self::offset(from, df, dr) {
                            Some(sq) => sq,
                            None => continue,
                        };
                        if self.piece_at(leg).is_none() {
                            self.push_step(from, to, ours, moves);
                        }
                    }
                }
                PieceKind::Chariot => {
                    for (df, dr) in ORTHOGONAL {
                        let mut cur = from;
                        while let Some(next) = Self::offset(cur, df, dr) {
                            cur = next;
                            match self.piece_at(cur) {
                                None => moves.push(Move::new(from, cur)),
                                Some(p) => {
                                    if p.ours != ours {
                                        moves.push(Move::new(from, cur));
                                    }
                                    break;
                                }
                            }
                        }
                    }
                }
                PieceKind::Cannon => {
                    for (df, dr) in ORTHOGONAL {
                        let mut cur = from;
                        let mut behind_screen = false;
                        while let Some(next) = Self::offset(cur, df, dr) {
                            cur = next;
                            match self.piece_at(cur) {
                                None => {
                                    if !behind_screen {
                                        moves.push(Move::new(from, cur));
                                    }
                                }
                                // First piece on the ray is the screen.
                                Some(_) if !behind_screen => behind_screen = true,
                                Some(p) => {
                                    if p.ours != ours {
                                        moves.push(Move::new(from, cur));
                                    }
                                    break;
                                }
                            }
                        }
                    }
                }
                PieceKind::Soldier => {
                    if let Some(to) = Self::offset(from, 0, forward) {
                        self.push_step(from, to, ours, moves);
                    }
                    if !Self::on_own_half(from, ours) {
                        for df in [-1, 1] {
                            if let Some(to) = Self::offset(from, df, 0) {
                                self.push_step(from, to, ours, moves);
                            }
                        }
                    }
                }
            }
        }
    }

    fn push_step(&self, from: Square, to: Square, ours: bool, moves: &mut MoveList) {
        match self.piece_at(to) {
            Some(p) if p.ours == ours => {}
            _ => moves.push(Move::new(from, to)),
        }
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rank in (0..RANKS).rev() {
            for file in 0..FILES {
                let ch = match self.piece_at(Square::new(file, rank)) {
                    None => '.',
                    Some(p) => {
                        let ch = match p.kind {
                            PieceKind::General => 'k',
                            PieceKind::Advisor => 'a',
                            PieceKind::Elephant => 'b',
                            PieceKind::Horse => 'n',
                            PieceKind::Chariot => 'r',
                            PieceKind::Cannon => 'c',
                            PieceKind::Soldier => 'p',
                        };
                        if p.ours {
                            ch.to_ascii_uppercase()
                        } else {
                            ch
                        }
                    }
                };
                write!(f, "{}", ch)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "flipped: {}", self.flipped)
    }
}
