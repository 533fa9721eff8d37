use arrayvec::ArrayVec;

use crate::bits::{Bitboard, Bitvector, Index, LazyBitboard, Position};
use crate::board::{ALL_DIRECTIONS, Board, Direction, MAX_BOXES, MAX_SIZE};
use crate::zobrist::Zobrist;

pub const NO_BOX: Index = Index(255);

/// The dynamic half of a puzzle configuration: the box set (with a positional
/// index grid for O(1) lookups) and the player position. The search stores
/// only (boxes, canonical player) per node and restores them into a scratch
/// State before expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    boxes: ArrayVec<Position, MAX_BOXES>,
    // Maps board position to box index (NO_BOX = no box at this position)
    index: [[Index; MAX_SIZE]; MAX_SIZE],
    // Boxes that are not on goal positions
    unsolved: Bitvector,
    player: Position,
}

impl State {
    /// The initial configuration of a board.
    pub fn initial(board: &Board) -> Self {
        let mut state = State {
            boxes: ArrayVec::new(),
            index: [[NO_BOX; MAX_SIZE]; MAX_SIZE],
            unsolved: Bitvector::new(),
            player: board.player_start(),
        };
        for &pos in board.start_boxes() {
            state.add_box(pos, board.is_goal(pos));
        }
        state
    }

    /// Replace the dynamic contents with the given box set and player.
    pub fn reset(&mut self, board: &Board, boxes: &[Position], player: Position) {
        for &pos in &self.boxes {
            self.index[pos.1 as usize][pos.0 as usize] = NO_BOX;
        }
        self.boxes.clear();
        self.unsolved = Bitvector::new();
        self.player = player;
        for &pos in boxes {
            self.add_box(pos, board.is_goal(pos));
        }
    }

    fn add_box(&mut self, pos: Position, is_goal: bool) {
        let index = Index(self.boxes.len() as u8);
        self.index[pos.1 as usize][pos.0 as usize] = index;
        self.boxes.push(pos);
        if !is_goal {
            self.unsolved.add(index);
        }
    }

    pub fn player(&self) -> Position {
        self.player
    }

    pub fn set_player(&mut self, pos: Position) {
        self.player = pos;
    }

    pub fn box_positions(&self) -> &[Position] {
        &self.boxes
    }

    pub fn box_count(&self) -> usize {
        self.boxes.len()
    }

    /// Get the box index at the given position, if any.
    pub fn box_index(&self, pos: Position) -> Option<Index> {
        let idx = self.index[pos.1 as usize][pos.0 as usize];
        if idx == NO_BOX { None } else { Some(idx) }
    }

    pub fn has_box_at(&self, pos: Position) -> bool {
        self.index[pos.1 as usize][pos.0 as usize] != NO_BOX
    }

    /// Get the position of a box given its index.
    pub fn box_position(&self, box_index: Index) -> Position {
        self.boxes[box_index.0 as usize]
    }

    pub fn unsolved_boxes(&self) -> Bitvector {
        self.unsolved
    }

    /// All boxes sit on goals.
    pub fn is_solved(&self) -> bool {
        self.unsolved.is_empty()
    }

    /// Relocate the box at `from` to `to`, keeping the index grid and the
    /// unsolved set in sync. Returns the box's index.
    pub fn move_box(&mut self, board: &Board, from: Position, to: Position) -> Index {
        let idx = self.index[from.1 as usize][from.0 as usize];
        assert!(idx != NO_BOX, "no box at {}", from);
        assert!(
            !self.has_box_at(to) && board.is_open(to),
            "cannot move box to {}: destination blocked",
            to
        );

        self.boxes[idx.0 as usize] = to;
        self.index[from.1 as usize][from.0 as usize] = NO_BOX;
        self.index[to.1 as usize][to.0 as usize] = idx;

        if board.is_goal(from) {
            self.unsolved.add(idx);
        }
        if board.is_goal(to) {
            self.unsolved.remove(idx);
        }
        idx
    }

    /// Push the box at `from` one cell in `dir`; the player ends up where the
    /// box was. Panics if the push is geometrically invalid.
    pub fn push(&mut self, board: &Board, from: Position, dir: Direction) -> Index {
        let to = board
            .move_position(from, dir)
            .expect("push destination out of bounds");
        let idx = self.move_box(board, from, to);
        self.player = from;
        idx
    }

    /// Is the cell blocked for the player (wall or box)?
    pub fn is_blocked(&self, board: &Board, pos: Position) -> bool {
        !board.is_open(pos) || self.has_box_at(pos)
    }

    /// Flood-fill the region the player can currently reach (boxes block).
    pub fn player_zone(&self, board: &Board) -> LazyBitboard {
        let mut zone = LazyBitboard::new();
        let mut stack = vec![self.player];
        zone.set(self.player);
        while let Some(pos) = stack.pop() {
            for dir in ALL_DIRECTIONS {
                if let Some(next) = board.move_position(pos, dir) {
                    if board.is_open(next) && !self.has_box_at(next) && !zone.get(next) {
                        zone.set(next);
                        stack.push(next);
                    }
                }
            }
        }
        zone
    }

    /// The lexicographically smallest cell of the player's zone. Two states
    /// with the same boxes and overlapping zones share this cell.
    pub fn canonical_player(&self, board: &Board) -> Position {
        self.player_zone(board)
            .top_left()
            .expect("player zone cannot be empty")
    }

    /// Box positions in sorted order, suitable for node storage and equality
    /// comparison independent of box numbering.
    pub fn sorted_boxes(&self) -> ArrayVec<Position, MAX_BOXES> {
        let mut sorted = self.boxes.clone();
        sorted.sort_unstable();
        sorted
    }

    /// Stable fingerprint of (boxes, canonical player).
    pub fn canonical_hash(&self, board: &Board, zobrist: &Zobrist) -> u64 {
        zobrist.state_hash(&self.boxes, self.canonical_player(board))
    }
}
