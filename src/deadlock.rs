use std::collections::VecDeque;
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::bits::{Bitboard, Bitvector, Index, LazyBitboard, Position};
use crate::board::{ALL_DIRECTIONS, Board, Direction, MAX_BOXES};
use crate::matching::has_perfect_matching;
use crate::moves::MacroMove;
use crate::state::State;
use crate::zobrist::Zobrist;

const CORRAL_MAX_NODES: usize = 1000;
const CORRAL_MAX_TIME: Duration = Duration::from_millis(10);

/// Verdict for a candidate macro move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveClass {
    Ok,
    DeadSquare,
    Freeze,
    Corral,
    Bipartite,
}

/// Runs the four deadlock checks, cheapest first. Dead squares and freezes
/// are always on; corral and bipartite are configurable and skipped once a
/// node's pruning budget runs out.
pub struct DeadlockDetector {
    enable_corral: bool,
    enable_bipartite: bool,
    // Corral verdicts keyed by a signature over the involved cells, shared
    // across states
    corral_cache: FxHashMap<u64, bool>,
}

impl DeadlockDetector {
    pub fn new(enable_corral: bool, enable_bipartite: bool) -> Self {
        DeadlockDetector {
            enable_corral,
            enable_bipartite,
            corral_cache: FxHashMap::default(),
        }
    }

    /// Classify a macro move from the configuration in `state`. Returns
    /// `DeadSquare` without touching `state`; for every other verdict the
    /// move has been applied to `state` on return (the caller keeps the
    /// applied state on `Ok` and resets it otherwise).
    pub fn classify_move(
        &mut self,
        board: &Board,
        zobrist: &Zobrist,
        state: &mut State,
        m: &MacroMove,
        allow_expensive: bool,
    ) -> MoveClass {
        if board.is_push_dead_square(m.box_to) {
            return MoveClass::DeadSquare;
        }

        let pushed = state.move_box(board, m.box_from, m.box_to);
        state.set_player(m.player_end);

        let frozen = frozen_boxes_after_push(board, state, pushed);
        if state.unsolved_boxes().contains_any(&frozen) {
            return MoveClass::Freeze;
        }

        if allow_expensive {
            if self.enable_corral && self.corral_deadlock(board, zobrist, state, m.box_to) {
                return MoveClass::Corral;
            }
            if self.enable_bipartite && bipartite_deadlock(board, state) {
                return MoveClass::Bipartite;
            }
        }

        MoveClass::Ok
    }

    /// Check the initial position before any search: a box on a dead square,
    /// a frozen box off goal, or an infeasible box/goal assignment means the
    /// puzzle cannot be solved at all.
    pub fn start_deadlocked(&mut self, board: &Board, state: &State) -> Option<MoveClass> {
        for &pos in state.box_positions() {
            if board.is_push_dead_square(pos) {
                return Some(MoveClass::DeadSquare);
            }
        }
        let frozen = frozen_boxes(board, state);
        if state.unsolved_boxes().contains_any(&frozen) {
            return Some(MoveClass::Freeze);
        }
        if self.enable_bipartite && bipartite_deadlock(board, state) {
            return Some(MoveClass::Bipartite);
        }
        None
    }

    /// Check for corral deadlocks around the freshly pushed box at
    /// `pushed_to`: any adjacent player-unreachable region gets a bounded
    /// side-search over its boxes.
    pub(crate) fn corral_deadlock(
        &mut self,
        board: &Board,
        zobrist: &Zobrist,
        state: &State,
        pushed_to: Position,
    ) -> bool {
        let zone = state.player_zone(board);
        let mut checked = LazyBitboard::new();

        for dir in ALL_DIRECTIONS {
            let Some(seed) = board.move_position(pushed_to, dir) else {
                continue;
            };
            if !board.is_open(seed)
                || zone.get(seed)
                || state.has_box_at(seed)
                || checked.get(seed)
            {
                continue;
            }
            if self.corral_region_deadlocked(board, zobrist, state, seed, &zone, &mut checked) {
                return true;
            }
        }
        false
    }

    fn corral_region_deadlocked(
        &mut self,
        board: &Board,
        zobrist: &Zobrist,
        state: &State,
        seed: Position,
        zone: &LazyBitboard,
        checked: &mut LazyBitboard,
    ) -> bool {
        // Flood the player-unreachable region, passing through boxes; the
        // boxes met on the way are the corral's boxes.
        let mut region = LazyBitboard::new();
        let mut corral_boxes = Bitvector::new();
        let mut trapped_off_goal = false;
        let mut signature = 0u64;
        let mut stack = vec![seed];
        region.set(seed);
        checked.set(seed);

        while let Some(pos) = stack.pop() {
            signature ^= zobrist.player_hash(pos);
            if let Some(idx) = state.box_index(pos) {
                corral_boxes.add(idx);
                signature ^= zobrist.box_hash(pos);
                if !board.is_goal(pos) {
                    trapped_off_goal = true;
                }
            }

            for dir in ALL_DIRECTIONS {
                if let Some(next) = board.move_position(pos, dir) {
                    if board.is_open(next) && !zone.get(next) && !region.get(next) {
                        region.set(next);
                        checked.set(next);
                        stack.push(next);
                    }
                }
            }
        }

        // Only an off-goal box inside the corral makes it provably hopeless:
        // the side-search models every way that box could escape or pack. A
        // corral that merely contains empty goals may still be filled from
        // the outside, which the side-search does not model.
        if !trapped_off_goal {
            return false;
        }

        if let Some(&verdict) = self.corral_cache.get(&signature) {
            return verdict;
        }

        match corral_side_search(board, zobrist, state, &region, corral_boxes) {
            Some(deadlock) => {
                self.corral_cache.insert(signature, deadlock);
                deadlock
            }
            // Budget exhausted: inconclusive, and not worth caching
            None => false,
        }
    }
}

/// Bounded search over the corral's boxes only. Success is pushing any
/// corral box out of the region or onto a goal. The player is handled
/// optimistically: a pushing side outside the corral counts as reachable
/// even when boxes currently bar the way, so a completed search without an
/// escape is a deadlock no outside rearrangement can fix. Returns None when
/// the node or time budget runs out before a verdict.
fn corral_side_search(
    board: &Board,
    zobrist: &Zobrist,
    state: &State,
    region: &LazyBitboard,
    corral_boxes: Bitvector,
) -> Option<bool> {
    let deadline = Instant::now() + CORRAL_MAX_TIME;
    let mut scratch = state.clone();
    let mut visited: FxHashSet<u64> = FxHashSet::default();
    let mut queue: VecDeque<(ArrayVec<Position, MAX_BOXES>, Position)> = VecDeque::new();

    let start_boxes: ArrayVec<Position, MAX_BOXES> =
        state.box_positions().iter().copied().collect();
    visited.insert(zobrist.state_hash(&start_boxes, state.player()));
    queue.push_back((start_boxes, state.player()));

    let mut expanded = 0;
    while let Some((boxes, player)) = queue.pop_front() {
        if expanded >= CORRAL_MAX_NODES || Instant::now() > deadline {
            return None;
        }
        expanded += 1;

        scratch.reset(board, &boxes, player);
        let zone = scratch.player_zone(board);

        for idx in corral_boxes.iter() {
            let box_pos = scratch.box_position(idx);
            for dir in ALL_DIRECTIONS {
                let Some(dest) = board.move_position(box_pos, dir) else {
                    continue;
                };
                let Some(behind) = board.move_position(box_pos, dir.reverse()) else {
                    continue;
                };
                if !board.is_open(dest) || !board.is_open(behind) {
                    continue;
                }
                // The pushing side must be reachable now or lie outside the
                // corral, where cells may open up as outside boxes move
                if region.get(behind) && !zone.get(behind) {
                    continue;
                }
                if !region.get(dest) || board.is_goal(dest) {
                    // A corral box escapes (or packs): no deadlock here
                    return Some(false);
                }
                if scratch.has_box_at(dest) || board.is_push_dead_square(dest) {
                    continue;
                }

                let mut child = boxes.clone();
                child[idx.0 as usize] = dest;
                let hash = zobrist.state_hash(&child, box_pos);
                if visited.insert(hash) {
                    queue.push_back((child, box_pos));
                }
            }
        }
    }

    // Every reachable corral configuration explored, no escape
    Some(true)
}

/// No perfect matching between boxes and goals means some box can never be
/// packed. Frozen boxes only match the goal they already sit on.
fn bipartite_deadlock(board: &Board, state: &State) -> bool {
    let n = state.box_count();
    if n == 0 {
        return false;
    }

    let frozen = frozen_boxes(board, state);
    let mut adjacency: ArrayVec<Bitvector, MAX_BOXES> = ArrayVec::new();
    for i in 0..n {
        let idx = Index(i as u8);
        let pos = state.box_position(idx);
        let mut adj = Bitvector::new();
        if frozen.contains(idx) {
            if let Some(g) = board.goal_at(pos) {
                adj.add(Index(g as u8));
            }
        } else {
            for g in 0..n {
                if board.goal_distance(g, pos) < u16::MAX {
                    adj.add(Index(g as u8));
                }
            }
        }
        adjacency.push(adj);
    }

    !has_perfect_matching(&adjacency)
}

/// The two push axes of a box.
#[derive(Debug, Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

impl Axis {
    fn sides(self) -> [Direction; 2] {
        match self {
            Axis::Horizontal => [Direction::Left, Direction::Right],
            Axis::Vertical => [Direction::Up, Direction::Down],
        }
    }
}

/// All frozen boxes in the state. A box is frozen when neither of its axes
/// can ever move it; an axis is immovable behind a wall, between dead
/// squares, or against a neighbor box that is itself frozen. Mutually
/// blocking groups count as frozen, so the solve starts from "everything
/// frozen" and releases boxes until a sweep changes nothing.
pub fn frozen_boxes(board: &Board, state: &State) -> Bitvector {
    frozen_subset(board, state, Bitvector::full(state.box_count() as u8))
}

/// The frozen boxes among the cluster around a freshly pushed box. Boxes
/// not touching the cluster cannot have changed, so this is the per-move
/// form of the check.
pub fn frozen_boxes_after_push(board: &Board, state: &State, pushed: Index) -> Bitvector {
    frozen_subset(board, state, box_cluster(board, state, pushed))
}

fn frozen_subset(board: &Board, state: &State, members: Bitvector) -> Bitvector {
    let mut frozen = members;
    loop {
        let mut changed = false;
        for idx in frozen.iter() {
            let pos = state.box_position(idx);
            if axis_open(board, state, &frozen, pos, Axis::Horizontal)
                || axis_open(board, state, &frozen, pos, Axis::Vertical)
            {
                frozen.remove(idx);
                changed = true;
            }
        }
        if !changed {
            return frozen;
        }
    }
}

/// Can the box at `pos` still move along `axis`, assuming the boxes in
/// `frozen` stay put? Both sides must be open cells free of frozen boxes,
/// and at least one side must not be a dead square (a box shuttling between
/// two dead squares is as stuck as one against a wall).
fn axis_open(
    board: &Board,
    state: &State,
    frozen: &Bitvector,
    pos: Position,
    axis: Axis,
) -> bool {
    let mut dead_sides = 0;
    for dir in axis.sides() {
        let Some(side) = board.move_position(pos, dir) else {
            return false;
        };
        if !board.is_open(side) {
            return false;
        }
        if let Some(neighbor) = state.box_index(side) {
            if frozen.contains(neighbor) {
                return false;
            }
        }
        if board.is_push_dead_square(side) {
            dead_sides += 1;
        }
    }
    dead_sides < 2
}

/// The connected component of boxes (4-adjacency) containing `seed`.
fn box_cluster(board: &Board, state: &State, seed: Index) -> Bitvector {
    let mut members = Bitvector::new();
    let mut pending = vec![seed];
    members.add(seed);

    while let Some(idx) = pending.pop() {
        let pos = state.box_position(idx);
        for dir in ALL_DIRECTIONS {
            if let Some(next) = board.move_position(pos, dir) {
                if let Some(other) = state.box_index(next) {
                    if !members.contains(other) {
                        members.add(other);
                        pending.push(other);
                    }
                }
            }
        }
    }

    members
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> (Board, State) {
        let board = Board::from_text(text.trim_matches('\n')).unwrap();
        let state = State::initial(&board);
        (board, state)
    }

    #[test]
    fn test_frozen_corner_box() {
        let (board, state) = parse(
            r#"
######
#$*  #
#@ . #
######
"#,
        );
        let frozen = frozen_boxes(&board, &state);
        // The corner box is frozen by walls; its neighbor is frozen against it
        assert_eq!(frozen.len(), 2);
        assert!(state.unsolved_boxes().contains_any(&frozen));
    }

    #[test]
    fn test_frozen_by_dead_square_pair() {
        // The box under the top wall has open cells on both sides, but both
        // are dead squares, so it counts as frozen horizontally too
        let (board, state) = parse(
            r#"
#######
# $   #
#@  . #
#######
"#,
        );
        assert!(board.is_push_dead_square(Position(1, 1)));
        assert!(board.is_push_dead_square(Position(3, 1)));

        let frozen = frozen_boxes(&board, &state);
        assert!(frozen.contains(state.box_index(Position(2, 1)).unwrap()));
    }

    #[test]
    fn test_free_box_not_frozen() {
        let (board, state) = parse(
            r#"
######
#    #
# $. #
# @  #
######
"#,
        );
        let frozen = frozen_boxes(&board, &state);
        assert!(frozen.is_empty());
    }

    #[test]
    fn test_mutual_freeze_on_goals_is_safe() {
        // Two boxes frozen against each other, both on goals
        let (board, state) = parse(
            r#"
######
#**  #
#@   #
######
"#,
        );
        let frozen = frozen_boxes(&board, &state);
        assert_eq!(frozen.len(), 2);
        assert!(!state.unsolved_boxes().contains_any(&frozen));

        let mut detector = DeadlockDetector::new(true, true);
        assert_eq!(detector.start_deadlocked(&board, &state), None);
    }

    #[test]
    fn test_start_dead_square() {
        // Box already in a goal-less corner
        let (board, state) = parse(
            r#"
#####
#$  #
#@ .#
#####
"#,
        );
        let mut detector = DeadlockDetector::new(true, true);
        assert_eq!(
            detector.start_deadlocked(&board, &state),
            Some(MoveClass::DeadSquare)
        );
    }

    #[test]
    fn test_classify_dead_square_push() {
        let (board, mut state) = parse(
            r#"
#####
#@$ #
#  .#
#####
"#,
        );
        let mut detector = DeadlockDetector::new(true, true);
        let m = MacroMove {
            box_from: Position(2, 1),
            box_to: Position(3, 1),
            player_end: Position(2, 1),
        };
        assert_eq!(
            detector.classify_move(&board, &Zobrist::new(0), &mut state, &m, true),
            MoveClass::DeadSquare
        );
        // The state is untouched on a dead-square verdict
        assert!(state.has_box_at(Position(2, 1)));
    }

    #[test]
    fn test_classify_freeze_push() {
        // Pushing the left box against the one on the goal pins both under
        // the top wall; the pushed box is off goal
        let (board, mut state) = parse(
            r#"
#######
#@$ * #
#   . #
#######
"#,
        );
        let mut detector = DeadlockDetector::new(false, false);
        let m = MacroMove {
            box_from: Position(2, 1),
            box_to: Position(3, 1),
            player_end: Position(2, 1),
        };
        let class = detector.classify_move(&board, &Zobrist::new(0), &mut state, &m, true);
        assert_eq!(class, MoveClass::Freeze);
    }

    #[test]
    fn test_bipartite_infeasible() {
        // The goal at (1,1) cannot be approached by any push (walls block
        // both pushing lanes), so both boxes compete for the other goal
        let (board, state) = parse(
            r#"
######
#. ###
## $ #
#@$. #
######
"#,
        );
        assert!(bipartite_deadlock(&board, &state));

        let mut detector = DeadlockDetector::new(true, true);
        assert_eq!(
            detector.start_deadlocked(&board, &state),
            Some(MoveClass::Bipartite)
        );
    }

    #[test]
    fn test_corral_deadlock_detected() {
        // Surgery: seal the top-left corner cell behind two boxes the player
        // cannot usefully push (every push lands on a dead square)
        let (board, mut state) = parse(
            r#"
#######
#     #
#     #
#...  #
#@ $$$#
#######
"#,
        );
        state.reset(
            &board,
            &[Position(2, 1), Position(1, 2), Position(5, 1)],
            Position(5, 3),
        );
        let zobrist = Zobrist::new(0);
        let mut detector = DeadlockDetector::new(true, true);
        assert!(detector.corral_deadlock(&board, &zobrist, &state, Position(2, 1)));
        // The verdict is cached by the corral signature
        assert_eq!(detector.corral_cache.len(), 1);
        assert!(detector.corral_deadlock(&board, &zobrist, &state, Position(2, 1)));
    }

    #[test]
    fn test_corral_escape_not_deadlock() {
        // The sealed cell is a goal: pushing a boundary box onto it succeeds
        let (board, mut state) = parse(
            r#"
#######
#.    #
#     #
# ..  #
#@ $$$#
#######
"#,
        );
        state.reset(
            &board,
            &[Position(2, 1), Position(1, 2), Position(5, 1)],
            Position(5, 3),
        );
        let zobrist = Zobrist::new(0);
        let mut detector = DeadlockDetector::new(true, true);
        assert!(!detector.corral_deadlock(&board, &zobrist, &state, Position(2, 1)));
    }
}
