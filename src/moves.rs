use std::collections::VecDeque;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::bits::{Bitboard, Index, LazyBitboard, Position};
use crate::board::{ALL_DIRECTIONS, Board, Direction};
use crate::state::State;

/// A single primitive push: the box at `from` moves one cell in `dir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Push {
    pub from: Position,
    pub dir: Direction,
}

impl fmt::Display for Push {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Push {} {}", self.from, self.dir)
    }
}

/// A maximal same-box push sequence: the box at `box_from` ends at `box_to`
/// after one or more pushes, with the player repositioning freely in between
/// (no other box moves). `player_end` is the cell the player occupies after
/// the final push (the cell the box vacated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacroMove {
    pub box_from: Position,
    pub box_to: Position,
    pub player_end: Position,
}

impl fmt::Display for MacroMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Move {} -> {}", self.box_from, self.box_to)
    }
}

/// Enumerate every macro move available in `state`, ordered ascending by the
/// destination's Manhattan distance to the nearest unfilled goal (stable by
/// discovery order among ties).
pub fn macro_moves(board: &Board, state: &State) -> Vec<MacroMove> {
    let mut out = Vec::new();
    for idx in 0..state.box_count() {
        let start = state.box_position(Index(idx as u8));
        let bfs = box_push_bfs(board, state, start, None);
        for (dest, player_end) in bfs.dests {
            out.push(MacroMove {
                box_from: start,
                box_to: dest,
                player_end,
            });
        }
    }

    let unfilled: Vec<Position> = board
        .goals()
        .iter()
        .copied()
        .filter(|&g| !state.has_box_at(g))
        .collect();
    let nearest = |pos: Position| {
        unfilled
            .iter()
            .map(|&g| manhattan(g, pos))
            .min()
            .unwrap_or(0)
    };
    out.sort_by_key(|m| nearest(m.box_to));
    out
}

fn manhattan(a: Position, b: Position) -> u16 {
    a.0.abs_diff(b.0) as u16 + a.1.abs_diff(b.1) as u16
}

/// Re-derive the primitive push sequence of a macro move by re-running the
/// same BFS that generated it. Deterministic: the first discovery of the
/// destination is identical to the generator's.
pub fn push_path(board: &Board, state: &State, m: &MacroMove) -> Vec<Push> {
    let bfs = box_push_bfs(board, state, m.box_from, Some((m.box_to, m.player_end)));

    let mut key = (m.box_to, m.player_end);
    let mut pushes = Vec::new();
    while let Some(&(prev, dir)) = bfs.parents.get(&key) {
        pushes.push(Push { from: key.1, dir });
        key = prev;
    }
    assert!(
        key == (m.box_from, state.player()) && !pushes.is_empty(),
        "macro move {} is not reachable in this state",
        m
    );
    pushes.reverse();
    pushes
}

struct BoxBfs {
    // First-discovered destinations in discovery order, with the cell the
    // player holds after the final push
    dests: Vec<(Position, Position)>,
    // (box cell, player anchor) -> (predecessor pair, push direction)
    parents: FxHashMap<(Position, Position), ((Position, Position), Direction)>,
}

/// BFS over push states of a single moving box. A state is (box cell, player
/// anchor); the anchor is the player's position before any repositioning
/// (initially the state's player, afterwards the cell vacated by the last
/// push). All other boxes are fixed obstacles; the origin cell of the moving
/// box counts as free once vacated.
fn box_push_bfs(
    board: &Board,
    state: &State,
    start: Position,
    stop_at: Option<(Position, Position)>,
) -> BoxBfs {
    let mut bfs = BoxBfs {
        dests: Vec::new(),
        parents: FxHashMap::default(),
    };
    let mut dest_seen = LazyBitboard::new();
    let mut queued: FxHashSet<(Position, Position)> = FxHashSet::default();
    let mut queue: VecDeque<(Position, Position)> = VecDeque::new();

    let init = (start, state.player());
    queued.insert(init);
    queue.push_back(init);

    while let Some((box_pos, anchor)) = queue.pop_front() {
        // Player reachability with the moving box parked at box_pos; the
        // origin cell counts as free once the box has left it
        let mut zone = LazyBitboard::new();
        let mut walk = vec![anchor];
        zone.set(anchor);
        while let Some(pos) = walk.pop() {
            for dir in ALL_DIRECTIONS {
                let Some(next) = board.move_position(pos, dir) else {
                    continue;
                };
                if !board.is_open(next) || next == box_pos || zone.get(next) {
                    continue;
                }
                if state.has_box_at(next) && next != start {
                    continue;
                }
                zone.set(next);
                walk.push(next);
            }
        }

        for dir in ALL_DIRECTIONS {
            let Some(dest) = board.move_position(box_pos, dir) else {
                continue;
            };
            let Some(behind) = board.move_position(box_pos, dir.reverse()) else {
                continue;
            };
            if !board.is_open(dest) || (state.has_box_at(dest) && dest != start) {
                continue;
            }
            if !zone.get(behind) {
                continue;
            }

            let key = (dest, box_pos);
            if queued.insert(key) {
                bfs.parents.insert(key, ((box_pos, anchor), dir));
                // Path queries stop at the exact (cell, anchor) pair so the
                // parent chain is complete for reconstruction
                if stop_at == Some(key) {
                    return bfs;
                }
                queue.push_back(key);
            }
            if dest != start && !dest_seen.get(dest) {
                dest_seen.set(dest);
                bfs.dests.push((dest, box_pos));
            }
        }
    }

    bfs
}
