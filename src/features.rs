use arrayvec::ArrayVec;

use crate::bits::{Bitboard, Bitvector, Index, Position, RawBitboard};
use crate::board::{ALL_DIRECTIONS, Board, MAX_BOXES, MAX_SIZE};
use crate::moves::MacroMove;
use crate::state::State;

/// How many of the best-ordered candidate moves the flood-fill advisors are
/// willing to evaluate per node.
const ADVISOR_CANDIDATES: usize = 10;

/// A cell of the four-dimensional feature space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureCoord {
    /// Boxes packed in packing-order prefix
    pub pack: u8,
    /// Connected components of floor minus boxes
    pub conn: u16,
    /// Room links (tunnel cells) obstructed by a box
    pub rooms: u8,
    /// Boxes on out-of-plan cells for the current packing stage
    pub oop: u8,
}

/// One-time per-board pre-analysis: the packing order and the per-stage
/// out-of-plan cell tables.
pub struct Analysis {
    packing_order: ArrayVec<Position, MAX_BOXES>,
    // oop_cells[k]: cells from which a lone box can no longer reach any goal
    // of packing_order[k..] once the first k goals are treated as walls
    oop_cells: Vec<RawBitboard>,
}

impl Analysis {
    pub fn new(board: &Board) -> Self {
        let packing_order = compute_packing_order(board);
        let oop_cells = compute_oop_cells(board, &packing_order);
        Analysis {
            packing_order,
            oop_cells,
        }
    }

    pub fn packing_order(&self) -> &[Position] {
        &self.packing_order
    }
}

/// Retrograde packing analysis: starting from the fully packed goal
/// configuration, repeatedly remove a box that can still be pulled off its
/// goal (the remaining packed boxes act as obstacles). Boxes that free up
/// last must be packed first, so the removal order reversed is the packing
/// order. If no box is removable the rest is appended in goal-list order.
fn compute_packing_order(board: &Board) -> ArrayVec<Position, MAX_BOXES> {
    let mut remaining: Vec<Position> = board.goals().to_vec();
    let mut removal_order: ArrayVec<Position, MAX_BOXES> = ArrayVec::new();

    while !remaining.is_empty() {
        let removable = remaining
            .iter()
            .position(|&g| can_pull_off(board, g, &remaining));
        match removable {
            Some(i) => removal_order.push(remaining.remove(i)),
            None => {
                for &g in &remaining {
                    removal_order.push(g);
                }
                remaining.clear();
            }
        }
    }

    removal_order.reverse();
    removal_order
}

/// Can a packed box at `goal` be pulled off by at least one legal pull, with
/// the other packed cells as obstacles? Pulls that strand the retrograde box
/// on a pull-dead cell don't count.
fn can_pull_off(board: &Board, goal: Position, packed: &[Position]) -> bool {
    for dir in ALL_DIRECTIONS {
        let Some(dest) = board.move_position(goal, dir) else {
            continue;
        };
        let Some(player) = board.move_position(dest, dir) else {
            continue;
        };
        if board.is_open(dest)
            && board.is_open(player)
            && !board.is_pull_dead_square(dest)
            && !packed.contains(&dest)
            && !packed.contains(&player)
        {
            return true;
        }
    }
    false
}

fn compute_oop_cells(board: &Board, order: &[Position]) -> Vec<RawBitboard> {
    let mut tables = Vec::with_capacity(order.len());

    for k in 0..order.len() {
        let mut blocked = RawBitboard::new();
        for &g in &order[..k] {
            blocked.set(g);
        }

        // Union pull-reachability from the still-open goals
        let mut dist = Box::new([[u16::MAX; MAX_SIZE]; MAX_SIZE]);
        for &g in &order[k..] {
            board.bfs_pulls(g, &mut dist, &blocked);
        }

        let mut oop = RawBitboard::new();
        for y in 0..board.height() {
            for x in 0..board.width() {
                let pos = Position(x as u8, y as u8);
                if board.is_open(pos) && !blocked.get(pos) && dist[y][x] == u16::MAX {
                    oop.set(pos);
                }
            }
        }
        tables.push(oop);
    }

    tables
}

/// Project a state onto its feature-space coordinates.
pub fn project(board: &Board, analysis: &Analysis, state: &State) -> FeatureCoord {
    let pack = packed_prefix(analysis, |pos| state.has_box_at(pos));
    FeatureCoord {
        pack,
        conn: connectivity(board, state),
        rooms: obstructed_links(board, state),
        oop: out_of_plan(analysis, pack, state.box_positions()),
    }
}

fn packed_prefix(analysis: &Analysis, has_box: impl Fn(Position) -> bool) -> u8 {
    let mut pack = 0u8;
    for &goal in analysis.packing_order.iter() {
        if has_box(goal) {
            pack += 1;
        } else {
            break;
        }
    }
    pack
}

/// Number of connected components of floor cells not occupied by boxes.
fn connectivity(board: &Board, state: &State) -> u16 {
    let mut visited = RawBitboard::new();
    let mut components = 0u16;

    for y in 0..board.height() {
        for x in 0..board.width() {
            let pos = Position(x as u8, y as u8);
            if !board.is_open(pos) || state.has_box_at(pos) || visited.get(pos) {
                continue;
            }
            components += 1;
            let mut stack = vec![pos];
            visited.set(pos);
            while let Some(curr) = stack.pop() {
                for dir in ALL_DIRECTIONS {
                    if let Some(next) = board.move_position(curr, dir) {
                        if board.is_open(next) && !state.has_box_at(next) && !visited.get(next) {
                            visited.set(next);
                            stack.push(next);
                        }
                    }
                }
            }
        }
    }

    components
}

fn obstructed_links(board: &Board, state: &State) -> u8 {
    state
        .box_positions()
        .iter()
        .filter(|&&pos| board.is_tunnel(pos))
        .count() as u8
}

fn out_of_plan(analysis: &Analysis, pack: u8, boxes: &[Position]) -> u8 {
    let stage = pack as usize;
    if stage >= analysis.oop_cells.len() {
        return 0;
    }
    let table = &analysis.oop_cells[stage];
    boxes.iter().filter(|&&pos| table.get(pos)).count() as u8
}

/// The out-of-plan count after applying `m` (no state mutation needed).
fn oop_after(analysis: &Analysis, state: &State, m: &MacroMove) -> u8 {
    let stage = pack_after(analysis, state, m) as usize;
    if stage >= analysis.oop_cells.len() {
        return 0;
    }
    let table = &analysis.oop_cells[stage];
    state
        .box_positions()
        .iter()
        .map(|&p| if p == m.box_from { m.box_to } else { p })
        .filter(|&p| table.get(p))
        .count() as u8
}

/// The seven advisors, in their fixed calling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisor {
    Packer,
    ConnectivityOpener,
    RoomOpener,
    OutOfPlanReducer,
    HotspotResolver,
    Clearer,
    Forcer,
}

pub const ALL_ADVISORS: [Advisor; 7] = [
    Advisor::Packer,
    Advisor::ConnectivityOpener,
    Advisor::RoomOpener,
    Advisor::OutOfPlanReducer,
    Advisor::HotspotResolver,
    Advisor::Clearer,
    Advisor::Forcer,
];

/// Weight the candidate moves of a state: every advisor suggestion costs 0,
/// everything else costs 1. `state` is borrowed mutably for scratch
/// apply/undo evaluation and is restored before returning.
pub fn weight_moves(
    board: &Board,
    analysis: &Analysis,
    state: &mut State,
    moves: &[MacroMove],
) -> Vec<(MacroMove, u8)> {
    let mut weights = vec![1u8; moves.len()];
    if !moves.is_empty() {
        let before = project(board, analysis, state);
        let zone_before = state.player_zone(board).count();
        let (hotspots, path_cells) = find_hotspots(board, state);

        for advisor in ALL_ADVISORS {
            let suggestion = advise(
                advisor,
                board,
                analysis,
                state,
                moves,
                &before,
                zone_before,
                hotspots,
                &path_cells,
            );
            if let Some(i) = suggestion {
                weights[i] = 0;
            }
        }
    }

    moves.iter().copied().zip(weights).collect()
}

#[allow(clippy::too_many_arguments)]
fn advise(
    advisor: Advisor,
    board: &Board,
    analysis: &Analysis,
    state: &mut State,
    moves: &[MacroMove],
    before: &FeatureCoord,
    zone_before: usize,
    hotspots: Bitvector,
    path_cells: &RawBitboard,
) -> Option<usize> {
    match advisor {
        Advisor::Packer => moves.iter().position(|m| pack_after(analysis, state, m) > before.pack),
        Advisor::ConnectivityOpener => moves
            .iter()
            .take(ADVISOR_CANDIDATES)
            .position(|m| with_applied(board, state, m, |s| connectivity(board, s)) < before.conn),
        Advisor::RoomOpener => moves
            .iter()
            .position(|m| board.is_tunnel(m.box_from) && !board.is_tunnel(m.box_to)),
        Advisor::OutOfPlanReducer => moves
            .iter()
            .position(|m| oop_after(analysis, state, m) < before.oop),
        Advisor::HotspotResolver => moves.iter().position(|m| {
            state
                .box_index(m.box_from)
                .is_some_and(|idx| hotspots.contains(idx))
                && !path_cells.get(m.box_to)
        }),
        Advisor::Clearer => moves
            .iter()
            .take(ADVISOR_CANDIDATES)
            .position(|m| {
                with_applied(board, state, m, |s| s.player_zone(board).count()) >= zone_before + 2
            }),
        Advisor::Forcer => moves
            .iter()
            .take(ADVISOR_CANDIDATES)
            .position(|m| {
                with_applied(board, state, m, |s| s.player_zone(board).count()) > zone_before
            }),
    }
}

/// The packing prefix length after applying `m` (no state mutation needed).
fn pack_after(analysis: &Analysis, state: &State, m: &MacroMove) -> u8 {
    packed_prefix(analysis, |pos| {
        pos == m.box_to || (state.has_box_at(pos) && pos != m.box_from)
    })
}

fn with_applied<R>(
    board: &Board,
    state: &mut State,
    m: &MacroMove,
    f: impl FnOnce(&State) -> R,
) -> R {
    let saved_player = state.player();
    state.move_box(board, m.box_from, m.box_to);
    state.set_player(m.player_end);
    let result = f(state);
    state.move_box(board, m.box_to, m.box_from);
    state.set_player(saved_player);
    result
}

/// A hotspot is a box sitting on another box's greedy shortest push path to
/// its nearest unfilled goal. Returns the hotspot boxes and the union of all
/// path cells.
fn find_hotspots(board: &Board, state: &State) -> (Bitvector, RawBitboard) {
    let mut hotspots = Bitvector::new();
    let mut path_cells = RawBitboard::new();

    let unfilled: Vec<usize> = (0..board.goals().len())
        .filter(|&g| !state.has_box_at(board.goals()[g]))
        .collect();
    if unfilled.is_empty() {
        return (hotspots, path_cells);
    }

    for i in 0..state.box_count() {
        let owner = Index(i as u8);
        let start = state.box_position(owner);

        // Nearest unfilled goal by precomputed push distance
        let Some(&goal) = unfilled
            .iter()
            .min_by_key(|&&g| board.goal_distance(g, start))
        else {
            continue;
        };
        let mut dist = board.goal_distance(goal, start);
        if dist == u16::MAX || dist == 0 {
            continue;
        }

        // Walk the distance table downhill; boxes parked on the way are
        // hotspots for this owner
        let mut pos = start;
        while dist > 0 {
            let mut stepped = false;
            for dir in ALL_DIRECTIONS {
                if let Some(next) = board.move_position(pos, dir) {
                    if board.is_open(next) && board.goal_distance(goal, next) == dist - 1 {
                        pos = next;
                        dist -= 1;
                        path_cells.set(next);
                        if let Some(blocker) = state.box_index(next) {
                            if blocker != owner {
                                hotspots.add(blocker);
                            }
                        }
                        stepped = true;
                        break;
                    }
                }
            }
            if !stepped {
                break;
            }
        }
    }

    (hotspots, path_cells)
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
    fn test_packing_order_deepest_first() {
        // Goals in a dead-end row: the innermost goal must be packed first
        let (board, _) = parse(
            r#"
########
#****@ #
########
"#,
        );
        let analysis = Analysis::new(&board);
        assert_eq!(
            analysis.packing_order(),
            &[
                Position(1, 1),
                Position(2, 1),
                Position(3, 1),
                Position(4, 1)
            ]
        );
    }

    #[test]
    fn test_packed_prefix() {
        let (board, state) = parse(
            r#"
########
#****@ #
########
"#,
        );
        let analysis = Analysis::new(&board);
        assert_eq!(project(&board, &analysis, &state).pack, 4);

        // A gap at the front of the order drops the prefix to zero
        let mut partial = state.clone();
        partial.reset(
            &board,
            &[Position(2, 1), Position(3, 1), Position(4, 1), Position(6, 1)],
            Position(5, 1),
        );
        assert_eq!(project(&board, &analysis, &partial).pack, 0);
    }

    #[test]
    fn test_connectivity_split() {
        let (board, state) = parse(
            r#"
#####
#@$ #
#####
"#,
        );
        let analysis = Analysis::new(&board);
        let coord = project(&board, &analysis, &state);
        // The box splits the corridor into two free regions
        assert_eq!(coord.conn, 2);
    }

    #[test]
    fn test_obstructed_room_link() {
        let (board, mut state) = parse(
            r#"
########
#@  #  #
#      #
#### ###
#      #
# $  . #
########
"#,
        );
        let analysis = Analysis::new(&board);
        assert_eq!(project(&board, &analysis, &state).rooms, 0);

        // Park the box on the connecting tunnel cell
        state.reset(&board, &[Position(4, 3)], Position(1, 1));
        assert_eq!(project(&board, &analysis, &state).rooms, 1);
    }

    #[test]
    fn test_out_of_plan_corner() {
        let (board, mut state) = parse(
            r#"
######
#@$ .#
######
"#,
        );
        let analysis = Analysis::new(&board);
        assert_eq!(project(&board, &analysis, &state).oop, 0);

        // The cell next to the left wall cannot reach the goal any more
        state.reset(&board, &[Position(1, 1)], Position(2, 1));
        assert_eq!(project(&board, &analysis, &state).oop, 1);
    }

    #[test]
    fn test_projection_is_pure() {
        let (board, state) = parse(
            r#"
######
#@$ .#
######
"#,
        );
        let analysis = Analysis::new(&board);
        assert_eq!(
            project(&board, &analysis, &state),
            project(&board, &analysis, &state)
        );
    }

    #[test]
    fn test_weight_moves_zeroes_packing_move() {
        let (board, mut state) = parse(
            r#"
######
#@$ .#
######
"#,
        );
        let analysis = Analysis::new(&board);
        let moves = crate::moves::macro_moves(&board, &state);
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].box_to, Position(4, 1));

        let weighted = weight_moves(&board, &analysis, &mut state, &moves);
        // The goal-packing move gets weight zero, the filler move stays at one
        assert_eq!(weighted[0].1, 0);
        assert_eq!(weighted[1].1, 1);
    }

    #[test]
    fn test_weight_moves_restores_state() {
        let (board, mut state) = parse(
            r#"
######
#@$ .#
######
"#,
        );
        let analysis = Analysis::new(&board);
        let original = state.clone();
        let moves = crate::moves::macro_moves(&board, &state);
        weight_moves(&board, &analysis, &mut state, &moves);
        assert_eq!(state, original);
    }

    #[test]
    fn test_hotspot_detection() {
        // The right box sits on the left box's straight path to the goal
        let (board, state) = parse(
            r#"
########
#@$ $ .#
#    . #
########
"#,
        );
        let (hotspots, _) = find_hotspots(&board, &state);
        let blocker = state.box_index(Position(4, 1)).unwrap();
        assert!(hotspots.contains(blocker));
    }
}
