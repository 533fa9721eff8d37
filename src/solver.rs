use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::bits::Position;
use crate::board::{Board, MAX_BOXES};
use crate::deadlock::{DeadlockDetector, MoveClass};
use crate::features::{Analysis, FeatureCoord, project, weight_moves};
use crate::levels::SolveError;
use crate::moves::{MacroMove, Push, macro_moves, push_path};
use crate::state::State;
use crate::zobrist::Zobrist;

/// Fixed default seed for the Zobrist tables, chosen once for
/// reproducibility.
pub const DEFAULT_ZOBRIST_SEED: u64 = 0x517c_c1b7_2722_0a95;

/// Expansions between progress callbacks and log lines.
const PROGRESS_INTERVAL: u64 = 1000;

/// Once a node has spent this much time in the optional deadlock checks, the
/// rest of its moves skip them.
const NODE_PRUNE_BUDGET: Duration = Duration::from_millis(50);

pub struct SolveOptions {
    /// Hard cap on search-tree size (nodes created).
    pub max_nodes: usize,
    /// Wall-clock deadline in milliseconds.
    pub max_millis: u64,
    pub enable_corral_check: bool,
    pub enable_bipartite_check: bool,
    pub zobrist_seed: u64,
    /// Hard cap on transposition-table entries; exceeding it reports a
    /// memory-limited result rather than evicting (eviction would strand
    /// descendants in the tree).
    pub max_table_entries: usize,
    /// Cooperative cancellation flag, polled between iterations.
    pub cancel_flag: Option<Arc<AtomicBool>>,
    /// Called every PROGRESS_INTERVAL expansions; returning false cancels.
    pub progress_callback: Option<Box<dyn FnMut(&SolveStats) -> bool>>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            max_nodes: 2_000_000,
            max_millis: 600_000,
            enable_corral_check: true,
            enable_bipartite_check: true,
            zobrist_seed: DEFAULT_ZOBRIST_SEED,
            max_table_entries: 4_000_000,
            cancel_flag: None,
            progress_callback: None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SolveStats {
    pub nodes_expanded: u64,
    pub nodes_generated: u64,
    pub dead_square_pruned: u64,
    pub freeze_pruned: u64,
    pub corral_pruned: u64,
    pub bipartite_pruned: u64,
    pub feature_cells: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    Nodes,
    Time,
    Memory,
}

#[derive(Debug)]
pub enum SolveResult {
    Solved {
        /// Primitive push sequence from the initial state to the goal.
        moves: Vec<Push>,
        /// The same solution compressed to (box_from, box_to) macro moves.
        macro_moves: Vec<(Position, Position)>,
        stats: SolveStats,
    },
    Unsolvable {
        stats: SolveStats,
    },
    LimitExceeded {
        reason: LimitReason,
        stats: SolveStats,
    },
    Cancelled {
        stats: SolveStats,
    },
}

impl SolveResult {
    pub fn stats(&self) -> &SolveStats {
        match self {
            SolveResult::Solved { stats, .. } => stats,
            SolveResult::Unsolvable { stats } => stats,
            SolveResult::LimitExceeded { stats, .. } => stats,
            SolveResult::Cancelled { stats } => stats,
        }
    }
}

/// Parse a level and solve it.
pub fn solve(level_text: &str, options: SolveOptions) -> Result<SolveResult, SolveError> {
    let board = Board::from_text(level_text).map_err(SolveError::MalformedLevel)?;
    Ok(solve_board(&board, options))
}

pub fn solve_board(board: &Board, options: SolveOptions) -> SolveResult {
    Solver::new(board, options).run()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeStatus {
    /// Created, never selected
    Fresh,
    /// Selected at least once, has unexpanded moves
    Live,
    /// All moves expanded or pruned
    Exhausted,
    /// Exhausted with every generated child dead as well
    Dead,
}

struct SearchNode {
    /// Sorted box set (identity, independent of box numbering)
    boxes: ArrayVec<Position, MAX_BOXES>,
    /// Canonical (top-left reachable) player cell
    player: Position,
    parent: Option<usize>,
    via: Option<MacroMove>,
    /// Sum of move weights along the path from the root
    weight: u32,
    coord: FeatureCoord,
    /// Unexpanded moves, sorted stably by weight; the cursor marks the next
    /// candidate so the node's cheapest remaining move is O(1)
    moves: Vec<(MacroMove, u8)>,
    cursor: usize,
    status: NodeStatus,
    live_children: u32,
    /// Time spent in optional deadlock checks for this node's moves
    prune_time: Duration,
}

impl SearchNode {
    fn selectable(&self) -> bool {
        matches!(self.status, NodeStatus::Fresh | NodeStatus::Live)
    }
}

struct FeatureCell {
    nodes: Vec<usize>,
}

struct Solver<'a> {
    board: &'a Board,
    zobrist: Zobrist,
    analysis: Analysis,
    detector: DeadlockDetector,
    options: SolveOptions,
    arena: Vec<SearchNode>,
    cells: Vec<FeatureCell>,
    cell_ids: FxHashMap<FeatureCoord, usize>,
    /// Cyclic cell cursor; cells are only ever appended, never reordered
    cursor: usize,
    table: FxHashMap<u64, usize>,
    scratch: State,
    stats: SolveStats,
}

impl<'a> Solver<'a> {
    fn new(board: &'a Board, options: SolveOptions) -> Self {
        let zobrist = Zobrist::new(options.zobrist_seed);
        let analysis = Analysis::new(board);
        let detector =
            DeadlockDetector::new(options.enable_corral_check, options.enable_bipartite_check);
        info!(
            "pre-analysis done: {} goals, {} rooms, packing order {:?}",
            board.goals().len(),
            board.room_count(),
            analysis.packing_order()
        );
        Solver {
            board,
            zobrist,
            analysis,
            detector,
            options,
            arena: Vec::new(),
            cells: Vec::new(),
            cell_ids: FxHashMap::default(),
            cursor: 0,
            table: FxHashMap::default(),
            scratch: State::initial(board),
            stats: SolveStats::default(),
        }
    }

    fn run(mut self) -> SolveResult {
        let start_time = Instant::now();
        let deadline = start_time + Duration::from_millis(self.options.max_millis);

        let initial = State::initial(self.board);
        if initial.is_solved() {
            return SolveResult::Solved {
                moves: Vec::new(),
                macro_moves: Vec::new(),
                stats: self.finish(start_time),
            };
        }
        if let Some(class) = self.detector.start_deadlocked(self.board, &initial) {
            debug!("initial position deadlocked: {:?}", class);
            return SolveResult::Unsolvable {
                stats: self.finish(start_time),
            };
        }

        // Root node
        self.scratch = initial;
        let canonical = self.scratch.canonical_player(self.board);
        let hash = self
            .zobrist
            .state_hash(self.scratch.box_positions(), canonical);
        self.insert_node(None, None, 0, canonical, Some(hash));

        let mut next_progress = PROGRESS_INTERVAL;
        loop {
            // Limit and cancellation checks, once per iteration
            if let Some(flag) = &self.options.cancel_flag {
                if flag.load(Ordering::Relaxed) {
                    return SolveResult::Cancelled {
                        stats: self.finish(start_time),
                    };
                }
            }
            if Instant::now() >= deadline {
                return SolveResult::LimitExceeded {
                    reason: LimitReason::Time,
                    stats: self.finish(start_time),
                };
            }
            if self.arena.len() >= self.options.max_nodes {
                return SolveResult::LimitExceeded {
                    reason: LimitReason::Nodes,
                    stats: self.finish(start_time),
                };
            }
            if self.table.len() >= self.options.max_table_entries {
                return SolveResult::LimitExceeded {
                    reason: LimitReason::Memory,
                    stats: self.finish(start_time),
                };
            }
            if self.stats.nodes_expanded >= next_progress {
                next_progress += PROGRESS_INTERVAL;
                self.stats.elapsed_ms = start_time.elapsed().as_millis() as u64;
                self.stats.feature_cells = self.cells.len() as u64;
                debug!(
                    "expanded {} generated {} cells {}",
                    self.stats.nodes_expanded, self.stats.nodes_generated, self.stats.feature_cells
                );
                if let Some(callback) = &mut self.options.progress_callback {
                    if !callback(&self.stats) {
                        return SolveResult::Cancelled {
                            stats: self.finish(start_time),
                        };
                    }
                }
            }

            // Cell selection: next non-empty cell in cyclic order, then the
            // single cheapest (node, move) pair inside it
            let Some(node_idx) = self.select() else {
                return SolveResult::Unsolvable {
                    stats: self.finish(start_time),
                };
            };

            let (m, move_weight) = {
                let node = &mut self.arena[node_idx];
                node.status = NodeStatus::Live;
                let entry = node.moves[node.cursor];
                node.cursor += 1;
                entry
            };

            self.stats.nodes_expanded += 1;

            if let Some((moves, macro_moves)) = self.expand_move(node_idx, m, move_weight) {
                let stats = self.finish(start_time);
                info!(
                    "solved: {} pushes / {} macro moves after {} expansions",
                    moves.len(),
                    macro_moves.len(),
                    stats.nodes_expanded
                );
                return SolveResult::Solved {
                    moves,
                    macro_moves,
                    stats,
                };
            }

            // Only now, with any new child attached, may the node exhaust
            if self.arena[node_idx].cursor == self.arena[node_idx].moves.len() {
                self.arena[node_idx].status = NodeStatus::Exhausted;
                self.propagate_dead(node_idx);
            }
        }
    }

    /// Apply one selected (node, move) pair: deadlock checks, transposition
    /// lookup, child insertion, goal test. Returns the solution if the child
    /// completes the puzzle.
    fn expand_move(
        &mut self,
        node_idx: usize,
        m: MacroMove,
        move_weight: u8,
    ) -> Option<(Vec<Push>, Vec<(Position, Position)>)> {
        let (parent_boxes, parent_player, parent_weight) = {
            let node = &self.arena[node_idx];
            (node.boxes.clone(), node.player, node.weight)
        };
        self.scratch.reset(self.board, &parent_boxes, parent_player);

        let allow_expensive = self.arena[node_idx].prune_time < NODE_PRUNE_BUDGET;
        let check_start = Instant::now();
        let class = self.detector.classify_move(
            self.board,
            &self.zobrist,
            &mut self.scratch,
            &m,
            allow_expensive,
        );
        self.arena[node_idx].prune_time += check_start.elapsed();

        match class {
            MoveClass::DeadSquare => {
                self.stats.dead_square_pruned += 1;
                return None;
            }
            MoveClass::Freeze => {
                self.stats.nodes_generated += 1;
                self.stats.freeze_pruned += 1;
                return None;
            }
            MoveClass::Corral => {
                self.stats.nodes_generated += 1;
                self.stats.corral_pruned += 1;
                return None;
            }
            MoveClass::Bipartite => {
                self.stats.nodes_generated += 1;
                self.stats.bipartite_pruned += 1;
                return None;
            }
            MoveClass::Ok => {}
        }
        self.stats.nodes_generated += 1;

        // The child may finish the puzzle
        if self.scratch.is_solved() {
            return Some(self.reconstruct(node_idx, m));
        }

        // Transposition: same canonical state already in the tree?
        let canonical = self.scratch.canonical_player(self.board);
        let hash = self
            .zobrist
            .state_hash(self.scratch.box_positions(), canonical);
        let child_weight = parent_weight + move_weight as u32;

        if let Some(&existing_idx) = self.table.get(&hash) {
            let existing = &self.arena[existing_idx];
            // Verify box set and player zone, not just the hash
            if existing.player == canonical && existing.boxes == self.scratch.sorted_boxes() {
                if child_weight < existing.weight {
                    // The cheaper path wins; features are a pure function of
                    // the state, so the projection stays put
                    self.arena[existing_idx].weight = child_weight;
                    debug!(
                        "transposition improved node {} in cell {:?}",
                        existing_idx, self.arena[existing_idx].coord
                    );
                }
                return None;
            }
            // Hash collision against a different state: keep the new node
            // out of the occupied table slot
            self.insert_node(Some(node_idx), Some(m), child_weight, canonical, None);
            return None;
        }

        self.insert_node(Some(node_idx), Some(m), child_weight, canonical, Some(hash));
        None
    }

    /// Advance the cyclic cursor to the next cell holding a selectable node
    /// and pick the cheapest (node, move) pair there: least node weight plus
    /// move weight, FIFO among nodes, move order within a node.
    fn select(&mut self) -> Option<usize> {
        let n_cells = self.cells.len();
        for step in 1..=n_cells {
            let cell_idx = (self.cursor + step) % n_cells;
            let mut best: Option<(usize, u32)> = None;
            for &node_idx in &self.cells[cell_idx].nodes {
                let node = &self.arena[node_idx];
                if !node.selectable() {
                    continue;
                }
                let total = node.weight + node.moves[node.cursor].1 as u32;
                if best.map_or(true, |(_, w)| total < w) {
                    best = Some((node_idx, total));
                }
            }
            if let Some((node_idx, _)) = best {
                self.cursor = cell_idx;
                return Some(node_idx);
            }
        }
        None
    }

    /// Create a node for the state currently in `scratch` and wire it into
    /// the arena, its feature cell, and (unless `hash` is the collision
    /// sentinel) the transposition table.
    fn insert_node(
        &mut self,
        parent: Option<usize>,
        via: Option<MacroMove>,
        weight: u32,
        canonical: Position,
        hash: Option<u64>,
    ) {
        let coord = project(self.board, &self.analysis, &self.scratch);
        let candidates = macro_moves(self.board, &self.scratch);
        let mut moves = weight_moves(self.board, &self.analysis, &mut self.scratch, &candidates);
        moves.sort_by_key(|&(_, w)| w);

        let node_idx = self.arena.len();
        let status = if moves.is_empty() {
            NodeStatus::Exhausted
        } else {
            NodeStatus::Fresh
        };
        self.arena.push(SearchNode {
            boxes: self.scratch.sorted_boxes(),
            player: canonical,
            parent,
            via,
            weight,
            coord,
            moves,
            cursor: 0,
            status,
            live_children: 0,
            prune_time: Duration::ZERO,
        });

        if let Some(p) = parent {
            self.arena[p].live_children += 1;
        }

        let cell_idx = match self.cell_ids.get(&coord) {
            Some(&idx) => idx,
            None => {
                let idx = self.cells.len();
                self.cells.push(FeatureCell { nodes: Vec::new() });
                self.cell_ids.insert(coord, idx);
                idx
            }
        };
        self.cells[cell_idx].nodes.push(node_idx);

        if let Some(hash) = hash {
            self.table.insert(hash, node_idx);
        }

        if status == NodeStatus::Exhausted {
            self.propagate_dead(node_idx);
        }
    }

    /// An exhausted node with no live descendants is dead; deadness bubbles
    /// up the parent chain.
    fn propagate_dead(&mut self, node_idx: usize) {
        let mut current = Some(node_idx);
        while let Some(idx) = current {
            let node = &self.arena[idx];
            if node.status != NodeStatus::Exhausted || node.live_children > 0 {
                break;
            }
            self.arena[idx].status = NodeStatus::Dead;
            current = self.arena[idx].parent;
            if let Some(p) = current {
                self.arena[p].live_children -= 1;
            }
        }
    }

    /// Walk the parent chain, then replay the macro moves from the initial
    /// state, expanding each into its primitive pushes.
    fn reconstruct(
        &self,
        parent_idx: usize,
        last_move: MacroMove,
    ) -> (Vec<Push>, Vec<(Position, Position)>) {
        let mut macros = vec![last_move];
        let mut current = Some(parent_idx);
        while let Some(idx) = current {
            if let Some(m) = self.arena[idx].via {
                macros.push(m);
            }
            current = self.arena[idx].parent;
        }
        macros.reverse();

        let mut state = State::initial(self.board);
        let mut pushes = Vec::new();
        let mut macro_list = Vec::new();
        for m in macros {
            let path = push_path(self.board, &state, &m);
            for push in &path {
                state.push(self.board, push.from, push.dir);
            }
            pushes.extend(path);
            macro_list.push((m.box_from, m.box_to));
        }
        assert!(
            state.is_solved(),
            "solution verification failed: puzzle is not solved"
        );
        (pushes, macro_list)
    }

    fn finish(&mut self, start_time: Instant) -> SolveStats {
        self.stats.elapsed_ms = start_time.elapsed().as_millis() as u64;
        self.stats.feature_cells = self.cells.len() as u64;
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::Bitboard;
    use crate::board::{ALL_DIRECTIONS, Direction};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn solve_text(text: &str) -> SolveResult {
        solve(text.trim_matches('\n'), SolveOptions::default()).unwrap()
    }

    fn replay(text: &str, pushes: &[Push]) {
        let board = Board::from_text(text.trim_matches('\n')).unwrap();
        let mut state = State::initial(&board);
        for push in pushes {
            state.push(&board, push.from, push.dir);
        }
        assert!(state.is_solved(), "replayed solution does not reach the goal");
    }

    #[test]
    fn test_trivial_one_push() {
        let text = "#####\n#@$.#\n#####";
        let result = solve_text(text);
        let SolveResult::Solved {
            moves,
            macro_moves,
            stats,
        } = result
        else {
            panic!("expected Solved");
        };
        assert_eq!(
            moves,
            vec![Push {
                from: Position(2, 1),
                dir: Direction::Right,
            }]
        );
        assert_eq!(macro_moves, vec![(Position(2, 1), Position(3, 1))]);
        assert!(stats.nodes_expanded <= 2);
        replay(text, &moves);
    }

    #[test]
    fn test_already_solved() {
        let result = solve_text("####\n#@*#\n####");
        let SolveResult::Solved { moves, stats, .. } = result else {
            panic!("expected Solved");
        };
        assert!(moves.is_empty());
        assert_eq!(stats.nodes_expanded, 0);
    }

    #[test]
    fn test_empty_puzzle() {
        let result = solve_text("####\n#@ #\n####");
        let SolveResult::Solved { moves, stats, .. } = result else {
            panic!("expected Solved");
        };
        assert!(moves.is_empty());
        assert_eq!(stats.nodes_expanded, 0);
    }

    #[test]
    fn test_two_push_corridor() {
        let text = "######\n#@$ .#\n######";
        let result = solve_text(text);
        let SolveResult::Solved { moves, .. } = result else {
            panic!("expected Solved");
        };
        assert_eq!(moves.len(), 2);
        replay(text, &moves);
    }

    #[test]
    fn test_dead_square_trap_static() {
        // 5x5 room, box starts in a goal-less corner
        let result = solve_text("#####\n#$  #\n#  .#\n#  @#\n#####");
        let SolveResult::Unsolvable { stats } = result else {
            panic!("expected Unsolvable");
        };
        assert_eq!(stats.nodes_expanded, 0);
        assert_eq!(stats.dead_square_pruned, 0);
    }

    #[test]
    fn test_freeze_trap() {
        // The only available push pins the box against the one on the goal,
        // freezing both under the top wall
        let result = solve_text("#######\n#@$ *.#\n#######");
        let SolveResult::Unsolvable { stats } = result else {
            panic!("expected Unsolvable");
        };
        assert!(stats.nodes_generated <= 4);
        assert_eq!(stats.freeze_pruned, 1);
    }

    #[test]
    fn test_bipartite_infeasible_static() {
        // One goal is unreachable by any push, so two boxes compete for one
        // goal; detected before any expansion
        let result = solve_text("######\n#. ###\n## $ #\n#@$. #\n######");
        let SolveResult::Unsolvable { stats } = result else {
            panic!("expected Unsolvable");
        };
        assert_eq!(stats.nodes_expanded, 0);
    }

    #[test]
    fn test_unsolvable_exhausts() {
        // The player is on the wrong side: the box can only be pushed away
        // from the goal until it dies in the corner
        let result = solve_text("#######\n#  $@.#\n#######");
        let SolveResult::Unsolvable { stats } = result else {
            panic!("expected Unsolvable");
        };
        assert!(stats.nodes_expanded >= 1);
    }

    #[test]
    fn test_cancellation() {
        let flag = Arc::new(AtomicBool::new(true));
        let result = solve(
            "########\n#@ $  .#\n#      #\n########",
            SolveOptions {
                cancel_flag: Some(flag),
                ..SolveOptions::default()
            },
        )
        .unwrap();
        assert!(matches!(result, SolveResult::Cancelled { .. }));
    }

    #[test]
    fn test_node_limit() {
        let result = solve(
            "########\n#@ $  .#\n#      #\n########",
            SolveOptions {
                max_nodes: 1,
                ..SolveOptions::default()
            },
        )
        .unwrap();
        let SolveResult::LimitExceeded { reason, .. } = result else {
            panic!("expected LimitExceeded");
        };
        assert_eq!(reason, LimitReason::Nodes);
    }

    #[test]
    fn test_malformed_level() {
        assert!(solve("####\n#@x#\n####", SolveOptions::default()).is_err());
        assert!(solve("####\n#$ #\n#@ #\n####", SolveOptions::default()).is_err());
    }

    #[test]
    fn test_determinism() {
        let text = "########\n#  $  .#\n# $  . #\n#@     #\n########";
        let a = solve(text, SolveOptions::default()).unwrap();
        let b = solve(text, SolveOptions::default()).unwrap();
        let (SolveResult::Solved { moves: ma, .. }, SolveResult::Solved { moves: mb, .. }) =
            (&a, &b)
        else {
            panic!("expected both Solved");
        };
        assert_eq!(ma, mb);
    }

    #[test]
    fn test_accumulated_weights_consistent() {
        // Solvable two-box puzzle; checks the solved path replays and that
        // stats counters are coherent
        let text = "########\n#  $  .#\n# $  . #\n#@     #\n########";
        let result = solve_text(text);
        let SolveResult::Solved { moves, stats, .. } = result else {
            panic!("expected Solved");
        };
        assert_eq!(
            stats.nodes_generated,
            stats.nodes_expanded - stats.dead_square_pruned
        );
        replay(text, &moves);
    }

    #[test]
    fn test_xsokoban_level_1() {
        let text = "
    #####
    #   #
    #$  #
  ###  $##
  #  $ $ #
### # ## #   ######
#   # ## #####  ..#
# $  $          ..#
##### ### #@##  ..#
    #     #########
    #######";
        let result = solve_text(text);
        let SolveResult::Solved { moves, stats, .. } = result else {
            panic!("expected Solved");
        };
        replay(text, &moves);
        assert!(stats.nodes_expanded < 200_000);
    }

    #[test]
    fn test_progress_callback_cancels() {
        use std::cell::Cell;
        use std::rc::Rc;

        let called = Rc::new(Cell::new(false));
        let called_inner = called.clone();
        // A puzzle small enough to finish quickly; the callback only fires
        // after PROGRESS_INTERVAL expansions, so it may never run here. The
        // cancel path is covered via the flag test; this checks the callback
        // does not break a normal solve.
        let result = solve(
            "######\n#@$ .#\n######",
            SolveOptions {
                progress_callback: Some(Box::new(move |_stats| {
                    called_inner.set(true);
                    false
                })),
                ..SolveOptions::default()
            },
        )
        .unwrap();
        assert!(matches!(result, SolveResult::Solved { .. }));
        assert!(!called.get());
    }

    #[test]
    fn test_random_pulled_puzzles_solve() {
        let mut rng = ChaCha8Rng::seed_from_u64(20260801);

        for _ in 0..20 {
            let text = random_pulled_level(&mut rng);
            let board = Board::from_text(&text).unwrap();
            let result = solve_board(
                &board,
                SolveOptions {
                    max_nodes: 200_000,
                    max_millis: 30_000,
                    ..SolveOptions::default()
                },
            );
            let SolveResult::Solved { moves, .. } = result else {
                panic!("generated level not solved:\n{}", text);
            };

            let mut state = State::initial(&board);
            for push in &moves {
                state.push(&board, push.from, push.dir);
            }
            assert!(state.is_solved(), "solution replay failed:\n{}", text);
        }
    }

    /// Build a solvable level by starting from a packed goal configuration
    /// and pulling boxes away from their goals with random legal pulls.
    fn random_pulled_level(rng: &mut ChaCha8Rng) -> String {
        const SIZE: usize = 8;
        loop {
            // Random goal cells in the interior
            let box_count = rng.gen_range(1..=3);
            let mut goals: Vec<Position> = Vec::new();
            while goals.len() < box_count {
                let pos = Position(
                    rng.gen_range(1..SIZE as u8 - 1),
                    rng.gen_range(1..SIZE as u8 - 1),
                );
                if !goals.contains(&pos) {
                    goals.push(pos);
                }
            }
            // Player on a free interior cell
            let player = loop {
                let pos = Position(
                    rng.gen_range(1..SIZE as u8 - 1),
                    rng.gen_range(1..SIZE as u8 - 1),
                );
                if !goals.contains(&pos) {
                    break pos;
                }
            };

            let text = render_level(SIZE, &goals, &goals, player);
            let Ok(board) = Board::from_text(&text) else {
                continue;
            };
            let mut state = State::initial(&board);

            // Random retrograde pulls
            for _ in 0..rng.gen_range(4..30) {
                let zone = state.player_zone(&board);
                let mut pulls: Vec<(Position, Direction, Position, Position)> = Vec::new();
                for &from in state.box_positions() {
                    for dir in ALL_DIRECTIONS {
                        let Some(to) = board.move_position(from, dir) else {
                            continue;
                        };
                        let Some(player_to) = board.move_position(to, dir) else {
                            continue;
                        };
                        if board.is_open(to)
                            && board.is_open(player_to)
                            && !state.has_box_at(to)
                            && !state.has_box_at(player_to)
                            && zone.get(to)
                        {
                            pulls.push((from, dir, to, player_to));
                        }
                    }
                }
                if pulls.is_empty() {
                    break;
                }
                let (from, _dir, to, player_to) = pulls[rng.gen_range(0..pulls.len())];
                state.move_box(&board, from, to);
                state.set_player(player_to);
            }

            return render_level(SIZE, &goals, state.box_positions(), state.player());
        }
    }

    fn render_level(size: usize, goals: &[Position], boxes: &[Position], player: Position) -> String {
        let mut out = String::new();
        for y in 0..size {
            for x in 0..size {
                let pos = Position(x as u8, y as u8);
                let border = x == 0 || y == 0 || x == size - 1 || y == size - 1;
                let ch = if border {
                    '#'
                } else if pos == player {
                    if goals.contains(&pos) { '+' } else { '@' }
                } else if boxes.contains(&pos) {
                    if goals.contains(&pos) { '*' } else { '$' }
                } else if goals.contains(&pos) {
                    '.'
                } else {
                    ' '
                };
                out.push(ch);
            }
            out.push('\n');
        }
        out
    }
}
