use std::collections::VecDeque;
use std::fmt;

use arrayvec::ArrayVec;

use crate::bits::{Bitboard, Position, RawBitboard};

pub const MAX_SIZE: usize = 64;
pub const MAX_BOXES: usize = 64;
pub const NO_GOAL: u8 = 255;
pub const NO_ROOM: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Wall,
    Floor,
    Goal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

pub const ALL_DIRECTIONS: [Direction; 4] = [
    Direction::Up,
    Direction::Down,
    Direction::Left,
    Direction::Right,
];

impl Direction {
    pub fn reverse(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    fn delta(&self) -> (i8, i8) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "Up"),
            Direction::Down => write!(f, "Down"),
            Direction::Left => write!(f, "Left"),
            Direction::Right => write!(f, "Right"),
        }
    }
}

/// Immutable puzzle geometry plus the tables derived from it once at load
/// time: dead squares, per-goal push distances, and the room decomposition.
#[derive(Debug)]
pub struct Board {
    tiles: [[Tile; MAX_SIZE]; MAX_SIZE],
    width: u8,
    height: u8,
    player_start: Position,
    start_boxes: ArrayVec<Position, MAX_BOXES>,
    goals: ArrayVec<Position, MAX_BOXES>,
    // Maps goal cell to its index in `goals` (NO_GOAL elsewhere)
    goal_index: [[u8; MAX_SIZE]; MAX_SIZE],
    // Cells outside the enclosure; they read as Wall but render as blank
    exterior: RawBitboard,
    push_dead_squares: RawBitboard,
    pull_dead_squares: RawBitboard,
    tunnels: RawBitboard,
    room_of: [[u8; MAX_SIZE]; MAX_SIZE],
    room_count: u8,
    // goal_distances[g][y][x] = minimum pushes to move a lone box from (x, y)
    // onto goal g (u16::MAX when impossible)
    goal_distances: Vec<[[u16; MAX_SIZE]; MAX_SIZE]>,
}

/// Which retrograde move relation `retrograde_reach` expands with.
#[derive(Debug, Clone, Copy)]
enum Retrograde {
    Push,
    Pull,
}

/// What a level character puts on its cell besides the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occupant {
    Nothing,
    Crate,
    Player,
}

/// The XSB symbol table. Returns None for characters outside the set.
fn classify(ch: char) -> Option<(Tile, Occupant)> {
    Some(match ch {
        '#' => (Tile::Wall, Occupant::Nothing),
        ' ' => (Tile::Floor, Occupant::Nothing),
        '.' => (Tile::Goal, Occupant::Nothing),
        '$' => (Tile::Floor, Occupant::Crate),
        '*' => (Tile::Goal, Occupant::Crate),
        '@' => (Tile::Floor, Occupant::Player),
        '+' => (Tile::Goal, Occupant::Player),
        _ => return None,
    })
}

impl Board {
    /// Parse a level in XSB notation (`#`, ` `, `.`, `$`, `*`, `@`, `+`).
    /// Short rows are padded with exterior on the right; any floor the
    /// player cannot be enclosed with is treated as exterior wall.
    pub fn from_text(text: &str) -> Result<Self, String> {
        let rows: Vec<&str> = text.lines().collect();
        let height = rows.len();
        let width = rows.iter().map(|row| row.len()).max().unwrap_or(0);

        if width == 0 {
            return Err("empty level".to_owned());
        }
        if width > MAX_SIZE || height > MAX_SIZE {
            return Err(format!(
                "level is {}x{}, the limit is {}x{}",
                width, height, MAX_SIZE, MAX_SIZE
            ));
        }

        let mut tiles = [[Tile::Floor; MAX_SIZE]; MAX_SIZE];
        let mut players: Vec<Position> = Vec::new();
        let mut start_boxes: ArrayVec<Position, MAX_BOXES> = ArrayVec::new();
        let mut goals: ArrayVec<Position, MAX_BOXES> = ArrayVec::new();

        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                let Some((tile, occupant)) = classify(ch) else {
                    return Err(format!("unexpected character '{}' in row {}", ch, y + 1));
                };
                let pos = Position(x as u8, y as u8);
                tiles[y][x] = tile;
                if tile == Tile::Goal {
                    goals
                        .try_push(pos)
                        .map_err(|_| format!("more than {} goals", MAX_BOXES))?;
                }
                match occupant {
                    Occupant::Nothing => {}
                    Occupant::Crate => {
                        start_boxes
                            .try_push(pos)
                            .map_err(|_| format!("more than {} boxes", MAX_BOXES))?;
                    }
                    Occupant::Player => players.push(pos),
                }
            }
        }

        let player_start = match players.as_slice() {
            [] => return Err("level has no player".to_owned()),
            [start] => *start,
            more => return Err(format!("level has {} players", more.len())),
        };
        if start_boxes.len() != goals.len() {
            return Err(format!(
                "{} boxes cannot fill {} goals",
                start_boxes.len(),
                goals.len()
            ));
        }

        let mut goal_index = [[NO_GOAL; MAX_SIZE]; MAX_SIZE];
        for (idx, &goal) in goals.iter().enumerate() {
            goal_index[goal.1 as usize][goal.0 as usize] = idx as u8;
        }

        let mut board = Board {
            tiles,
            width: width as u8,
            height: height as u8,
            player_start,
            start_boxes,
            goals,
            goal_index,
            exterior: RawBitboard::new(),
            push_dead_squares: RawBitboard::new(),
            pull_dead_squares: RawBitboard::new(),
            tunnels: RawBitboard::new(),
            room_of: [[NO_ROOM; MAX_SIZE]; MAX_SIZE],
            room_count: 0,
            goal_distances: Vec::new(),
        };
        board.seal_exterior()?;
        board.compute_dead_squares();
        board.compute_goal_distances();
        board.compute_rooms();
        Ok(board)
    }

    /// Turn every floor cell the player cannot reach (boxes ignored) into
    /// wall. Boxes and goals must lie within the enclosed interior.
    fn seal_exterior(&mut self) -> Result<(), String> {
        let mut interior = RawBitboard::new();
        let mut stack = vec![self.player_start];
        interior.set(self.player_start);
        while let Some(pos) = stack.pop() {
            for dir in ALL_DIRECTIONS {
                if let Some(next) = self.move_position(pos, dir) {
                    if self.is_open(next) && !interior.get(next) {
                        interior.set(next);
                        stack.push(next);
                    }
                }
            }
        }

        for y in 0..self.height {
            for x in 0..self.width {
                let pos = Position(x, y);
                if self.get_tile(pos) == Tile::Wall || interior.get(pos) {
                    continue;
                }
                if self.get_tile(pos) == Tile::Goal {
                    return Err(format!("Goal at {} outside the playing field", pos));
                }
                if self.start_boxes.contains(&pos) {
                    return Err(format!("Box at {} outside the playing field", pos));
                }
                self.tiles[y as usize][x as usize] = Tile::Wall;
                self.exterior.set(pos);
            }
        }
        Ok(())
    }

    /// Compute the dead-square tables: the complement of the cells a lone
    /// box could occupy and still reach some goal (by pushes for forward
    /// play, by pulls for retrograde analyses).
    fn compute_dead_squares(&mut self) {
        self.push_dead_squares = self.retrograde_reach(Retrograde::Push).invert();
        self.pull_dead_squares = self.retrograde_reach(Retrograde::Pull).invert();
    }

    /// Multi-source BFS outward from every goal at once. An open cell joins
    /// the reach set when moving its box one step toward an already-reached
    /// cell leaves room for the player on the required side.
    fn retrograde_reach(&self, mode: Retrograde) -> RawBitboard {
        let mut reach = RawBitboard::new();
        let mut frontier: VecDeque<Position> = VecDeque::new();

        for &goal in &self.goals {
            if !reach.get(goal) {
                reach.set(goal);
                frontier.push_back(goal);
            }
        }

        while let Some(known) = frontier.pop_front() {
            for dir in ALL_DIRECTIONS {
                let Some(cell) = self.move_position(known, dir) else {
                    continue;
                };
                if !self.is_open(cell) || reach.get(cell) {
                    continue;
                }
                let support = match mode {
                    // pushing cell -> known puts the player on the far side
                    // of the box
                    Retrograde::Push => self.move_position(cell, dir),
                    // pulling cell -> known puts the player one past the
                    // destination
                    Retrograde::Pull => self.move_position(known, dir.reverse()),
                };
                if support.is_some_and(|p| self.is_open(p)) {
                    reach.set(cell);
                    frontier.push_back(cell);
                }
            }
        }

        reach
    }

    /// BFS over pulls from each goal: the resulting table holds the minimum
    /// number of pushes needed to move a lone box to that goal.
    fn compute_goal_distances(&mut self) {
        let mut distances = Vec::with_capacity(self.goals.len());
        for &goal in &self.goals {
            let mut table = [[u16::MAX; MAX_SIZE]; MAX_SIZE];
            self.bfs_pulls(goal, &mut table, &RawBitboard::new());
            distances.push(table);
        }
        self.goal_distances = distances;
    }

    /// Distance form of the pull relation: fills `distances[y][x]` with the
    /// minimum pushes to bring a lone box from (x, y) onto `goal_pos`.
    /// Cells in `blocked` act as walls (the packing pre-analysis closes
    /// already-filled goals this way).
    pub(crate) fn bfs_pulls(
        &self,
        goal_pos: Position,
        distances: &mut [[u16; MAX_SIZE]; MAX_SIZE],
        blocked: &RawBitboard,
    ) {
        if blocked.get(goal_pos) {
            return;
        }

        let mut frontier = VecDeque::from([goal_pos]);
        distances[goal_pos.1 as usize][goal_pos.0 as usize] = 0;

        while let Some(known) = frontier.pop_front() {
            let next_dist = distances[known.1 as usize][known.0 as usize] + 1;

            for dir in ALL_DIRECTIONS {
                let Some(cell) = self.move_position(known, dir) else {
                    continue;
                };
                let Some(support) = self.move_position(cell, dir) else {
                    continue;
                };
                if !self.is_open(cell)
                    || !self.is_open(support)
                    || blocked.get(cell)
                    || blocked.get(support)
                    || distances[cell.1 as usize][cell.0 as usize] != u16::MAX
                {
                    continue;
                }
                distances[cell.1 as usize][cell.0 as usize] = next_dist;
                frontier.push_back(cell);
            }
        }
    }

    /// Classify tunnel cells (walled on both sides of one axis) and partition
    /// the remaining floor into rooms.
    fn compute_rooms(&mut self) {
        let walled = |pos: Option<Position>| match pos {
            Some(p) => self.get_tile(p) == Tile::Wall,
            None => true,
        };

        let mut tunnels = RawBitboard::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let pos = Position(x, y);
                if self.get_tile(pos) == Tile::Wall {
                    continue;
                }
                let horizontal = walled(self.move_position(pos, Direction::Left))
                    && walled(self.move_position(pos, Direction::Right));
                let vertical = walled(self.move_position(pos, Direction::Up))
                    && walled(self.move_position(pos, Direction::Down));
                if horizontal || vertical {
                    tunnels.set(pos);
                }
            }
        }

        let mut room_of = [[NO_ROOM; MAX_SIZE]; MAX_SIZE];
        let mut room_count = 0u8;
        for y in 0..self.height {
            for x in 0..self.width {
                let pos = Position(x, y);
                if self.get_tile(pos) == Tile::Wall
                    || tunnels.get(pos)
                    || room_of[y as usize][x as usize] != NO_ROOM
                {
                    continue;
                }
                // Flood one room of non-tunnel floor cells
                let mut stack = vec![pos];
                room_of[y as usize][x as usize] = room_count;
                while let Some(curr) = stack.pop() {
                    for dir in ALL_DIRECTIONS {
                        if let Some(next) = self.move_position(curr, dir) {
                            if self.get_tile(next) != Tile::Wall
                                && !tunnels.get(next)
                                && room_of[next.1 as usize][next.0 as usize] == NO_ROOM
                            {
                                room_of[next.1 as usize][next.0 as usize] = room_count;
                                stack.push(next);
                            }
                        }
                    }
                }
                room_count += 1;
            }
        }

        self.tunnels = tunnels;
        self.room_of = room_of;
        self.room_count = room_count;
    }

    pub fn width(&self) -> usize {
        self.width as usize
    }

    pub fn height(&self) -> usize {
        self.height as usize
    }

    pub fn get_tile(&self, pos: Position) -> Tile {
        self.tiles[pos.1 as usize][pos.0 as usize]
    }

    /// Floor or goal (anything a box or the player may occupy).
    pub fn is_open(&self, pos: Position) -> bool {
        self.get_tile(pos) != Tile::Wall
    }

    pub fn is_goal(&self, pos: Position) -> bool {
        self.get_tile(pos) == Tile::Goal
    }

    pub fn player_start(&self) -> Position {
        self.player_start
    }

    pub fn start_boxes(&self) -> &[Position] {
        &self.start_boxes
    }

    pub fn goals(&self) -> &[Position] {
        &self.goals
    }

    pub fn box_count(&self) -> usize {
        self.start_boxes.len()
    }

    /// Index of the goal at `pos` in `goals()`, if any.
    pub fn goal_at(&self, pos: Position) -> Option<usize> {
        let idx = self.goal_index[pos.1 as usize][pos.0 as usize];
        if idx == NO_GOAL { None } else { Some(idx as usize) }
    }

    pub fn is_push_dead_square(&self, pos: Position) -> bool {
        self.push_dead_squares.get(pos)
    }

    pub fn is_pull_dead_square(&self, pos: Position) -> bool {
        self.pull_dead_squares.get(pos)
    }

    pub fn is_tunnel(&self, pos: Position) -> bool {
        self.tunnels.get(pos)
    }

    pub fn room_of(&self, pos: Position) -> Option<u8> {
        let room = self.room_of[pos.1 as usize][pos.0 as usize];
        if room == NO_ROOM { None } else { Some(room) }
    }

    pub fn room_count(&self) -> usize {
        self.room_count as usize
    }

    /// Minimum pushes for a lone box at `pos` to reach goal `goal_idx`.
    pub fn goal_distance(&self, goal_idx: usize, pos: Position) -> u16 {
        self.goal_distances[goal_idx][pos.1 as usize][pos.0 as usize]
    }

    /// Move from position in the given direction.
    /// Returns Some(new_position) if the new position is within bounds, None otherwise.
    pub fn move_position(&self, pos: Position, dir: Direction) -> Option<Position> {
        let (dx, dy) = dir.delta();
        let new_x = pos.0 as i32 + dx as i32;
        let new_y = pos.1 as i32 + dy as i32;

        if new_x >= 0 && new_y >= 0 && new_x < self.width as i32 && new_y < self.height as i32 {
            Some(Position(new_x as u8, new_y as u8))
        } else {
            None
        }
    }

    /// Render the board with the given dynamic contents in text format.
    pub fn render(&self, boxes: &[Position], player: Position) -> String {
        let mut out = String::new();
        for y in 0..self.height {
            let mut line = String::new();
            for x in 0..self.width {
                let pos = Position(x, y);
                let tile = self.get_tile(pos);
                let has_box = boxes.contains(&pos);

                let ch = if pos == player {
                    match tile {
                        Tile::Goal => '+',
                        _ => '@',
                    }
                } else if has_box {
                    match tile {
                        Tile::Goal => '*',
                        _ => '$',
                    }
                } else if self.exterior.get(pos) {
                    ' '
                } else {
                    match tile {
                        Tile::Wall => '#',
                        Tile::Floor => ' ',
                        Tile::Goal => '.',
                    }
                };
                line.push(ch);
            }
            // Trim trailing spaces to match original input format
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&self.start_boxes, self.player_start))
    }
}
