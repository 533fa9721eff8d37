use std::fmt;
use std::fs;
use std::io;

use crate::board::Board;

/// Error type for loading and parsing puzzles.
#[derive(Debug)]
pub enum SolveError {
    /// IO error when reading from file
    Io(io::Error),
    /// Invalid level content
    MalformedLevel(String),
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveError::Io(err) => write!(f, "IO error: {}", err),
            SolveError::MalformedLevel(msg) => write!(f, "Malformed level: {}", msg),
        }
    }
}

impl From<io::Error> for SolveError {
    fn from(err: io::Error) -> Self {
        SolveError::Io(err)
    }
}

impl From<String> for SolveError {
    fn from(err: String) -> Self {
        SolveError::MalformedLevel(err)
    }
}

/// A collection of Sokoban levels in XSB format.
#[derive(Debug)]
pub struct Levels {
    boards: Vec<Board>,
}

impl Levels {
    /// Parse a collection of XSB levels: puzzle rows grouped into blocks,
    /// with blank lines and `;`-comment lines acting as separators.
    pub fn from_text(contents: &str) -> Result<Self, SolveError> {
        let mut boards = Vec::new();
        let mut block: Vec<&str> = Vec::new();

        let is_separator = |line: &str| line.is_empty() || line.trim_start().starts_with(';');

        // The trailing sentinel flushes a final block not followed by a
        // separator
        for line in contents.lines().chain(std::iter::once("")) {
            if !is_separator(line) {
                block.push(line);
            } else if !block.is_empty() {
                boards.push(Board::from_text(&block.join("\n"))?);
                block.clear();
            }
        }

        Ok(Levels { boards })
    }

    /// Parse XSB-formatted Sokoban levels from a text file.
    pub fn from_file(path: &str) -> Result<Self, SolveError> {
        let contents = fs::read_to_string(path)?;
        Self::from_text(&contents)
    }

    /// Get the nth level (0-indexed).
    pub fn get(&self, index: usize) -> Option<&Board> {
        self.boards.get(index)
    }

    /// Get the number of levels.
    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }
}
