use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::bits::Position;
use crate::board::MAX_SIZE;

/// Zobrist hash tables for puzzle states. The tables depend only on the seed,
/// so two runs with the same seed hash identically.
pub struct Zobrist {
    box_hashes: [[u64; MAX_SIZE]; MAX_SIZE],
    player_hashes: [[u64; MAX_SIZE]; MAX_SIZE],
}

impl Zobrist {
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut box_hashes = [[0u64; MAX_SIZE]; MAX_SIZE];
        for row in box_hashes.iter_mut() {
            for cell in row.iter_mut() {
                *cell = rng.next_u64();
            }
        }

        let mut player_hashes = [[0u64; MAX_SIZE]; MAX_SIZE];
        for row in player_hashes.iter_mut() {
            for cell in row.iter_mut() {
                *cell = rng.next_u64();
            }
        }

        Zobrist {
            box_hashes,
            player_hashes,
        }
    }

    /// Get hash value for a box at a specific position
    pub fn box_hash(&self, pos: Position) -> u64 {
        self.box_hashes[pos.1 as usize][pos.0 as usize]
    }

    /// Get hash value for player at a specific position
    pub fn player_hash(&self, pos: Position) -> u64 {
        self.player_hashes[pos.1 as usize][pos.0 as usize]
    }

    /// Combined hash over a box set and a (canonical) player position.
    pub fn state_hash(&self, boxes: &[Position], player: Position) -> u64 {
        let mut hash = self.player_hash(player);
        for &pos in boxes {
            hash ^= self.box_hash(pos);
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_tables() {
        let a = Zobrist::new(42);
        let b = Zobrist::new(42);
        assert_eq!(a.box_hash(Position(3, 7)), b.box_hash(Position(3, 7)));
        assert_eq!(a.player_hash(Position(1, 2)), b.player_hash(Position(1, 2)));
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = Zobrist::new(1);
        let b = Zobrist::new(2);
        assert_ne!(a.box_hash(Position(0, 0)), b.box_hash(Position(0, 0)));
    }

    #[test]
    fn test_state_hash_order_independent() {
        let z = Zobrist::new(7);
        let boxes_a = [Position(1, 1), Position(2, 2)];
        let boxes_b = [Position(2, 2), Position(1, 1)];
        assert_eq!(
            z.state_hash(&boxes_a, Position(5, 5)),
            z.state_hash(&boxes_b, Position(5, 5))
        );
    }
}
