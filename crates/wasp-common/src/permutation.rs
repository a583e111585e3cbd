//! Seeded deterministic permutations of peer indices.
//!
//! Every committee member derives the same permutation from the same seed,
//! so the permutation order doubles as the agreed leader rotation order.
//! Randomness is drawn from SHA-256 over `(seed, counter)`, which keeps the
//! result independent of platform and of any RNG crate version.

use crate::Hash256;

/// A permutation of `[0, size)` with a cursor.
#[derive(Debug, Clone)]
pub struct Permutation16 {
    size: u16,
    seed: Hash256,
    permutation: Vec<u16>,
    cursor: u16,
}

impl Permutation16 {
    /// Build the permutation of `[0, size)` determined by `seed`.
    pub fn new(size: u16, seed: &[u8]) -> Self {
        let mut ret = Self {
            size,
            seed: Hash256::ZERO,
            permutation: Vec::new(),
            cursor: 0,
        };
        ret.shuffle(seed);
        ret
    }

    /// Recompute the permutation from a new seed and reset the cursor.
    pub fn shuffle(&mut self, seed: &[u8]) {
        self.seed = Hash256::hash_all(&[b"permutation16", seed]);
        self.permutation = (0..self.size).collect();
        let mut counter: u64 = 0;
        for i in (1..self.permutation.len()).rev() {
            let r = Hash256::hash_all(&[self.seed.as_bytes(), &counter.to_le_bytes()]).to_u64();
            counter += 1;
            let j = (r % (i as u64 + 1)) as usize;
            self.permutation.swap(i, j);
        }
        self.cursor = 0;
    }

    /// Element under the cursor.
    pub fn current(&self) -> u16 {
        self.permutation
            .get(self.cursor as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Advance the cursor cyclically and return the new current element.
    pub fn next(&mut self) -> u16 {
        if self.size > 0 {
            self.cursor = (self.cursor + 1) % self.size;
        }
        self.current()
    }

    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn get_array(&self) -> &[u16] {
        &self.permutation
    }
}

/// True if `perm` contains every value of `[0, perm.len())` exactly once.
pub fn valid_permutation(perm: &[u16]) -> bool {
    let mut seen = vec![false; perm.len()];
    for &v in perm {
        match seen.get_mut(v as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_permutation_valid_for_many_sizes_and_seeds() {
        let mut rng = rand::thread_rng();
        let mut n: u16 = 1;
        while n < 1000 {
            for _ in 0..10 {
                let mut seed = [0u8; 32];
                rng.fill_bytes(&mut seed);
                let perm = Permutation16::new(n, &seed);
                assert!(
                    valid_permutation(perm.get_array()),
                    "invalid permutation for n={}",
                    n
                );
            }
            n += 3;
        }
    }

    #[test]
    fn test_same_seed_same_order() {
        let a = Permutation16::new(7, b"state tx id");
        let b = Permutation16::new(7, b"state tx id");
        assert_eq!(a.get_array(), b.get_array());

        let c = Permutation16::new(7, b"another seed");
        // Orders may coincide by chance; the seed must still be recorded.
        assert_ne!(a.seed, c.seed);
    }

    #[test]
    fn test_next_cycles_through_all() {
        let mut p = Permutation16::new(5, b"seed");
        let first = p.current();
        let mut visited = vec![first];
        for _ in 0..4 {
            visited.push(p.next());
        }
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 1, 2, 3, 4]);
        assert_eq!(p.next(), first);
    }

    #[test]
    fn test_shuffle_resets_cursor() {
        let mut p = Permutation16::new(4, b"a");
        p.next();
        p.next();
        assert_eq!(p.cursor(), 2);
        p.shuffle(b"b");
        assert_eq!(p.cursor(), 0);
        assert!(valid_permutation(p.get_array()));
    }

    #[test]
    fn test_valid_permutation_rejects() {
        assert!(valid_permutation(&[]));
        assert!(valid_permutation(&[1, 0, 2]));
        assert!(!valid_permutation(&[0, 0, 2]));
        assert!(!valid_permutation(&[0, 3, 1]));
    }

    #[test]
    fn test_single_element() {
        let mut p = Permutation16::new(1, b"x");
        assert_eq!(p.current(), 0);
        assert_eq!(p.next(), 0);
    }
}
