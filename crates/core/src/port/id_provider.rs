// ID Generator Port (seedable for deterministic testing)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use crate::domain::JobId;

/// Length of generated job ids
pub const JOB_ID_LEN: usize = 10;

/// Base-36 alphabet: 36^10 ~ 3.7e15 possible ids
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Job id generator interface
///
/// Implementations only promise a large random space; collisions are
/// detected by the store at creation time.
pub trait IdGenerator: Send + Sync {
    /// Generate a fresh job id
    fn generate(&self) -> JobId;
}

/// Random base-36 id generator (production, or seeded in tests)
pub struct RandomIdGenerator {
    rng: Mutex<StdRng>,
}

impl RandomIdGenerator {
    /// Seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic sequence for tests
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> JobId {
        // A poisoned lock still holds a usable RNG
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let token: String = (0..JOB_ID_LEN)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();

        JobId::from_generated(token)
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out a fixed list of ids, then falls back to a seeded generator
    pub struct SequenceIdGenerator {
        queued: Mutex<VecDeque<JobId>>,
        fallback: RandomIdGenerator,
    }

    impl SequenceIdGenerator {
        pub fn new(ids: &[&str]) -> Self {
            let queued = ids
                .iter()
                .map(|s| JobId::from_generated(s.to_string()))
                .collect();
            Self {
                queued: Mutex::new(queued),
                fallback: RandomIdGenerator::seeded(7),
            }
        }
    }

    impl IdGenerator for SequenceIdGenerator {
        fn generate(&self) -> JobId {
            let next = self
                .queued
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front();
            next.unwrap_or_else(|| self.fallback.generate())
        }
    }
}
