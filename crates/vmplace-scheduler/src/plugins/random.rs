//! Uniform random scoring.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::framework::{CycleState, NodeInfo, Plugin, PluginName, ScorePlugin, Status, VmRequest};

/// Upper bound (exclusive) of a random score.
pub const MAX_RANDOM_SCORE: i64 = 100;

/// Scores every node with an independent value in `[0, 100)`.
///
/// The generator is reseeded from the clock on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Random;

impl Random {
    fn seed() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::from(d.subsec_nanos()) ^ d.as_secs())
    }
}

impl Plugin for Random {
    fn name(&self) -> PluginName {
        PluginName::Random
    }
}

impl ScorePlugin for Random {
    fn score(
        &self,
        _state: &mut CycleState,
        _request: &VmRequest,
        _node: &NodeInfo,
    ) -> Result<i64, Status> {
        let mut rng = StdRng::seed_from_u64(Self::seed());
        Ok(rng.gen_range(0..MAX_RANDOM_SCORE))
    }
}
