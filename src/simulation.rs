//! Synthetic values for degraded mode
//!
//! When the device is absent or a variable belongs to the simulated set, the
//! poller asks this generator for a plausible next value so the served state
//! keeps moving.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::registry::{DataType, Value};

/// Lower clamp of the primary signal's random walk
pub const WALK_MIN: i32 = 50;
/// Upper clamp of the primary signal's random walk
pub const WALK_MAX: i32 = 150;
/// Starting point of the primary signal
pub const WALK_START: i32 = 100;

/// Probability that a simulated BOOL flips on a tick
const BOOL_FLIP_PROBABILITY: f64 = 0.10;
/// Probability that the walk takes a small step instead of a jump
const SMALL_STEP_PROBABILITY: f64 = 0.80;

/// Per-type value generator
#[derive(Debug)]
pub struct SimulationGenerator {
    rng: StdRng,
    primary: String,
    walk: i32,
}

impl SimulationGenerator {
    /// Generator seeded from OS entropy
    pub fn new(primary: impl Into<String>) -> Self {
        Self::from_rng(primary, StdRng::from_entropy())
    }

    /// Deterministic generator
    pub fn with_seed(primary: impl Into<String>, seed: u64) -> Self {
        Self::from_rng(primary, StdRng::seed_from_u64(seed))
    }

    fn from_rng(primary: impl Into<String>, rng: StdRng) -> Self {
        Self {
            rng,
            primary: primary.into(),
            walk: WALK_START,
        }
    }

    /// Name of the variable that follows the bounded random walk
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Produce the next value for a variable
    pub fn next_value(&mut self, name: &str, data_type: DataType, last: Option<&Value>) -> Value {
        match data_type {
            DataType::Bool => match last {
                Some(Value::Bool(current)) => {
                    if self.rng.gen_bool(BOOL_FLIP_PROBABILITY) {
                        Value::Bool(!current)
                    } else {
                        Value::Bool(*current)
                    }
                }
                _ => Value::Bool(self.rng.gen()),
            },
            DataType::Byte => Value::Byte(self.rng.gen()),
            DataType::Int if name == self.primary => Value::Int(self.step_walk()),
            DataType::Int => Value::Int(self.rng.gen_range(0..=100)),
            DataType::DInt => Value::DInt(self.rng.gen_range(0..10_000)),
            DataType::Real => Value::Real(self.rng.gen_range(20.0..80.0)),
        }
    }

    /// Advance the walk: mostly small moves with occasional jumps, clamped
    fn step_walk(&mut self) -> i32 {
        let delta = if self.rng.gen_bool(SMALL_STEP_PROBABILITY) {
            self.rng.gen_range(-2..=2)
        } else {
            self.rng.gen_range(-10..=10)
        };
        self.walk = (self.walk + delta).clamp(WALK_MIN, WALK_MAX);
        self.walk
    }
}
