//! Glitch parameter combinations and the sources that enumerate them
//!
//! A [`Combo`] is one (trigger_count, delay, duration) tuple. A
//! [`ComboSource`] produces the finite, ordered list of combos a sweep
//! walks through:
//! - [`GridSweep`] - full cartesian product of three stepped ranges
//! - [`RandomSweep`] - seeded random subset of a grid
//! - [`ComboList`] - explicit list, e.g. loaded from JSON

use super::error::GlitchError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Largest trigger count representable in 14 bits
pub const TRIGGER_COUNT_MAX: u32 = (1 << 14) - 1;
/// Largest delay; the wire carries `delay - 1` in 21 bits
pub const DELAY_MAX: u32 = 1 << 21;
/// Largest duration; the wire carries `duration - 1` in 7 bits
pub const DURATION_MAX: u32 = 1 << 7;

/// One candidate glitch configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combo {
    /// Trigger edges to count before arming
    pub trigger_count: u32,
    /// Cycles between trigger and glitch
    pub delay: u32,
    /// Glitch pulse length in cycles
    pub duration: u32,
}

impl Combo {
    /// Create a combo without validating it
    pub fn new(trigger_count: u32, delay: u32, duration: u32) -> Self {
        Self {
            trigger_count,
            delay,
            duration,
        }
    }

    /// Check every field against its wire range
    pub fn validate(&self) -> Result<(), GlitchError> {
        check_field("trigger_count", self.trigger_count, 0, TRIGGER_COUNT_MAX)?;
        check_field("delay", self.delay, 1, DELAY_MAX)?;
        check_field("duration", self.duration, 1, DURATION_MAX)?;
        Ok(())
    }

    /// Whether every field is in range
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl fmt::Display for Combo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Combo(trigger_count={}, delay={}, duration={})",
            self.trigger_count, self.delay, self.duration
        )
    }
}

fn check_field(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), GlitchError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(GlitchError::InvalidParameterRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Producer of the ordered combos a sweep attempts.
///
/// The list is finite and deterministic for the same parameters, and every
/// element passes [`Combo::validate`].
pub trait ComboSource {
    /// Materialize the combos in attempt order
    fn produce(&self) -> Vec<Combo>;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Inclusive stepped range, written `START[:END[:STEP]]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamRange {
    /// First value
    pub start: u32,
    /// Last value (inclusive)
    pub end: u32,
    /// Increment, at least 1
    pub step: u32,
}

impl ParamRange {
    /// Range with step 1
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end, step: 1 }
    }

    /// Range holding a single value
    pub fn single(value: u32) -> Self {
        Self::new(value, value)
    }

    /// Set step
    #[must_use]
    pub fn step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    /// All values in the range
    pub fn values(&self) -> impl Iterator<Item = u32> {
        let step = self.step.max(1) as usize;
        (self.start..=self.end).step_by(step)
    }

    /// Number of values in the range
    pub fn len(&self) -> usize {
        if self.end < self.start {
            return 0;
        }
        ((self.end - self.start) / self.step.max(1)) as usize + 1
    }

    /// Whether the range yields no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ParamRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.step == 1 {
            write!(f, "{}:{}", self.start, self.end)
        } else {
            write!(f, "{}:{}:{}", self.start, self.end, self.step)
        }
    }
}

impl FromStr for ParamRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|e| format!("invalid number '{}' in range '{}': {}", p, s, e))
        };

        let range = match parts.as_slice() {
            [v] => Self::single(parse(v)?),
            [a, b] => Self::new(parse(a)?, parse(b)?),
            [a, b, c] => Self::new(parse(a)?, parse(b)?).step(parse(c)?),
            _ => return Err(format!("expected START[:END[:STEP]], got '{}'", s)),
        };

        if range.step == 0 {
            return Err(format!("step must be at least 1 in '{}'", s));
        }
        if range.end < range.start {
            return Err(format!("end is before start in '{}'", s));
        }
        Ok(range)
    }
}

/// Full grid over trigger count x delay x duration.
///
/// Ordered trigger_count-major, then delay, then duration.
#[derive(Debug, Clone)]
pub struct GridSweep {
    trigger_counts: ParamRange,
    delays: ParamRange,
    durations: ParamRange,
}

impl GridSweep {
    /// Build a grid, rejecting ranges whose endpoints fall outside the wire limits
    pub fn new(
        trigger_counts: ParamRange,
        delays: ParamRange,
        durations: ParamRange,
    ) -> Result<Self, GlitchError> {
        // Every grid point lies between the two corners
        Combo::new(trigger_counts.start, delays.start, durations.start).validate()?;
        Combo::new(trigger_counts.end, delays.end, durations.end).validate()?;

        Ok(Self {
            trigger_counts,
            delays,
            durations,
        })
    }

    /// Number of combos the grid yields
    pub fn len(&self) -> usize {
        self.trigger_counts.len() * self.delays.len() * self.durations.len()
    }

    /// Whether the grid is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn combo_at(&self, index: usize) -> Combo {
        let n_dur = self.durations.len();
        let n_delay = self.delays.len();
        let duration = index % n_dur;
        let delay = (index / n_dur) % n_delay;
        let trigger_count = index / (n_dur * n_delay);

        Combo::new(
            self.trigger_counts.start + trigger_count as u32 * self.trigger_counts.step.max(1),
            self.delays.start + delay as u32 * self.delays.step.max(1),
            self.durations.start + duration as u32 * self.durations.step.max(1),
        )
    }
}

impl ComboSource for GridSweep {
    fn produce(&self) -> Vec<Combo> {
        let mut combos = Vec::with_capacity(self.len());
        for trigger_count in self.trigger_counts.values() {
            for delay in self.delays.values() {
                for duration in self.durations.values() {
                    combos.push(Combo::new(trigger_count, delay, duration));
                }
            }
        }
        combos
    }

    fn describe(&self) -> String {
        format!(
            "grid trigger_count={} delay={} duration={} ({} combos)",
            self.trigger_counts,
            self.delays,
            self.durations,
            self.len()
        )
    }
}

/// Seeded random subset of a grid, in grid order
#[derive(Debug, Clone)]
pub struct RandomSweep {
    grid: GridSweep,
    samples: usize,
    seed: u64,
}

impl RandomSweep {
    /// Pick `samples` distinct grid points using `seed`
    pub fn new(grid: GridSweep, samples: usize, seed: u64) -> Self {
        Self { grid, samples, seed }
    }
}

impl ComboSource for RandomSweep {
    fn produce(&self) -> Vec<Combo> {
        let total = self.grid.len();
        let amount = self.samples.min(total);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut indices = rand::seq::index::sample(&mut rng, total, amount).into_vec();
        indices.sort_unstable();
        indices.into_iter().map(|i| self.grid.combo_at(i)).collect()
    }

    fn describe(&self) -> String {
        format!(
            "random {} of {} (seed {})",
            self.samples.min(self.grid.len()),
            self.grid.describe(),
            self.seed
        )
    }
}

/// Failure loading a combo list file
#[derive(Error, Debug)]
pub enum ComboListError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not a JSON array of combos
    #[error("malformed combo list: {0}")]
    Parse(#[from] serde_json::Error),

    /// A listed combo is out of range
    #[error(transparent)]
    Invalid(#[from] GlitchError),
}

/// Explicit list of combos
#[derive(Debug, Clone, Default)]
pub struct ComboList {
    combos: Vec<Combo>,
}

impl ComboList {
    /// Wrap a list, rejecting it if any element is out of range
    pub fn new(combos: Vec<Combo>) -> Result<Self, GlitchError> {
        for combo in &combos {
            combo.validate()?;
        }
        Ok(Self { combos })
    }

    /// Load a JSON array of combos
    pub fn load(path: &Path) -> Result<Self, ComboListError> {
        let content = std::fs::read_to_string(path)?;
        let combos: Vec<Combo> = serde_json::from_str(&content)?;
        Ok(Self::new(combos)?)
    }
}

impl ComboSource for ComboList {
    fn produce(&self) -> Vec<Combo> {
        self.combos.clone()
    }

    fn describe(&self) -> String {
        format!("list of {} combos", self.combos.len())
    }
}
