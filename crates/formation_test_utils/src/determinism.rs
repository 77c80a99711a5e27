//! Determinism testing utilities.
//!
//! Provides a harness for verifying that formation layouts and the host
//! simulation produce identical results given identical inputs.
//!
//! # Sources of non-determinism
//!
//! - **Floating-point math**: layouts use [`formation_core::math::Fixed`].
//! - **HashMap iteration order**: units are visited in sorted id order.
//! - **System randomness**: slot jitter comes from a seeded
//!   [`formation_core::layout::SlotRng`] stored in each formation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use formation_core::simulation::{Simulation, SHAPE_UPDATE_INTERVAL_MS};

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of steps simulated.
    pub steps: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for a deterministic run).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that all runs matched, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Formation simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Steps: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.steps,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a setup/step pair multiple times and compare the final hashes.
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    steps: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();
        for _ in 0..steps {
            step(&mut state);
        }
        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        steps,
    }
}

/// Run a simulation twice, one shape update per step, and compare hashes.
pub fn verify_simulation_determinism<F>(setup_fn: F, shape_updates: u64) -> bool
where
    F: Fn() -> Simulation,
{
    verify_determinism(
        2,
        shape_updates,
        &setup_fn,
        |sim: &mut Simulation| {
            sim.tick(SHAPE_UPDATE_INTERVAL_MS);
        },
        Simulation::state_hash,
    )
    .is_deterministic
}

/// Compare two runs step by step and report the first diverging step.
pub fn find_first_divergence<F>(setup_fn: F, shape_updates: u64) -> Option<u64>
where
    F: Fn() -> Simulation,
{
    let mut sim1 = setup_fn();
    let mut sim2 = setup_fn();

    if sim1.state_hash() != sim2.state_hash() {
        return Some(0);
    }

    for step in 1..=shape_updates {
        sim1.tick(SHAPE_UPDATE_INTERVAL_MS);
        sim2.tick(SHAPE_UPDATE_INTERVAL_MS);
        if sim1.state_hash() != sim2.state_hash() {
            return Some(step);
        }
    }

    None
}

/// Verify that a save/load round-trip preserves the state hash.
pub fn verify_serialization_determinism<F>(setup_fn: F, shape_updates: u64) -> bool
where
    F: Fn() -> Simulation,
{
    let mut sim = setup_fn();
    for _ in 0..shape_updates {
        sim.tick(SHAPE_UPDATE_INTERVAL_MS);
    }
    let hash_before = sim.state_hash();

    let Ok(bytes) = sim.serialize() else {
        return false;
    };
    let Ok(mut restored) = Simulation::deserialize(&bytes) else {
        return false;
    };
    if restored.state_hash() != hash_before {
        return false;
    }

    sim.tick(SHAPE_UPDATE_INTERVAL_MS);
    restored.tick(SHAPE_UPDATE_INTERVAL_MS);
    sim.state_hash() == restored.state_hash()
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for formation property tests.
pub mod strategies {
    use formation_core::data::{FormationShape, FormationTemplate, SortingOrder};
    use formation_core::math::{Fixed, Vec2Fixed};
    use proptest::prelude::*;

    /// Fixed-point coordinate in a typical map range.
    pub fn arb_fixed_position() -> impl Strategy<Value = Fixed> {
        (-2000i32..2000i32).prop_map(Fixed::from_num)
    }

    /// Fixed-point 2D world position.
    pub fn arb_vec2_position() -> impl Strategy<Value = Vec2Fixed> {
        (arb_fixed_position(), arb_fixed_position()).prop_map(|(x, y)| Vec2Fixed::new(x, y))
    }

    /// Walk speed in tenths, 1.0 to 20.0.
    pub fn arb_walk_speed() -> impl Strategy<Value = Fixed> {
        (10i32..200i32).prop_map(|tenths| Fixed::from_num(tenths) / Fixed::from_num(10))
    }

    /// Member count for a formation.
    pub fn arb_member_count() -> impl Strategy<Value = usize> {
        2usize..60
    }

    /// Row shape (no scatter).
    pub fn arb_row_shape() -> impl Strategy<Value = FormationShape> {
        prop_oneof![Just(FormationShape::Square), Just(FormationShape::Triangle)]
    }

    /// Slot sorting order.
    pub fn arb_sorting_order() -> impl Strategy<Value = SortingOrder> {
        prop_oneof![
            Just(SortingOrder::Default),
            Just(SortingOrder::FillFromTheSides),
            Just(SortingOrder::FillToTheCenter),
        ]
    }

    /// A valid template built from random layout settings.
    pub fn arb_template() -> impl Strategy<Value = FormationTemplate> {
        (
            prop_oneof![arb_row_shape(), Just(FormationShape::Special)],
            arb_sorting_order(),
            any::<bool>(),
            1i32..40,
            0i32..8,
            0i32..6,
            prop::option::of(1usize..10),
            prop::option::of(1usize..8),
        )
            .prop_map(
                |(shape, sorting_order, shift_rows, ratio, sloppiness, gap, max_columns, max_rows)| {
                    FormationTemplate {
                        shape,
                        sorting_order,
                        shift_rows,
                        width_depth_ratio: Fixed::from_num(ratio) / Fixed::from_num(4),
                        sloppiness: Fixed::from_num(sloppiness) / Fixed::from_num(10),
                        center_gap: Fixed::from_num(gap),
                        max_columns,
                        max_rows,
                        ..FormationTemplate::new("Random")
                    }
                },
            )
    }

    /// Like [`arb_template`] but without jitter, for exact geometry checks.
    pub fn arb_tight_template() -> impl Strategy<Value = FormationTemplate> {
        arb_template().prop_map(|template| FormationTemplate {
            sloppiness: Fixed::ZERO,
            ..template
        })
    }
}
