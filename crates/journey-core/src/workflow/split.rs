//! Split branch selection.
//!
//! Weighted selection walks branches in declaration order against a uniform
//! draw in `[0, 100)`. Weights that do not sum to 100 are normalized by their
//! total, so `[1, 1]` behaves like `[50, 50]`.

use journey_types::workflow::{SplitBranch, SplitConfig};
use rand::Rng;
use serde_json::Value;

use super::context::value_to_string;

/// Pick a branch by weight. `None` only when `branches` is empty.
pub fn pick_weighted<'a, R: Rng + ?Sized>(
    branches: &'a [SplitBranch],
    rng: &mut R,
) -> Option<&'a SplitBranch> {
    let total: f64 = branches.iter().map(|b| b.percentage.max(0.0)).sum();
    if total <= 0.0 {
        return branches.first();
    }

    let draw: f64 = rng.gen_range(0.0..100.0);
    let mut cumulative = 0.0;
    for branch in branches {
        cumulative += branch.percentage.max(0.0) * 100.0 / total;
        if draw < cumulative {
            return Some(branch);
        }
    }

    // Floating-point rounding can leave the draw just above the last bound.
    branches.iter().rev().find(|b| b.percentage > 0.0)
}

/// Outcome of mapping a field value onto a field-based split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldBranch {
    /// The value (or the default branch) selected this branch id.
    Branch(String),
    /// No mapping and no default branch.
    Unmapped(String),
    /// Field absent and no default branch.
    Missing,
}

/// Map a resolved field value to a branch of a field-based split.
pub fn branch_for_field(split: &SplitConfig, value: Option<&Value>) -> FieldBranch {
    match value.filter(|v| !v.is_null()) {
        Some(value) => {
            let key = value_to_string(value);
            match split.field_values.get(&key).or(split.default_branch.as_ref()) {
                Some(branch) => FieldBranch::Branch(branch.clone()),
                None => FieldBranch::Unmapped(key),
            }
        }
        None => match &split.default_branch {
            Some(branch) => FieldBranch::Branch(branch.clone()),
            None => FieldBranch::Missing,
        },
    }
}
