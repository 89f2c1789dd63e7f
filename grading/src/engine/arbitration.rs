//! Arbitration resolver
//!
//! Pure tie-break used when a third examiner has marked a disputed paper:
//! the third mark sides with whichever earlier mark it is closer to.

use serde::{Deserialize, Serialize};

/// Which pair of marks the third mark agreed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosestPair {
    FirstThird,
    SecondThird,
}

/// Outcome of [`resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Rounded average of the closest pair, or 0 when unresolved
    pub final_score: i64,
    pub resolved: bool,
    pub pair: ClosestPair,
}

/// Reconcile three totals against a tolerance
///
/// Equal distances prefer the first/third pair.
pub fn resolve(first: i64, second: i64, third: i64, tolerance: i64) -> Resolution {
    let to_first = (first - third).abs();
    let to_second = (second - third).abs();

    let (pair, partner, distance) = if to_first <= to_second {
        (ClosestPair::FirstThird, first, to_first)
    } else {
        (ClosestPair::SecondThird, second, to_second)
    };

    if distance <= tolerance {
        Resolution {
            final_score: average(partner, third),
            resolved: true,
            pair,
        }
    } else {
        Resolution {
            final_score: 0,
            resolved: false,
            pair,
        }
    }
}

/// Mean of two marks, rounded half away from zero
pub fn average(a: i64, b: i64) -> i64 {
    ((a + b) as f64 / 2.0).round() as i64
}

/// Element-wise [`average`] of two score vectors
pub fn average_items(a: &[i64], b: &[i64]) -> Vec<i64> {
    a.iter().zip(b).map(|(x, y)| average(*x, *y)).collect()
}
