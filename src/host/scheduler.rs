//! Weighted locality selection (spec.md §4.1/§4.2, §9).
//!
//! Design note §9 suggests an EDF (earliest-deadline-first) weighted
//! scheduler: each locality gets a virtual finish time `1 / weight` past
//! its last selection, and the scheduler always emits the locality with
//! the smallest finish time, advancing it by `1 / weight` afterward. This
//! converges to `weight_i / sum(weight)` selection frequency without
//! needing a cumulative-weight binary search on every pick, and handles
//! weight-zero localities for free: they're simply never inserted into the
//! schedule.
//!
//! There's no scheduler of this shape in the retrieved `linkerd-tcp`
//! source (its two-random-choices load balancer in `lb/mod.rs` picks
//! directly from a flat endpoint list), so this is grounded on design note
//! §9's explicit guidance rather than an existing file.

#[derive(Clone, Debug)]
struct Entry {
    index: usize,
    weight: f64,
    finish: f64,
}

/// A weighted round-robin-ish scheduler over locality indices.
///
/// Rebuilt from scratch on every membership update (construction is O(n
/// log n) in the number of localities, which is tiny and infrequent);
/// `pick` is O(log n).
#[derive(Default)]
pub struct LocalityScheduler {
    entries: Vec<Entry>,
}

impl LocalityScheduler {
    /// Builds a scheduler from effective per-locality weights. Localities
    /// with weight `0.0` are dropped from the schedule entirely, per
    /// spec.md §4.1 ("a locality with effective weight 0 is never
    /// selected").
    pub fn new(effective_weights: &[f64]) -> LocalityScheduler {
        let entries = effective_weights
            .iter()
            .enumerate()
            .filter(|&(_, &w)| w > 0.0)
            .map(|(index, &weight)| Entry {
                index,
                weight,
                finish: 1.0 / weight,
            })
            .collect();
        LocalityScheduler { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the locality index with the lowest virtual finish time and
    /// advances it, or `None` if every locality has weight zero (spec.md
    /// §4.2: `choose_locality()` returns `none` iff total effective weight
    /// is 0).
    pub fn pick(&mut self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let winner = self
            .entries
            .iter()
            .enumerate()
            .min_by(|&(_, a), &(_, b)| a.finish.partial_cmp(&b.finish).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        let index = {
            let e = &mut self.entries[winner];
            e.finish += 1.0 / e.weight;
            e.index
        };
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::LocalityScheduler;
    use std::collections::HashMap;

    #[test]
    fn empty_when_all_weights_zero() {
        let mut s = LocalityScheduler::new(&[0.0, 0.0]);
        assert!(s.is_empty());
        assert_eq!(s.pick(), None);
    }

    #[test]
    fn converges_to_weight_ratio() {
        let mut s = LocalityScheduler::new(&[1.0, 2.0]);
        let mut counts = HashMap::new();
        for _ in 0..600 {
            let i = s.pick().unwrap();
            *counts.entry(i).or_insert(0) += 1;
        }
        let c0 = *counts.get(&0).unwrap_or(&0) as f64;
        let c1 = *counts.get(&1).unwrap_or(&0) as f64;
        // Expect roughly 200 / 400 (1:2 ratio) over 600 picks.
        assert!((c0 - 200.0).abs() < 30.0, "c0={}", c0);
        assert!((c1 - 400.0).abs() < 30.0, "c1={}", c1);
    }

    #[test]
    fn skewed_ratio_matches_scenario_six() {
        // spec.md §8 scenario 6: effective weights 1*1/5 and 2*1/1 => ratio 1:10.
        let mut s = LocalityScheduler::new(&[0.2, 2.0]);
        let mut counts = [0u32; 2];
        for _ in 0..600 {
            counts[s.pick().unwrap()] += 1;
        }
        let total = counts[0] + counts[1];
        assert_eq!(total, 600);
        let ratio = f64::from(counts[1]) / f64::from(counts[0]);
        assert!((ratio - 10.0).abs() < 2.0, "ratio={}", ratio);
    }
}
