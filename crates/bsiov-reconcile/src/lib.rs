// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bsiov_core::FitsByRun;
use std::collections::BTreeSet;
use std::fmt;

/// Directional difference between two processed-lumi-section sequences.
///
/// `only_in_a`/`only_in_b` hold the indices of each side with no counterpart
/// on the other side within the matching tolerance, ascending. Reconciliation
/// produces data, never errors; whether a mismatch is fatal is the caller's
/// call.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub only_in_a: Vec<u32>,
    pub only_in_b: Vec<u32>,
    pub label_a: String,
    pub label_b: String,
}

impl Reconciliation {
    /// True when both sides cover the same lumi-sections.
    pub fn is_aligned(&self) -> bool {
        self.only_in_a.is_empty() && self.only_in_b.is_empty()
    }
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lumi-sections only in {}; {} only in {}",
            self.only_in_a.len(),
            self.label_a,
            self.only_in_b.len(),
            self.label_b
        )
    }
}

/// One run's section-level reconciliation inside a two-dataset comparison.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReconciliation {
    pub run: u32,
    pub sections: Reconciliation,
}

fn matches_within(haystack: &BTreeSet<u32>, index: u32, offset: u32) -> bool {
    let low = index.saturating_sub(offset);
    let high = index.saturating_add(offset);
    haystack.range(low..=high).next().is_some()
}

/// Computes the symmetric set difference of two index sequences under a
/// `±offset` matching tolerance.
///
/// An index of one side matches when the other side holds any index within
/// the tolerance window; with `offset == 0` this is exact set difference.
/// Input order and duplicates do not matter, outputs ascend, and swapping
/// the arguments swaps the outputs without changing them.
pub fn reconcile(
    a: &[u32],
    b: &[u32],
    offset: u32,
    label_a: &str,
    label_b: &str,
) -> Reconciliation {
    let set_a: BTreeSet<u32> = a.iter().copied().collect();
    let set_b: BTreeSet<u32> = b.iter().copied().collect();

    let only_in_a = set_a
        .iter()
        .copied()
        .filter(|&index| !matches_within(&set_b, index, offset))
        .collect();
    let only_in_b = set_b
        .iter()
        .copied()
        .filter(|&index| !matches_within(&set_a, index, offset))
        .collect();

    Reconciliation {
        only_in_a,
        only_in_b,
        label_a: label_a.to_string(),
        label_b: label_b.to_string(),
    }
}

/// Runs present in both datasets, ascending.
pub fn matched_runs(a: &FitsByRun, b: &FitsByRun) -> Vec<u32> {
    a.keys()
        .copied()
        .filter(|run| b.contains_key(run))
        .collect()
}

/// Restricts two independently produced datasets to their common runs and,
/// within each run, to the lumi-sections both sides processed.
///
/// Both inputs are left untouched; the returned maps are new collections so
/// no run is pruned while it is being scanned. After pruning, both sides
/// cover exactly the same run and lumi-section sets and can be segmented and
/// averaged over commensurate data.
pub fn prune_to_matched(
    a: &FitsByRun,
    b: &FitsByRun,
    offset: u32,
    label_a: &str,
    label_b: &str,
) -> (FitsByRun, FitsByRun, Vec<RunReconciliation>) {
    let mut pruned_a = FitsByRun::new();
    let mut pruned_b = FitsByRun::new();
    let mut reports = Vec::new();

    for run in matched_runs(a, b) {
        let (Some(fits_a), Some(fits_b)) = (a.get(&run), b.get(&run)) else {
            continue;
        };

        let sections_a: Vec<u32> = fits_a.keys().copied().collect();
        let sections_b: Vec<u32> = fits_b.keys().copied().collect();
        let sections = reconcile(&sections_a, &sections_b, offset, label_a, label_b);

        let drop_a: BTreeSet<u32> = sections.only_in_a.iter().copied().collect();
        let drop_b: BTreeSet<u32> = sections.only_in_b.iter().copied().collect();

        pruned_a.insert(
            run,
            fits_a
                .iter()
                .filter(|(lumi, _)| !drop_a.contains(*lumi))
                .map(|(&lumi, fit)| (lumi, fit.clone()))
                .collect(),
        );
        pruned_b.insert(
            run,
            fits_b
                .iter()
                .filter(|(lumi, _)| !drop_b.contains(*lumi))
                .map(|(&lumi, fit)| (lumi, fit.clone()))
                .collect(),
        );
        reports.push(RunReconciliation { run, sections });
    }

    (pruned_a, pruned_b, reports)
}

/// Dataset reconciliation helpers.
pub fn crate_name() -> &'static str {
    let _ = bsiov_core::crate_name();
    "bsiov-reconcile"
}
