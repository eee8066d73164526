// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bsiov_core::FitsByLumi;

/// Result of validity filtering for one run.
///
/// Keeps the surviving fits together with the size of the unfiltered input so
/// the caller can report the fit-failure rate.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterOutcome {
    records: FitsByLumi,
    total: usize,
}

impl FilterOutcome {
    /// Surviving fits in ascending lumi-section order.
    pub fn records(&self) -> &FitsByLumi {
        &self.records
    }

    pub fn into_records(self) -> FitsByLumi {
        self.records
    }

    /// Number of fits in the unfiltered input.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of fits that survived filtering.
    pub fn kept(&self) -> usize {
        self.records.len()
    }

    /// Fraction of fits dropped, `1 - kept/total`; `0.0` for empty input.
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            1.0 - self.kept() as f64 / self.total as f64
        }
    }
}

/// Drops fits that did not converge or carry sentinel uncertainties and
/// returns the survivors as a new map in ascending lumi-section order.
///
/// Pure: the input is never mutated, and degenerate input yields an empty
/// outcome rather than an error.
pub fn filter_and_sort(records: &FitsByLumi) -> FilterOutcome {
    let kept = records
        .iter()
        .filter(|(_, fit)| fit.is_usable())
        .map(|(&lumi, fit)| (lumi, fit.clone()))
        .collect();

    FilterOutcome {
        records: kept,
        total: records.len(),
    }
}
