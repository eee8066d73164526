// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bsiov_core::{BeamSpotFit, FitsByLumi, FitsByRun, MergeError, MergedBeamSpot};
use bsiov_merge::{DriftSegmenter, SegmenterConfig, average_fits, filter_and_sort};
use bsiov_reconcile::{RunReconciliation, prune_to_matched};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A run whose fit-failure ratio exceeds this gets a warning attached to its
/// merge result.
pub const FIT_FAILURE_WARNING_THRESHOLD: f64 = 0.10;

/// Segmentation settings for a whole dataset, with per-run overrides.
///
/// Runs with known instability get their own entry (typically a smaller
/// window, down to one lumi-section per interval) instead of living in a
/// hardcoded special-case list inside the segmentation logic.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineConfig {
    pub segmenter: SegmenterConfig,
    pub overrides: BTreeMap<u32, SegmenterConfig>,
}

impl PipelineConfig {
    pub fn new(segmenter: SegmenterConfig) -> Self {
        Self {
            segmenter,
            overrides: BTreeMap::new(),
        }
    }

    /// Registers a per-run override, replacing any previous one for `run`.
    pub fn with_override(mut self, run: u32, config: SegmenterConfig) -> Self {
        self.overrides.insert(run, config);
        self
    }

    /// Settings to use for `run`: its override if present, the default
    /// otherwise.
    pub fn segmenter_for(&self, run: u32) -> &SegmenterConfig {
        self.overrides.get(&run).unwrap_or(&self.segmenter)
    }
}

/// Merged intervals and bookkeeping for one run.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RunMerge {
    pub run: u32,
    /// Merged records in ascending interval order.
    pub merged: Vec<MergedBeamSpot>,
    /// Fits in the unfiltered input.
    pub total_fits: usize,
    /// Fits that survived validity filtering.
    pub kept_fits: usize,
    pub warnings: Vec<String>,
}

impl RunMerge {
    /// Fraction of fits dropped by validity filtering; `0.0` for an empty run.
    pub fn failure_ratio(&self) -> f64 {
        if self.total_fits == 0 {
            0.0
        } else {
            1.0 - self.kept_fits as f64 / self.total_fits as f64
        }
    }
}

/// Outcome of merging two independently produced datasets over their common
/// runs and lumi-sections.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct MatchedMerge {
    pub merged_a: Vec<RunMerge>,
    pub merged_b: Vec<RunMerge>,
    pub reconciliations: Vec<RunReconciliation>,
}

/// Filters, segments, and averages one run's fits into merged intervals.
pub fn merge_run(
    run: u32,
    records: &FitsByLumi,
    config: &PipelineConfig,
) -> Result<RunMerge, MergeError> {
    let outcome = filter_and_sort(records);
    let mut warnings = Vec::new();
    if outcome.total() > 0 && outcome.failure_ratio() > FIT_FAILURE_WARNING_THRESHOLD {
        let message = format!(
            "more than {:.0}% of the fits failed for run {run}: {} of {} dropped",
            FIT_FAILURE_WARNING_THRESHOLD * 100.0,
            outcome.total() - outcome.kept(),
            outcome.total()
        );
        warn!(run, ratio = outcome.failure_ratio(), "{message}");
        warnings.push(message);
    }

    let segmenter = DriftSegmenter::new(config.segmenter_for(run).clone())?;
    let ranges = segmenter.split(outcome.records())?;
    debug!(run, segments = ranges.len(), kept = outcome.kept(), "segmented run");

    let mut merged = Vec::with_capacity(ranges.len());
    for (first, last) in ranges {
        let fits: Vec<BeamSpotFit> = outcome
            .records()
            .range(first..=last)
            .map(|(_, fit)| fit.clone())
            .collect();
        merged.push(average_fits(&fits)?);
    }

    Ok(RunMerge {
        run,
        merged,
        total_fits: outcome.total(),
        kept_fits: outcome.kept(),
        warnings,
    })
}

/// Merges every run of a dataset independently, in parallel, returning the
/// results in ascending run order.
///
/// Runs share no state, so this is a plain parallel map with no
/// synchronization.
pub fn merge_all(dataset: &FitsByRun, config: &PipelineConfig) -> Result<Vec<RunMerge>, MergeError> {
    dataset
        .par_iter()
        .map(|(&run, records)| merge_run(run, records, config))
        .collect()
}

/// The two-dataset comparison workflow: restrict both sides to the runs and
/// lumi-sections they have in common, then merge each side.
///
/// Both sides end up segmented and averaged over exactly the same
/// lumi-section sets, so their merged intervals are directly comparable.
/// Unmatched sections are reported, not fatal.
pub fn merge_matched(
    a: &FitsByRun,
    b: &FitsByRun,
    offset: u32,
    label_a: &str,
    label_b: &str,
    config: &PipelineConfig,
) -> Result<MatchedMerge, MergeError> {
    let (pruned_a, pruned_b, reconciliations) = prune_to_matched(a, b, offset, label_a, label_b);

    for report in &reconciliations {
        if !report.sections.is_aligned() {
            warn!(run = report.run, "{}", report.sections);
        }
    }

    Ok(MatchedMerge {
        merged_a: merge_all(&pruned_a, config)?,
        merged_b: merge_all(&pruned_b, config)?,
        reconciliations,
    })
}

/// Orchestration layer over the merge and reconcile crates.
pub fn crate_name() -> &'static str {
    let _ = (
        bsiov_core::crate_name(),
        bsiov_merge::crate_name(),
        bsiov_reconcile::crate_name(),
    );
    "bsiov-pipeline"
}

#[cfg(test)]
mod tests {
    use super::{FIT_FAILURE_WARNING_THRESHOLD, PipelineConfig, merge_all, merge_run};
    use bsiov_core::{BeamSpotFit, FitsByLumi, FitsByRun, Measurement, MergeError};
    use bsiov_merge::SegmenterConfig;

    fn fit(run: u32, lumi_section: u32, x: f64, converged: bool) -> BeamSpotFit {
        let stable = Measurement::new(1.0, 0.001);
        BeamSpotFit {
            run,
            lumi_section,
            position_x: Measurement::new(x, 0.001),
            position_y: stable,
            position_z: stable,
            sigma_z: stable,
            width_x: stable,
            width_y: stable,
            dxdz: stable,
            dydz: stable,
            converged,
        }
    }

    fn run_records(run: u32, points: &[(u32, f64, bool)]) -> FitsByLumi {
        points
            .iter()
            .map(|&(lumi, x, converged)| (lumi, fit(run, lumi, x, converged)))
            .collect()
    }

    fn absolute_config(max_window: usize) -> PipelineConfig {
        PipelineConfig::new(SegmenterConfig {
            use_slope: false,
            max_window,
            ..SegmenterConfig::default()
        })
    }

    #[test]
    fn per_run_override_takes_precedence() {
        let config = absolute_config(60).with_override(
            300019,
            SegmenterConfig {
                use_slope: false,
                max_window: 1,
                ..SegmenterConfig::default()
            },
        );
        assert_eq!(config.segmenter_for(300019).max_window, 1);
        assert_eq!(config.segmenter_for(300020).max_window, 60);
    }

    #[test]
    fn merge_run_produces_one_interval_per_stable_stretch() {
        let records = run_records(
            100,
            &[
                (1, 0.18, true),
                (2, 0.18, true),
                (3, 0.18, true),
                (4, 0.25, true),
                (5, 0.25, true),
            ],
        );

        let merge = merge_run(100, &records, &absolute_config(60)).expect("merge should succeed");
        assert_eq!(merge.total_fits, 5);
        assert_eq!(merge.kept_fits, 5);
        assert!(merge.warnings.is_empty());
        assert_eq!(merge.merged.len(), 2);
        assert_eq!(
            (merge.merged[0].first_lumi, merge.merged[0].last_lumi),
            (1, 3)
        );
        assert_eq!(
            (merge.merged[1].first_lumi, merge.merged[1].last_lumi),
            (4, 5)
        );
        assert!((merge.merged[0].position_x.value - 0.18).abs() < 1e-9);
        assert!((merge.merged[1].position_x.value - 0.25).abs() < 1e-9);
        assert_eq!(merge.merged[0].contributing_fits, 3);
    }

    #[test]
    fn high_failure_ratio_attaches_a_warning() {
        let records = run_records(
            100,
            &[
                (1, 0.18, true),
                (2, 0.18, false),
                (3, 0.18, false),
                (4, 0.18, true),
            ],
        );

        let merge = merge_run(100, &records, &absolute_config(60)).expect("merge should succeed");
        assert!(merge.failure_ratio() > FIT_FAILURE_WARNING_THRESHOLD);
        assert_eq!(merge.warnings.len(), 1);
        assert!(merge.warnings[0].contains("run 100"));
        assert!(merge.warnings[0].contains("2 of 4 dropped"));
    }

    #[test]
    fn empty_run_merges_to_nothing_without_warnings() {
        let merge = merge_run(100, &FitsByLumi::new(), &absolute_config(60))
            .expect("merge should succeed");
        assert!(merge.merged.is_empty());
        assert_eq!(merge.failure_ratio(), 0.0);
        assert!(merge.warnings.is_empty());
    }

    #[test]
    fn invalid_override_surfaces_as_an_error() {
        let config = absolute_config(60).with_override(
            100,
            SegmenterConfig {
                max_window: 0,
                ..SegmenterConfig::default()
            },
        );
        let records = run_records(100, &[(1, 0.18, true)]);
        let err = merge_run(100, &records, &config).expect_err("zero window must fail");
        assert!(matches!(err, MergeError::InvalidInput(_)));
    }

    #[test]
    fn merge_all_returns_runs_in_ascending_order() {
        let mut dataset = FitsByRun::new();
        dataset.insert(200, run_records(200, &[(1, 0.18, true), (2, 0.18, true)]));
        dataset.insert(100, run_records(100, &[(1, 0.25, true)]));
        dataset.insert(150, run_records(150, &[(7, 0.20, true)]));

        let merges = merge_all(&dataset, &absolute_config(60)).expect("merge should succeed");
        let runs: Vec<u32> = merges.iter().map(|m| m.run).collect();
        assert_eq!(runs, vec![100, 150, 200]);
        assert_eq!(merges[0].merged.len(), 1);
        assert_eq!(merges[0].merged[0].contributing_fits, 1);
    }
}
