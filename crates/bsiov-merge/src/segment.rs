// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bsiov_core::{BeamParameter, BeamSpotFit, FitsByLumi, Measurement, MergeError};

const DEFAULT_MAX_WINDOW: usize = 60;
const DEFAULT_SIGNIFICANCE: f64 = 3.0;
const DEFAULT_TREND_POINTS: usize = 5;

/// Configuration for [`DriftSegmenter`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct SegmenterConfig {
    /// Extrapolate a local linear trend instead of comparing against the
    /// running weighted average of the open segment.
    pub use_slope: bool,
    /// Hard cap on the number of lumi-sections one segment may collect; a
    /// boundary is forced when the cap is reached even without a drift.
    pub max_window: usize,
    /// Significance multiplier: a point whose normalized deviation exceeds
    /// this many combined sigmas opens a new segment.
    pub significance: f64,
    /// Trailing points of the open segment used for the local trend fit.
    pub trend_points: usize,
    /// Parameters tested for drift.
    pub monitored: Vec<BeamParameter>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            use_slope: true,
            max_window: DEFAULT_MAX_WINDOW,
            significance: DEFAULT_SIGNIFICANCE,
            trend_points: DEFAULT_TREND_POINTS,
            monitored: vec![BeamParameter::X, BeamParameter::Y, BeamParameter::Z],
        }
    }
}

impl SegmenterConfig {
    fn validate(&self) -> Result<(), MergeError> {
        if self.max_window < 1 {
            return Err(MergeError::invalid_input(
                "SegmenterConfig.max_window must be >= 1; got 0",
            ));
        }
        if !self.significance.is_finite() || self.significance <= 0.0 {
            return Err(MergeError::invalid_input(format!(
                "SegmenterConfig.significance must be finite and > 0; got {}",
                self.significance
            )));
        }
        if self.trend_points < 2 {
            return Err(MergeError::invalid_input(format!(
                "SegmenterConfig.trend_points must be >= 2; got {}",
                self.trend_points
            )));
        }
        if self.monitored.is_empty() {
            return Err(MergeError::invalid_input(
                "SegmenterConfig.monitored must name at least one parameter",
            ));
        }
        Ok(())
    }
}

/// Weighted least-squares line over a tail of the open segment, centered on
/// the weighted mean lumi-section so the normal equations stay well
/// conditioned for large lumi numbers.
#[derive(Clone, Copy, Debug)]
struct TrendFit {
    x_center: f64,
    intercept: f64,
    slope: f64,
    weight_sum: f64,
    centered_xx: f64,
}

impl TrendFit {
    /// Extrapolated value and its prediction variance at `x`.
    fn predict(&self, x: f64) -> (f64, f64) {
        let dx = x - self.x_center;
        let value = self.intercept + self.slope * dx;
        let variance = 1.0 / self.weight_sum + dx * dx / self.centered_xx;
        (value, variance)
    }
}

fn weighted_trend(tail: &[&BeamSpotFit], parameter: BeamParameter) -> Option<TrendFit> {
    let mut weight_sum = 0.0;
    let mut weighted_x_sum = 0.0;
    for fit in tail {
        let m = fit.parameter(parameter);
        let w = m.weight();
        weight_sum += w;
        weighted_x_sum += w * f64::from(fit.lumi_section);
    }
    if !weight_sum.is_finite() || weight_sum <= 0.0 {
        return None;
    }

    let x_center = weighted_x_sum / weight_sum;
    let mut centered_xx = 0.0;
    let mut centered_xy = 0.0;
    let mut weighted_y_sum = 0.0;
    for fit in tail {
        let m = fit.parameter(parameter);
        let w = m.weight();
        let dx = f64::from(fit.lumi_section) - x_center;
        centered_xx += w * dx * dx;
        centered_xy += w * dx * m.value;
        weighted_y_sum += w * m.value;
    }
    if !centered_xx.is_finite() || centered_xx <= 0.0 {
        return None;
    }

    Some(TrendFit {
        x_center,
        intercept: weighted_y_sum / weight_sum,
        slope: centered_xy / centered_xx,
        weight_sum,
        centered_xx,
    })
}

/// Deviation of `candidate` from the open segment's running weighted mean,
/// in units of the combined uncertainty of the two.
fn running_mean_deviation(
    open: &[&BeamSpotFit],
    parameter: BeamParameter,
    candidate: Measurement,
) -> f64 {
    let mut weight_sum = 0.0;
    let mut weighted_value_sum = 0.0;
    for fit in open {
        let m = fit.parameter(parameter);
        let w = m.weight();
        weight_sum += w;
        weighted_value_sum += w * m.value;
    }

    let mean = weighted_value_sum / weight_sum;
    let mean_variance = 1.0 / weight_sum;
    let combined = (candidate.error * candidate.error + mean_variance).sqrt();
    (candidate.value - mean).abs() / combined
}

/// Splits one run's filtered fits into contiguous lumi-section ranges at
/// drift boundaries or window-size limits.
///
/// The input must be the output of [`crate::filter_and_sort`]: every fit a
/// segmenter sees is expected to carry usable uncertainties for the monitored
/// parameters, and map keys must match the fits' own lumi-sections.
#[derive(Clone, Debug)]
pub struct DriftSegmenter {
    config: SegmenterConfig,
}

impl DriftSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self, MergeError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Partitions `records` into ordered, non-overlapping, gapless ranges of
    /// lumi-sections, each spanning at most `max_window` fits.
    ///
    /// A point that drifts away from the open segment closes it at the
    /// previous lumi-section and starts the next segment itself; a segment
    /// that reaches the window cap closes at the current point instead. The
    /// open segment is always flushed at the end of the scan, so every input
    /// key lands in exactly one returned range.
    pub fn split(&self, records: &FitsByLumi) -> Result<Vec<(u32, u32)>, MergeError> {
        let mut segments = Vec::new();
        let mut open: Vec<&BeamSpotFit> = Vec::new();
        let mut first_lumi = 0u32;

        for (&lumi, fit) in records {
            if fit.lumi_section != lumi {
                return Err(MergeError::invalid_input(format!(
                    "fit stored under lumi-section {lumi} reports lumi-section {} in run {}",
                    fit.lumi_section, fit.run
                )));
            }
            self.check_monitored(fit)?;

            if open.is_empty() {
                first_lumi = lumi;
            } else if self.drifted(&open, fit)? {
                let previous = open.last().map_or(first_lumi, |f| f.lumi_section);
                segments.push((first_lumi, previous));
                open.clear();
                first_lumi = lumi;
            }

            open.push(fit);
            if open.len() >= self.config.max_window {
                segments.push((first_lumi, lumi));
                open.clear();
            }
        }

        if let Some(last) = open.last() {
            segments.push((first_lumi, last.lumi_section));
        }
        Ok(segments)
    }

    fn check_monitored(&self, fit: &BeamSpotFit) -> Result<(), MergeError> {
        for &parameter in &self.config.monitored {
            if !fit.parameter(parameter).is_usable() {
                return Err(MergeError::invalid_input(format!(
                    "unusable {parameter} uncertainty at lumi-section {} of run {}; \
                     segmentation input must be validity-filtered first",
                    fit.lumi_section, fit.run
                )));
            }
        }
        Ok(())
    }

    /// True when `candidate` deviates from the open segment by more than the
    /// configured significance in any monitored parameter.
    fn drifted(&self, open: &[&BeamSpotFit], candidate: &BeamSpotFit) -> Result<bool, MergeError> {
        for &parameter in &self.config.monitored {
            let m = candidate.parameter(parameter);
            let deviation = self
                .trend_deviation(open, parameter, candidate.lumi_section, m)
                .unwrap_or_else(|| running_mean_deviation(open, parameter, m));

            if !deviation.is_finite() {
                return Err(MergeError::numerical_issue(format!(
                    "non-finite drift deviation for {parameter} at lumi-section {} of run {}",
                    candidate.lumi_section, candidate.run
                )));
            }
            if deviation > self.config.significance {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Slope-mode deviation from the extrapolated local trend. `None` when
    /// slope mode is off, the open segment is too short for a line, or the
    /// trend fit is degenerate; callers fall back to the absolute test.
    fn trend_deviation(
        &self,
        open: &[&BeamSpotFit],
        parameter: BeamParameter,
        lumi: u32,
        candidate: Measurement,
    ) -> Option<f64> {
        if !self.config.use_slope {
            return None;
        }
        let tail_start = open.len().saturating_sub(self.config.trend_points);
        let tail = &open[tail_start..];
        if tail.len() < 2 {
            return None;
        }

        let trend = weighted_trend(tail, parameter)?;
        let (predicted, prediction_variance) = trend.predict(f64::from(lumi));
        let combined = (candidate.error * candidate.error + prediction_variance).sqrt();
        Some((candidate.value - predicted).abs() / combined)
    }
}
