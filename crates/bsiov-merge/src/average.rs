// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bsiov_core::{BeamParameter, BeamSpotFit, Measurement, MergeError, MergedBeamSpot};

/// Inverse-variance weighted mean of one parameter across a segment, with
/// an unweighted fallback when any uncertainty is missing.
///
/// Returns the merged measurement and whether the fallback was taken.
fn merge_parameter(fits: &[BeamSpotFit], parameter: BeamParameter) -> (Measurement, bool) {
    let all_weighted = fits
        .iter()
        .all(|fit| fit.parameter(parameter).is_usable());

    if all_weighted {
        let mut weight_sum = 0.0;
        let mut weighted_value_sum = 0.0;
        for fit in fits {
            let m = fit.parameter(parameter);
            let w = m.weight();
            weight_sum += w;
            weighted_value_sum += w * m.value;
        }
        let value = weighted_value_sum / weight_sum;
        let error = (1.0 / weight_sum).sqrt();
        return (Measurement::new(value, error), false);
    }

    // Unweighted mean and sample spread; a single fit has no spread.
    let n = fits.len() as f64;
    let mean = fits
        .iter()
        .map(|fit| fit.parameter(parameter).value)
        .sum::<f64>()
        / n;
    let spread = if fits.len() < 2 {
        0.0
    } else {
        let sum_sq = fits
            .iter()
            .map(|fit| {
                let d = fit.parameter(parameter).value - mean;
                d * d
            })
            .sum::<f64>();
        (sum_sq / (n - 1.0)).sqrt()
    };
    (Measurement::new(mean, spread), true)
}

/// Reduces one segment's fits into a single merged record with propagated
/// uncertainty.
///
/// Each parameter is averaged independently: inverse-variance weighting when
/// every fit carries a usable uncertainty for it, otherwise an unweighted
/// mean with the sample standard deviation as the error and the
/// `low_confidence` flag raised. The input must belong to one run; an empty
/// segment is caller misuse and fails with [`MergeError::EmptySegment`].
pub fn average_fits(fits: &[BeamSpotFit]) -> Result<MergedBeamSpot, MergeError> {
    let head = fits.first().ok_or_else(|| {
        MergeError::empty_segment("average_fits requires at least one fit; segments are never empty")
    })?;

    let mut first_lumi = head.lumi_section;
    let mut last_lumi = head.lumi_section;
    for fit in fits {
        first_lumi = first_lumi.min(fit.lumi_section);
        last_lumi = last_lumi.max(fit.lumi_section);
    }

    let mut low_confidence = false;
    let mut merged = [Measurement::new(0.0, 0.0); 8];
    for (slot, &parameter) in merged.iter_mut().zip(BeamParameter::ALL.iter()) {
        let (measurement, fallback) = merge_parameter(fits, parameter);
        *slot = measurement;
        low_confidence |= fallback;
    }
    let [position_x, position_y, position_z, sigma_z, width_x, width_y, dxdz, dydz] = merged;

    Ok(MergedBeamSpot {
        run: head.run,
        first_lumi,
        last_lumi,
        position_x,
        position_y,
        position_z,
        sigma_z,
        width_x,
        width_y,
        dxdz,
        dydz,
        contributing_fits: fits.len(),
        low_confidence,
    })
}
