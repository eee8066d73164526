// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

/// One fitted quantity as a `(value, error)` pair.
///
/// A non-finite or non-positive error is the sentinel for "this fit could not
/// estimate an uncertainty"; such a measurement cannot participate in
/// inverse-variance weighting.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub error: f64,
}

impl Measurement {
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// True when the value is finite and the error is finite and positive,
    /// i.e. the measurement can be weighted by its uncertainty.
    pub fn is_usable(&self) -> bool {
        self.value.is_finite() && self.error.is_finite() && self.error > 0.0
    }

    /// Inverse-variance weight, `1 / error^2`.
    ///
    /// Only meaningful when [`Measurement::is_usable`] holds.
    pub fn weight(&self) -> f64 {
        1.0 / (self.error * self.error)
    }
}

/// The eight fitted beam-spot parameters.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BeamParameter {
    /// Horizontal position of the luminous region centroid.
    X,
    /// Vertical position of the luminous region centroid.
    Y,
    /// Longitudinal position of the luminous region centroid.
    Z,
    /// Longitudinal width.
    SigmaZ,
    /// Transverse width along x.
    WidthX,
    /// Transverse width along y.
    WidthY,
    /// Tilt slope dx/dz.
    DxDz,
    /// Tilt slope dy/dz.
    DyDz,
}

impl BeamParameter {
    pub const ALL: [BeamParameter; 8] = [
        BeamParameter::X,
        BeamParameter::Y,
        BeamParameter::Z,
        BeamParameter::SigmaZ,
        BeamParameter::WidthX,
        BeamParameter::WidthY,
        BeamParameter::DxDz,
        BeamParameter::DyDz,
    ];

    /// Column name used by the upstream fit reports.
    pub fn name(self) -> &'static str {
        match self {
            BeamParameter::X => "X",
            BeamParameter::Y => "Y",
            BeamParameter::Z => "Z",
            BeamParameter::SigmaZ => "sigmaZ",
            BeamParameter::WidthX => "beamWidthX",
            BeamParameter::WidthY => "beamWidthY",
            BeamParameter::DxDz => "dxdz",
            BeamParameter::DyDz => "dydz",
        }
    }
}

impl fmt::Display for BeamParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One beam-spot fit result for one run and one lumi-section.
///
/// Produced by an external parser and consumed read-only by every merge
/// operation; nothing downstream mutates a fit.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct BeamSpotFit {
    pub run: u32,
    pub lumi_section: u32,
    pub position_x: Measurement,
    pub position_y: Measurement,
    pub position_z: Measurement,
    pub sigma_z: Measurement,
    pub width_x: Measurement,
    pub width_y: Measurement,
    pub dxdz: Measurement,
    pub dydz: Measurement,
    /// Whether the per-lumi-section fit converged.
    pub converged: bool,
}

impl BeamSpotFit {
    pub fn parameter(&self, parameter: BeamParameter) -> Measurement {
        match parameter {
            BeamParameter::X => self.position_x,
            BeamParameter::Y => self.position_y,
            BeamParameter::Z => self.position_z,
            BeamParameter::SigmaZ => self.sigma_z,
            BeamParameter::WidthX => self.width_x,
            BeamParameter::WidthY => self.width_y,
            BeamParameter::DxDz => self.dxdz,
            BeamParameter::DyDz => self.dydz,
        }
    }

    /// A fit is usable when it converged and every parameter carries a
    /// finite value with a finite, positive error.
    pub fn is_usable(&self) -> bool {
        self.converged
            && BeamParameter::ALL
                .iter()
                .all(|&parameter| self.parameter(parameter).is_usable())
    }
}

/// The merged calibration record for one interval of validity.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct MergedBeamSpot {
    pub run: u32,
    pub first_lumi: u32,
    pub last_lumi: u32,
    pub position_x: Measurement,
    pub position_y: Measurement,
    pub position_z: Measurement,
    pub sigma_z: Measurement,
    pub width_x: Measurement,
    pub width_y: Measurement,
    pub dxdz: Measurement,
    pub dydz: Measurement,
    /// Number of per-lumi-section fits combined into this record.
    pub contributing_fits: usize,
    /// Set when at least one parameter had to fall back to an unweighted
    /// mean because an uncertainty was missing.
    pub low_confidence: bool,
}

impl MergedBeamSpot {
    pub fn parameter(&self, parameter: BeamParameter) -> Measurement {
        match parameter {
            BeamParameter::X => self.position_x,
            BeamParameter::Y => self.position_y,
            BeamParameter::Z => self.position_z,
            BeamParameter::SigmaZ => self.sigma_z,
            BeamParameter::WidthX => self.width_x,
            BeamParameter::WidthY => self.width_y,
            BeamParameter::DxDz => self.dxdz,
            BeamParameter::DyDz => self.dydz,
        }
    }
}

/// One run's fits keyed by lumi-section. Keys are unique by construction and
/// the ascending map order is the canonical processing order.
pub type FitsByLumi = BTreeMap<u32, BeamSpotFit>;

/// A full dataset keyed by run number.
pub type FitsByRun = BTreeMap<u32, FitsByLumi>;

#[cfg(test)]
mod tests {
    use super::{BeamParameter, BeamSpotFit, Measurement};

    fn constant_fit(run: u32, lumi_section: u32, value: f64, error: f64) -> BeamSpotFit {
        let m = Measurement::new(value, error);
        BeamSpotFit {
            run,
            lumi_section,
            position_x: m,
            position_y: m,
            position_z: m,
            sigma_z: m,
            width_x: m,
            width_y: m,
            dxdz: m,
            dydz: m,
            converged: true,
        }
    }

    #[test]
    fn measurement_usability_rejects_sentinel_errors() {
        assert!(Measurement::new(0.18, 0.001).is_usable());
        assert!(!Measurement::new(0.18, 0.0).is_usable());
        assert!(!Measurement::new(0.18, -1.0).is_usable());
        assert!(!Measurement::new(0.18, f64::NAN).is_usable());
        assert!(!Measurement::new(f64::NAN, 0.001).is_usable());
        assert!(!Measurement::new(0.18, f64::INFINITY).is_usable());
    }

    #[test]
    fn measurement_weight_is_inverse_variance() {
        let m = Measurement::new(0.1, 0.02);
        assert!((m.weight() - 2500.0).abs() < 1e-9);
    }

    #[test]
    fn parameter_accessor_covers_all_eight_fields() {
        let mut fit = constant_fit(100, 1, 0.0, 1.0);
        fit.position_x = Measurement::new(1.0, 1.0);
        fit.position_y = Measurement::new(2.0, 1.0);
        fit.position_z = Measurement::new(3.0, 1.0);
        fit.sigma_z = Measurement::new(4.0, 1.0);
        fit.width_x = Measurement::new(5.0, 1.0);
        fit.width_y = Measurement::new(6.0, 1.0);
        fit.dxdz = Measurement::new(7.0, 1.0);
        fit.dydz = Measurement::new(8.0, 1.0);

        let values: Vec<f64> = BeamParameter::ALL
            .iter()
            .map(|&parameter| fit.parameter(parameter).value)
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn fit_usability_requires_convergence_and_valid_errors() {
        let good = constant_fit(100, 1, 0.18, 0.001);
        assert!(good.is_usable());

        let mut not_converged = good.clone();
        not_converged.converged = false;
        assert!(!not_converged.is_usable());

        let mut sentinel_error = good.clone();
        sentinel_error.dydz = Measurement::new(0.001, 0.0);
        assert!(!sentinel_error.is_usable());

        let mut nan_value = good;
        nan_value.sigma_z = Measurement::new(f64::NAN, 0.01);
        assert!(!nan_value.is_usable());
    }

    #[test]
    fn parameter_names_match_upstream_columns() {
        let names: Vec<&str> = BeamParameter::ALL.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec!["X", "Y", "Z", "sigmaZ", "beamWidthX", "beamWidthY", "dxdz", "dydz"]
        );
        assert_eq!(BeamParameter::SigmaZ.to_string(), "sigmaZ");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn fit_serde_roundtrip_preserves_all_fields() {
        let fit = constant_fit(315512, 42, 0.094, 0.0012);
        let encoded = serde_json::to_string(&fit).expect("fit should serialize");
        let decoded: BeamSpotFit = serde_json::from_str(&encoded).expect("fit should deserialize");
        assert_eq!(decoded, fit);
    }
}
