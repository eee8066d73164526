// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

mod beamspot;
mod error;

pub use beamspot::{
    BeamParameter, BeamSpotFit, FitsByLumi, FitsByRun, Measurement, MergedBeamSpot,
};
pub use error::MergeError;

/// Core shared types for the beam-spot merging crates.
pub fn crate_name() -> &'static str {
    "bsiov-core"
}
