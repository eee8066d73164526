// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

mod average;
mod filter;
mod segment;

pub use average::average_fits;
pub use filter::{FilterOutcome, filter_and_sort};
pub use segment::{DriftSegmenter, SegmenterConfig};

/// Filtering, segmentation, and averaging for per-run beam-spot fits.
pub fn crate_name() -> &'static str {
    let _ = bsiov_core::crate_name();
    "bsiov-merge"
}

#[cfg(test)]
mod tests {
    use super::crate_name;

    #[test]
    fn crate_name_matches_expected() {
        assert_eq!(crate_name(), "bsiov-merge");
    }
}
