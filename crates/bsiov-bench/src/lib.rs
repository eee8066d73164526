// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Benchmark namespace placeholder.
pub fn crate_name() -> &'static str {
    let _ = (bsiov_core::crate_name(), bsiov_merge::crate_name());
    "bsiov-bench"
}
