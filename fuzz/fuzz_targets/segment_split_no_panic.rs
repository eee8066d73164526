// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

#[path = "common.rs"]
mod common;

use bsiov_core::{BeamSpotFit, FitsByLumi, Measurement};
use bsiov_merge::{DriftSegmenter, SegmenterConfig, average_fits, filter_and_sort};
use libfuzzer_sys::fuzz_target;

fn build_measurement(value_seed: i16, error_seed: u8, mode_seed: u8) -> Measurement {
    let value = f64::from(value_seed) / 1_000.0;
    let error = match mode_seed % 6 {
        0 => 0.0,
        1 => f64::NAN,
        2 => f64::INFINITY,
        3 => -1.0e-3,
        _ => 1.0e-4 + f64::from(error_seed) / 10_000.0,
    };
    Measurement::new(value, error)
}

fn next_measurement(cursor: &mut common::ByteCursor<'_>) -> Measurement {
    build_measurement(cursor.next_i16(), cursor.next_u8(), cursor.next_u8())
}

fn build_fit(cursor: &mut common::ByteCursor<'_>, run: u32, lumi_section: u32) -> BeamSpotFit {
    BeamSpotFit {
        run,
        lumi_section,
        position_x: next_measurement(cursor),
        position_y: next_measurement(cursor),
        position_z: next_measurement(cursor),
        sigma_z: next_measurement(cursor),
        width_x: next_measurement(cursor),
        width_y: next_measurement(cursor),
        dxdz: next_measurement(cursor),
        dydz: next_measurement(cursor),
        converged: cursor.next_u8() % 4 != 0,
    }
}

fuzz_target!(|data: &[u8]| {
    let mut cursor = common::ByteCursor::new(data);

    let config = SegmenterConfig {
        use_slope: cursor.next_u8() & 1 == 0,
        max_window: common::bounded(cursor.next_u8(), 0, 12),
        significance: f64::from(cursor.next_u8()) / 16.0,
        trend_points: common::bounded(cursor.next_u8(), 0, 9),
        ..SegmenterConfig::default()
    };
    let Ok(segmenter) = DriftSegmenter::new(config) else {
        return;
    };

    let mut records = FitsByLumi::new();
    let mut lumi = 0u32;
    let count = common::bounded(cursor.next_u8(), 0, 96);
    for _ in 0..count {
        lumi = lumi.saturating_add(1 + u32::from(cursor.next_u8() % 3));
        records.insert(lumi, build_fit(&mut cursor, 355_100, lumi));
    }

    // The split contract only holds for filtered input; unfiltered input must
    // come back as a typed error, never a panic.
    let filtered = filter_and_sort(&records).into_records();
    if let Ok(segments) = segmenter.split(&filtered) {
        for (first, last) in segments {
            let fits: Vec<BeamSpotFit> =
                filtered.range(first..=last).map(|(_, f)| f.clone()).collect();
            let _ = average_fits(&fits);
        }
    }
    let _ = segmenter.split(&records);
});
