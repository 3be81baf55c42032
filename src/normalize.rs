//! Histogram equalisation of predictor input, one channel at a time.

use ndarray::{Array4, ArrayViewMut3, Axis};
use rayon::prelude::*;

/// Upper end of the equalised intensity range.
const OUTPUT_MAX: f64 = 255.0;

/// Equalise every channel of a (channels, depth, height, width) stack in place.
pub fn normalize_channels(data: &mut Array4<f32>, bins: usize) {
    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|channel| histogram_normalize(channel, bins));
}

/// Map intensities through the normalised cumulative histogram.
///
/// `bins` equal-width bins span the value range (widened by 0.5 on both sides
/// when the range is empty). Cumulative counts are rescaled to `[0, 255]` and
/// every value is linearly interpolated between bin centres, clamping at the
/// first and last centre.
pub fn histogram_normalize(mut channel: ArrayViewMut3<f32>, bins: usize) {
    if channel.is_empty() || bins == 0 {
        return;
    }

    let (mut low, mut high) = channel
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), &value| {
            (low.min(value as f64), high.max(value as f64))
        });
    if low == high {
        low -= 0.5;
        high += 0.5;
    }
    let width = (high - low) / bins as f64;

    let mut counts = vec![0u64; bins];
    for &value in channel.iter() {
        let bin = ((value as f64 - low) / width) as usize;
        counts[bin.min(bins - 1)] += 1;
    }

    let mut total = 0u64;
    let cumulative: Vec<f64> = counts
        .iter()
        .map(|&count| {
            total += count;
            total as f64
        })
        .collect();
    let (first, last) = (cumulative[0], cumulative[bins - 1]);
    let levels: Vec<f64> = if last > first {
        cumulative
            .iter()
            .map(|&c| (c - first) / (last - first) * OUTPUT_MAX)
            .collect()
    } else {
        vec![0.0; bins]
    };
    let centres: Vec<f64> = (0..bins)
        .map(|bin| low + (bin as f64 + 0.5) * width)
        .collect();

    channel.mapv_inplace(|value| interpolate(&centres, &levels, value as f64) as f32);
}

fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let last = xs.len() - 1;
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[last] {
        return ys[last];
    }
    let upper = xs.partition_point(|&edge| edge <= x);
    let lower = upper - 1;
    let t = (x - xs[lower]) / (xs[upper] - xs[lower]);
    ys[lower] + t * (ys[upper] - ys[lower])
}
