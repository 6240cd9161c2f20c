//! Importance-weight histogram diagnostic.
//!
//! Counts every stored importance weight into 81 bins: the first catches
//! `rho < 1e-3`, the last catches `rho >= 50`, and the interior bins are
//! log-uniform over `[1e-3, 50]`. The report is a single text block with a
//! row of harmonic means of the bin bounds and a row of dataset fractions.
//! Diagnostic only; nothing feeds back into training.

use crate::core::Episode;
use rayon::prelude::*;
use std::fmt::Write;

/// Number of histogram bins.
pub const N_BINS: usize = 81;

const RHO_LO: f64 = 1e-3;
const RHO_HI: f64 = 50.0;

fn bin_bounds() -> Vec<f64> {
    let (beg, end) = (RHO_LO.ln(), RHO_HI.ln());
    let mut bounds = vec![0.0; N_BINS + 1];
    for i in 1..N_BINS {
        bounds[i] = (beg + (end - beg) * (i as f64 - 1.0) / (N_BINS as f64 - 2.0)).exp();
    }
    bounds[N_BINS] = f64::MAX;
    bounds
}

fn harmonic_mean(a: f64, b: f64) -> f64 {
    2.0 * a * (b / (a + b))
}

/// Count all stored weights into the histogram bins.
pub fn count_imp_weights(episodes: &[Episode]) -> Vec<u64> {
    let bounds = bin_bounds();
    episodes
        .par_iter()
        .fold(
            || vec![0u64; N_BINS],
            |mut counts, ep| {
                for &w in &ep.off_pol_imp_w {
                    let rho = w as f64;
                    let bin = bounds
                        .partition_point(|&lo| rho >= lo)
                        .saturating_sub(1)
                        .min(N_BINS - 1);
                    counts[bin] += 1;
                }
                counts
            },
        )
        .reduce(
            || vec![0u64; N_BINS],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        )
}

/// Render the histogram report.
pub fn histogram_report(episodes: &[Episode], n_data: usize) -> String {
    let bounds = bin_bounds();
    let counts = count_imp_weights(episodes);
    let data_size = n_data.max(1) as f64;

    let rule = "_".repeat(69);
    let mut out = String::new();
    out.push_str(&rule);
    out.push_str("\nOFF-POLICY IMP WEIGHTS HISTOGRAMS\n");
    out.push_str("weight pi/mu (harmonic mean of histogram's bounds):\n");
    for b in 0..N_BINS {
        let _ = write!(out, " {:>9.1e}", harmonic_mean(bounds[b], bounds[b + 1]));
    }
    out.push_str("\nfraction of dataset:\n");
    for &c in &counts {
        let _ = write!(out, " {:>9.1e}", c as f64 / data_size);
    }
    out.push('\n');
    out.push_str(&rule);
    out
}
