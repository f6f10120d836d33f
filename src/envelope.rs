//! Sparse low/high envelopes of noisy series.
//!
//! The turning points of a noisy series are far too dense to describe its
//! outline. Here they are grouped into consecutive chunks and only the most
//! extreme turning point of each chunk survives, leaving a coarse envelope
//! that tracks the series' bounds.

use ndarray::ArrayView1;

/// Indices into a series of its low and high envelopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeIndices {
    pub low: Vec<usize>,
    pub high: Vec<usize>,
}

/// Sign of a difference, as -1, 0 or 1. Zero (and NaN) differences are 0.
pub(crate) fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Find the local minima and maxima of `s`.
///
/// A turning point is where the sign of the first difference changes; a
/// change upwards (e.g. -1 to 0, or 0 to 1) marks a minimum, a change
/// downwards a maximum. The edges of the series are never turning points.
pub fn local_extrema(s: ArrayView1<f64>) -> EnvelopeIndices {
    let mut extrema = EnvelopeIndices::default();
    if s.len() < 3 {
        return extrema;
    }

    let signs: Vec<i8> = s
        .windows(2)
        .into_iter()
        .map(|w| sign(w[1] - w[0]))
        .collect();
    for (k, pair) in signs.windows(2).enumerate() {
        let change = pair[1] - pair[0];
        if change > 0 {
            extrema.low.push(k + 1);
        } else if change < 0 {
            extrema.high.push(k + 1);
        }
    }
    extrema
}

/// Keep, for each consecutive `chunk` of `indices`, the index whose value in
/// `s` is the most extreme. `more_extreme(a, b)` says whether `a` beats `b`;
/// ties keep the earlier index. The last chunk may be short.
fn reduce_chunks(
    s: ArrayView1<f64>,
    indices: &[usize],
    chunk: usize,
    more_extreme: impl Fn(f64, f64) -> bool,
) -> Vec<usize> {
    indices
        .chunks(chunk.max(1))
        .filter_map(|c| {
            c.iter()
                .copied()
                .reduce(|best, i| if more_extreme(s[i], s[best]) { i } else { best })
        })
        .collect()
}

/// Get the indices of the low and high envelopes of `s`.
///
/// Local minima are reduced in chunks of `dmin`, local maxima in chunks of
/// `dmax`. With `split`, minima above the mean of `s` and maxima below it are
/// discarded first, which separates the two halves of a series centred on its
/// mean. A chunk size of 0 is treated as 1.
pub fn hl_envelope_indices(
    s: ArrayView1<f64>,
    dmin: usize,
    dmax: usize,
    split: bool,
) -> EnvelopeIndices {
    let EnvelopeIndices {
        mut low,
        mut high,
    } = local_extrema(s);

    if split {
        if let Some(mid) = s.mean() {
            low.retain(|&i| s[i] < mid);
            high.retain(|&i| s[i] > mid);
        }
    }

    EnvelopeIndices {
        low: reduce_chunks(s, &low, dmin, |a, b| a < b),
        high: reduce_chunks(s, &high, dmax, |a, b| a > b),
    }
}
