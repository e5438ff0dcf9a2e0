//! Moving-average smoothing for the waveform view

/// Centered moving average with a uniform kernel of `window_len` samples.
///
/// Output has the same length as the input. Near the edges the window
/// shrinks to the samples that exist instead of averaging in zeros. Inputs
/// shorter than the window, and `window_len <= 1`, come back unchanged.
/// Even lengths are widened to the next odd length so the kernel stays
/// centered.
pub fn smooth(samples: &[f32], window_len: usize) -> Vec<f32> {
    if window_len <= 1 || samples.len() < window_len {
        return samples.to_vec();
    }

    let half = window_len / 2;
    let n = samples.len();

    // Running sums in f64 keep long buffers of large amplitudes exact enough
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &s in samples {
        acc += s as f64;
        prefix.push(acc);
    }

    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(n);
            ((prefix[end] - prefix[start]) / (end - start) as f64) as f32
        })
        .collect()
}
