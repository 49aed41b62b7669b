//! Frame preprocessing ahead of feature location.
//!
//! A band-pass filter suppresses both pixel noise (Gaussian smoothing at the
//! noise length scale) and slowly varying background (a boxcar mean at the
//! feature length scale), leaving blob-like features on a flat zero floor.

use ndarray::{Array2, ArrayView2, Axis};

/// Invert a frame so dark features on a light background become bright.
///
/// Each pixel `p` becomes `max - p`, where `max` is the brightest pixel.
pub fn invert(image: &ArrayView2<f64>) -> Array2<f64> {
    let max = image.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return image.to_owned();
    }
    image.mapv(|p| max - p)
}

/// Normalized 1D Gaussian kernel truncated at 4 sigma.
///
/// A non-positive sigma yields the identity kernel.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let half = (4.0 * sigma).ceil() as i64;
    let mut kernel: Vec<f64> = (-half..=half)
        .map(|i| (-(i * i) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Uniform kernel of the given width.
pub fn boxcar_kernel(width: usize) -> Vec<f64> {
    let width = width.max(1);
    vec![1.0 / width as f64; width]
}

/// Convolve along one axis, repeating edge pixels beyond the border.
fn convolve_axis(image: &ArrayView2<f64>, kernel: &[f64], axis: Axis) -> Array2<f64> {
    let (nrows, ncols) = image.dim();
    let half = (kernel.len() / 2) as i64;
    let len = (if axis == Axis(0) { nrows } else { ncols }) as i64;

    Array2::from_shape_fn((nrows, ncols), |(row, col)| {
        let center = (if axis == Axis(0) { row } else { col }) as i64;
        kernel
            .iter()
            .enumerate()
            .map(|(k, &w)| {
                let idx = (center + k as i64 - half).clamp(0, len - 1) as usize;
                let p = if axis == Axis(0) {
                    image[[idx, col]]
                } else {
                    image[[row, idx]]
                };
                w * p
            })
            .sum()
    })
}

/// Apply a separable kernel along both axes.
pub fn convolve_separable(image: &ArrayView2<f64>, kernel: &[f64]) -> Array2<f64> {
    let rows_done = convolve_axis(image, kernel, Axis(0));
    convolve_axis(&rows_done.view(), kernel, Axis(1))
}

/// Band-pass filter: Gaussian smoothing minus boxcar background.
///
/// # Arguments
/// * `image` - Input frame
/// * `noise_size` - Gaussian sigma in pixels
/// * `smoothing_size` - Boxcar width in pixels (the feature diameter)
///
/// # Returns
/// Filtered frame with negative values clipped to zero
pub fn bandpass(image: &ArrayView2<f64>, noise_size: f64, smoothing_size: usize) -> Array2<f64> {
    let smoothed = convolve_separable(image, &gaussian_kernel(noise_size));
    let background = convolve_separable(image, &boxcar_kernel(smoothing_size));
    let mut result = smoothed - background;
    result.mapv_inplace(|p| if p > 0.0 { p } else { 0.0 });
    result
}

/// Percentile of all pixel values with linear interpolation between ranks.
///
/// Returns `None` for an empty frame. Non-finite pixels are ignored.
pub fn percentile(image: &ArrayView2<f64>, pct: f64) -> Option<f64> {
    let mut values: Vec<f64> = image.iter().copied().filter(|p| p.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}
