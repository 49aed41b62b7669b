//! Candidate maxima, centroid refinement and feature characterisation.

use ndarray::ArrayView2;

/// Refined offsets smaller than this (in pixels) stop the centroid iteration.
const SHIFT_THRESHOLD: f64 = 0.6;

/// Floor for the radius of gyration of point-like features.
const MIN_SIZE: f64 = 1e-6;

/// A located, characterised feature before it becomes an `Observation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub x: f64,
    pub y: f64,
    pub mass: f64,
    pub size: f64,
    pub eccentricity: f64,
    pub signal: f64,
}

/// Integer offsets `(drow, dcol)` inside a disk of the given radius.
fn disk_offsets(radius: f64) -> Vec<(i64, i64)> {
    let reach = radius.floor() as i64;
    let r2 = radius * radius;
    let mut offsets = Vec::new();
    for dr in -reach..=reach {
        for dc in -reach..=reach {
            if ((dr * dr + dc * dc) as f64) <= r2 {
                offsets.push((dr, dc));
            }
        }
    }
    offsets
}

/// Find local maxima of the processed frame.
///
/// A pixel is a maximum when it equals the maximum over the disk of radius
/// `separation_radius` around it, lies strictly above `threshold`, and is at
/// least `margin` pixels away from every edge. Plateaus keep only the first
/// pixel in row-major order.
///
/// # Returns
/// `(row, col)` pairs in row-major order
pub fn local_maxima(
    image: &ArrayView2<f64>,
    separation_radius: f64,
    threshold: f64,
    margin: usize,
) -> Vec<(usize, usize)> {
    let (nrows, ncols) = image.dim();
    if nrows <= 2 * margin || ncols <= 2 * margin {
        return Vec::new();
    }
    let offsets = disk_offsets(separation_radius);
    let mut maxima = Vec::new();

    for row in margin..nrows - margin {
        'pixel: for col in margin..ncols - margin {
            let value = image[[row, col]];
            if !(value > threshold) {
                continue;
            }
            for &(dr, dc) in &offsets {
                let r = row as i64 + dr;
                let c = col as i64 + dc;
                if r < 0 || c < 0 || r >= nrows as i64 || c >= ncols as i64 {
                    continue;
                }
                let neighbour = image[[r as usize, c as usize]];
                let earlier = dr < 0 || (dr == 0 && dc < 0);
                if neighbour > value || (earlier && neighbour == value) {
                    continue 'pixel;
                }
            }
            maxima.push((row, col));
        }
    }
    maxima
}

/// Intensity-weighted centroid offset of the mask around an integer centre.
fn centroid_offset(image: &ArrayView2<f64>, center: (usize, usize), mask: &[(i64, i64)]) -> (f64, f64) {
    let mut mass = 0.0;
    let mut sum_r = 0.0;
    let mut sum_c = 0.0;
    for &(dr, dc) in mask {
        let p = image[[(center.0 as i64 + dr) as usize, (center.1 as i64 + dc) as usize]];
        mass += p;
        sum_r += p * dr as f64;
        sum_c += p * dc as f64;
    }
    if mass > 0.0 {
        (sum_r / mass, sum_c / mass)
    } else {
        (0.0, 0.0)
    }
}

/// Iteratively move the mask towards the intensity centroid.
///
/// The mask centre is shifted to the nearest pixel whenever the offset
/// exceeds 0.6 px on either axis, and always stays `radius` pixels inside
/// the frame. Returns the final integer centre and the sub-pixel
/// `(row, col)` position.
pub fn refine(
    image: &ArrayView2<f64>,
    start: (usize, usize),
    radius: usize,
    max_iterations: usize,
) -> ((usize, usize), (f64, f64)) {
    let (nrows, ncols) = image.dim();
    let mask = disk_offsets(radius as f64);
    let mut center = start;
    let mut offset = centroid_offset(image, center, &mask);

    for _ in 0..max_iterations {
        if offset.0.abs() <= SHIFT_THRESHOLD && offset.1.abs() <= SHIFT_THRESHOLD {
            break;
        }
        let row = (center.0 as f64 + offset.0).round() as i64;
        let col = (center.1 as f64 + offset.1).round() as i64;
        let next = (
            row.clamp(radius as i64, (nrows - 1 - radius) as i64) as usize,
            col.clamp(radius as i64, (ncols - 1 - radius) as i64) as usize,
        );
        if next == center {
            break;
        }
        center = next;
        offset = centroid_offset(image, center, &mask);
    }

    let position = (center.0 as f64 + offset.0, center.1 as f64 + offset.1);
    (center, position)
}

/// Measure mass, size, eccentricity and peak signal of a refined feature.
///
/// Returns `None` when the mask holds no intensity.
pub fn characterize(
    image: &ArrayView2<f64>,
    center: (usize, usize),
    position: (f64, f64),
    radius: usize,
) -> Option<Feature> {
    let mask = disk_offsets(radius as f64);
    let mut mass = 0.0;
    let mut second_moment = 0.0;
    let mut cos2 = 0.0;
    let mut sin2 = 0.0;
    let mut signal = 0.0_f64;
    let mut central = 0.0;

    for &(dr, dc) in &mask {
        let row = center.0 as i64 + dr;
        let col = center.1 as i64 + dc;
        let p = image[[row as usize, col as usize]];
        mass += p;
        signal = signal.max(p);

        let ry = row as f64 - position.0;
        let rx = col as f64 - position.1;
        second_moment += p * (rx * rx + ry * ry);

        if dr == 0 && dc == 0 {
            central = p;
        } else {
            let theta = (dr as f64).atan2(dc as f64);
            cos2 += p * (2.0 * theta).cos();
            sin2 += p * (2.0 * theta).sin();
        }
    }

    if !(mass > 0.0) {
        return None;
    }

    let size = (second_moment / mass).sqrt().max(MIN_SIZE);
    let eccentricity = ((cos2 * cos2 + sin2 * sin2).sqrt() / (mass - central + 1e-6)).clamp(0.0, 1.0);

    Some(Feature {
        x: position.1,
        y: position.0,
        mass,
        size,
        eccentricity,
        signal,
    })
}

/// Drop features closer than `min_distance` to a brighter accepted feature.
///
/// Returns the survivors in descending mass order.
pub fn drop_close(mut features: Vec<Feature>, min_distance: f64) -> Vec<Feature> {
    features.sort_by(|a, b| b.mass.total_cmp(&a.mass));
    let mut kept: Vec<Feature> = Vec::with_capacity(features.len());
    for feature in features {
        let collides = kept
            .iter()
            .any(|k| (k.x - feature.x).hypot(k.y - feature.y) < min_distance);
        if !collides {
            kept.push(feature);
        }
    }
    kept
}
