//! Observation-to-track matching algorithms.

use nalgebra::DMatrix;

use crate::{Error, Result};

/// Check if a matrix contains NaN values.
pub fn has_nan(matrix: &DMatrix<f64>) -> bool {
    matrix.iter().any(|&x| x.is_nan())
}

/// Validate a distance matrix (no NaN values allowed).
pub fn validate_distance_matrix(matrix: &DMatrix<f64>) -> Result<()> {
    if has_nan(matrix) {
        return Err(Error::InvalidParameter(
            "Distance matrix contains NaN values".to_string(),
        ));
    }
    Ok(())
}

/// Match candidates to tracks using greedy minimum-distance matching.
///
/// Repeatedly commits the globally smallest remaining distance that is
/// `<= threshold`. Ties are broken by the lowest track id, then the lowest
/// candidate index, so the result is reproducible.
///
/// # Arguments
/// * `distance_matrix` - Distance matrix (n_candidates x n_tracks)
/// * `track_ids` - Identity of each column, used for tie-breaking
/// * `threshold` - Maximum distance for a valid match
///
/// # Returns
/// Tuple of (matched_candidate_indices, matched_track_columns) in commit
/// order. Unmatched candidates/tracks are not included.
pub fn match_candidates_and_tracks(
    distance_matrix: &DMatrix<f64>,
    track_ids: &[u64],
    threshold: f64,
) -> (Vec<usize>, Vec<usize>) {
    let n_candidates = distance_matrix.nrows();
    let n_tracks = distance_matrix.ncols();
    debug_assert_eq!(track_ids.len(), n_tracks);

    if n_candidates == 0 || n_tracks == 0 {
        return (Vec::new(), Vec::new());
    }

    // Collect all valid (distance, track_id, cand_idx, track_col) pairs
    let mut pairs: Vec<(f64, u64, usize, usize)> = Vec::new();
    for i in 0..n_candidates {
        for j in 0..n_tracks {
            let dist = distance_matrix[(i, j)];
            if dist.is_finite() && dist <= threshold {
                pairs.push((dist, track_ids[j], i, j));
            }
        }
    }

    pairs.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut used_cands = vec![false; n_candidates];
    let mut used_tracks = vec![false; n_tracks];

    let mut matched_cands = Vec::new();
    let mut matched_tracks = Vec::new();

    for (_dist, _id, cand_idx, track_col) in pairs {
        if used_cands[cand_idx] || used_tracks[track_col] {
            continue;
        }

        matched_cands.push(cand_idx);
        matched_tracks.push(track_col);
        used_cands[cand_idx] = true;
        used_tracks[track_col] = true;
    }

    (matched_cands, matched_tracks)
}

/// Check whether the candidate graph under `threshold` is ambiguous.
///
/// A graph is ambiguous when some track has two or more candidates within
/// range, or some candidate is within range of two or more tracks.
pub fn is_ambiguous(distance_matrix: &DMatrix<f64>, threshold: f64) -> bool {
    let within = |d: f64| d.is_finite() && d <= threshold;

    let track_conflict = distance_matrix
        .column_iter()
        .any(|col| col.iter().filter(|&&d| within(d)).count() > 1);
    if track_conflict {
        return true;
    }

    distance_matrix
        .row_iter()
        .any(|row| row.iter().filter(|&&d| within(d)).count() > 1)
}

/// A connected group of candidates and tracks in the in-range graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    /// Candidate (row) indices, ascending.
    pub candidates: Vec<usize>,
    /// Track (column) indices, ascending.
    pub tracks: Vec<usize>,
}

impl Subnet {
    /// Distance matrix restricted to this subnet's rows and columns.
    pub fn distances(&self, distance_matrix: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(self.candidates.len(), self.tracks.len(), |i, j| {
            distance_matrix[(self.candidates[i], self.tracks[j])]
        })
    }
}

/// Split the candidate graph under `threshold` into connected subnets.
///
/// A candidate and a track are joined when their distance is finite and
/// `<= threshold`. Nodes without any in-range edge belong to no subnet.
/// Subnets come out ordered by their lowest candidate, then lowest track.
pub fn subnets(distance_matrix: &DMatrix<f64>, threshold: f64) -> Vec<Subnet> {
    let n_candidates = distance_matrix.nrows();
    let n_nodes = n_candidates + distance_matrix.ncols();

    // Candidates are nodes 0..n_candidates, tracks follow
    let mut labels: Vec<usize> = (0..n_nodes).collect();
    let mut linked = vec![false; n_nodes];
    for i in 0..n_candidates {
        for j in 0..distance_matrix.ncols() {
            let dist = distance_matrix[(i, j)];
            if dist.is_finite() && dist <= threshold {
                union_labels(&mut labels, i, n_candidates + j);
                linked[i] = true;
                linked[n_candidates + j] = true;
            }
        }
    }

    let mut subnet_of_root: Vec<Option<usize>> = vec![None; n_nodes];
    let mut result: Vec<Subnet> = Vec::new();
    for node in (0..n_nodes).filter(|&n| linked[n]) {
        let root = find_root(&mut labels, node);
        let idx = match subnet_of_root[root] {
            Some(idx) => idx,
            None => {
                result.push(Subnet {
                    candidates: Vec::new(),
                    tracks: Vec::new(),
                });
                subnet_of_root[root] = Some(result.len() - 1);
                result.len() - 1
            }
        };
        if node < n_candidates {
            result[idx].candidates.push(node);
        } else {
            result[idx].tracks.push(node - n_candidates);
        }
    }
    result
}

// Root of `node`, compressing the path on the way up.
fn find_root(labels: &mut [usize], node: usize) -> usize {
    let mut current = node;
    while current != labels[current] {
        labels[current] = labels[labels[current]];
        current = labels[current];
    }
    current
}

// Merge two sets; the smaller root becomes the parent.
fn union_labels(labels: &mut [usize], a: usize, b: usize) {
    let root_a = find_root(labels, a);
    let root_b = find_root(labels, b);
    if root_a < root_b {
        labels[root_b] = root_a;
    } else if root_b < root_a {
        labels[root_a] = root_b;
    }
}

/// Get unmatched indices from a match result.
pub fn get_unmatched(total: usize, matched: &[usize]) -> Vec<usize> {
    let mut is_matched = vec![false; total];
    for &idx in matched {
        is_matched[idx] = true;
    }
    (0..total).filter(|&i| !is_matched[i]).collect()
}
