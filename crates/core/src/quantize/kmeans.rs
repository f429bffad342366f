//! K-means clustering used for coarse centroids and fine codebooks

use crate::vector::ops::l2_distance_squared_unchecked;
use crate::{Result, RetrievalError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Lloyd's k-means with k-means++ seeding.
///
/// `k` is clamped to the number of points. Empty clusters are reseeded from a
/// random data point.
pub fn kmeans<V: AsRef<[f32]>>(
    data: &[V],
    k: usize,
    iterations: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>> {
    if data.is_empty() {
        return Err(RetrievalError::Training("Empty data for k-means".to_string()));
    }
    if k == 0 {
        return Err(RetrievalError::Training("k-means needs k > 0".to_string()));
    }

    let dim = data[0].as_ref().len();
    let n = data.len();
    let k = k.min(n);

    let mut centroids = kmeans_plusplus_init(data, k, rng);
    let mut assignments = vec![usize::MAX; n];

    for _ in 0..iterations {
        let mut counts = vec![0usize; k];
        let mut changed = false;

        for (i, point) in data.iter().enumerate() {
            let (best, _) = nearest_centroid(&centroids, point.as_ref());
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
            counts[best] += 1;
        }

        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0f64; dim]; k];
        for (i, point) in data.iter().enumerate() {
            for (s, &x) in sums[assignments[i]].iter_mut().zip(point.as_ref()) {
                *s += x as f64;
            }
        }

        for c in 0..k {
            if counts[c] > 0 {
                centroids[c] = sums[c]
                    .iter()
                    .map(|&s| (s / counts[c] as f64) as f32)
                    .collect();
            } else if let Some(point) = data.choose(rng) {
                centroids[c] = point.as_ref().to_vec();
            }
        }
    }

    Ok(centroids)
}

/// Index of the closest centroid and its squared distance
#[inline]
pub fn nearest_centroid(centroids: &[Vec<f32>], point: &[f32]) -> (usize, f32) {
    let mut best_idx = 0;
    let mut best_dist = f32::INFINITY;

    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = l2_distance_squared_unchecked(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best_idx = idx;
        }
    }

    (best_idx, best_dist)
}

fn kmeans_plusplus_init<V: AsRef<[f32]>>(data: &[V], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = data.len();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    centroids.push(data[rng.gen_range(0..n)].as_ref().to_vec());

    // Distance of every point to its closest chosen centroid
    let mut distances = vec![f32::INFINITY; n];

    while centroids.len() < k {
        let last = &centroids[centroids.len() - 1];
        for (i, point) in data.iter().enumerate() {
            let dist = l2_distance_squared_unchecked(point.as_ref(), last);
            distances[i] = distances[i].min(dist);
        }

        let total: f32 = distances.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            let idx = rng.gen_range(0..n);
            centroids.push(data[idx].as_ref().to_vec());
            continue;
        }

        let threshold = rng.gen::<f32>() * total;
        let mut cumsum = 0.0f32;
        let mut chosen_idx = n - 1;

        for (i, &dist) in distances.iter().enumerate() {
            cumsum += dist;
            if cumsum >= threshold {
                chosen_idx = i;
                break;
            }
        }

        centroids.push(data[chosen_idx].as_ref().to_vec());
    }

    centroids
}
