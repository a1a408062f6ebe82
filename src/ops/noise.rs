// ============================================================================
// NOISE FILTER: density-based removal of stray foreground pixels
// ============================================================================

use image::GrayImage;
use rayon::prelude::*;

use crate::error::NoiseFilterError;

/// Removes small, isolated foreground clusters from a binary mask.
///
/// Implementations must not modify the input and must be deterministic for
/// a given mask and parameters.
pub trait NoiseFilter: Send + Sync {
    fn filter(
        &self,
        mask: &GrayImage,
        eps: f64,
        min_samples: usize,
    ) -> Result<GrayImage, NoiseFilterError>;
}

const NO_POINT: u32 = u32::MAX;
const UNLABELED: i32 = -1;

/// DBSCAN over foreground pixel coordinates.
///
/// A foreground pixel (value > 127) is a core point when at least
/// `min_samples` foreground pixels, itself included, lie within Euclidean
/// distance `eps`. Core points within `eps` of each other share a cluster;
/// non-core pixels join the first cluster that reaches them. Pixels left
/// without a cluster, and clusters smaller than `min_samples`, become
/// background. Clusters are expanded in raster order.
#[derive(Clone, Copy, Debug, Default)]
pub struct DbscanFilter;

impl DbscanFilter {
    /// Offsets of every pixel within `eps` of the origin, origin included.
    /// The radius never exceeds `max_radius`, the largest axis distance two
    /// pixels of the mask can have.
    fn disc_offsets(eps: f64, max_radius: usize) -> Vec<(isize, isize)> {
        let r = eps.floor().min(max_radius as f64) as isize;
        let eps_sq = eps * eps;
        let mut offsets = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                if ((dx * dx + dy * dy) as f64) <= eps_sq {
                    offsets.push((dx, dy));
                }
            }
        }
        offsets
    }
}

impl NoiseFilter for DbscanFilter {
    fn filter(
        &self,
        mask: &GrayImage,
        eps: f64,
        min_samples: usize,
    ) -> Result<GrayImage, NoiseFilterError> {
        if !eps.is_finite() || eps <= 0.0 {
            return Err(NoiseFilterError::InvalidEps(eps));
        }
        if min_samples == 0 {
            return Err(NoiseFilterError::InvalidMinSamples);
        }

        let (w, h) = (mask.width() as usize, mask.height() as usize);
        let raw = mask.as_raw();

        // Foreground points in raster order, and a pixel -> point lookup.
        let mut points: Vec<(usize, usize)> = Vec::new();
        let mut point_at = vec![NO_POINT; w * h];
        for (i, &v) in raw.iter().enumerate() {
            if v > 127 {
                point_at[i] = points.len() as u32;
                points.push((i % w, i / w));
            }
        }
        if points.is_empty() {
            return Ok(mask.clone());
        }

        // eps spans the whole mask: every foreground pixel neighbors every
        // other, so there is one cluster or none.
        let diag_sq = ((w - 1) * (w - 1) + (h - 1) * (h - 1)) as f64;
        if eps * eps >= diag_sq {
            if points.len() >= min_samples {
                return Ok(mask.clone());
            }
            let mut out = mask.clone();
            for &(x, y) in &points {
                out.put_pixel(x as u32, y as u32, image::Luma([0]));
            }
            log::debug!(
                "noise filter: eps {} spans the mask, removed all {} foreground pixels",
                eps,
                points.len()
            );
            return Ok(out);
        }

        let offsets = Self::disc_offsets(eps, w.max(h).saturating_sub(1));
        let offsets: &[(isize, isize)] = &offsets;
        let lookup: &[u32] = &point_at;
        let neighbors_of = |&(x, y): &(usize, usize)| {
            offsets.iter().filter_map(move |&(dx, dy)| {
                let nx = x as isize + dx;
                let ny = y as isize + dy;
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    return None;
                }
                let p = lookup[ny as usize * w + nx as usize];
                (p != NO_POINT).then_some(p as usize)
            })
        };

        let is_core: Vec<bool> = points
            .par_iter()
            .map(|p| neighbors_of(p).count() >= min_samples)
            .collect();

        let mut labels = vec![UNLABELED; points.len()];
        let mut cluster_sizes: Vec<usize> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();

        for seed in 0..points.len() {
            if labels[seed] != UNLABELED || !is_core[seed] {
                continue;
            }
            let cluster = cluster_sizes.len() as i32;
            cluster_sizes.push(1);
            labels[seed] = cluster;
            stack.push(seed);

            while let Some(current) = stack.pop() {
                for n in neighbors_of(&points[current]) {
                    if labels[n] != UNLABELED {
                        continue;
                    }
                    labels[n] = cluster;
                    cluster_sizes[cluster as usize] += 1;
                    if is_core[n] {
                        stack.push(n);
                    }
                }
            }
        }

        let mut out = mask.clone();
        let buf: &mut [u8] = &mut out;
        let mut removed = 0usize;
        for (idx, &(x, y)) in points.iter().enumerate() {
            let keep = labels[idx] >= 0 && cluster_sizes[labels[idx] as usize] >= min_samples;
            if !keep {
                buf[y * w + x] = 0;
                removed += 1;
            }
        }

        log::debug!(
            "noise filter: {} clusters, removed {} of {} foreground pixels",
            cluster_sizes.len(),
            removed,
            points.len()
        );

        Ok(out)
    }
}
