// Pixel -> world calibration from fiducial markers
//
// A 3x3 projective transform is fit by DLT whenever at least four known
// markers are visible. When fewer are visible the last good transform is
// kept but marked stale; world coordinates are only trusted while fresh.

use nalgebra::{DMatrix, Matrix3, Vector3};
use tracing::debug;

use crate::config::MARKER_WORLD_COORDS;

/// One decoded fiducial marker: its ID and image-center in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerDetection {
    pub id: u32,
    pub center: (f64, f64),
}

#[derive(Debug, thiserror::Error)]
pub enum HomographyError {
    #[error("too few correspondences: need {needed}, got {got}")]
    TooFewPoints { needed: usize, got: usize },

    #[error("numerical failure: {0}")]
    NumericalFailure(String),
}

/// Maps camera pixels to worktable coordinates.
pub struct CoordinateMapper {
    h: Option<Matrix3<f64>>,
    fresh: bool,
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinateMapper {
    pub fn new() -> Self {
        Self { h: None, fresh: false }
    }

    /// True when a transform exists and was confirmed by the latest
    /// calibration attempt.
    pub fn is_calibrated(&self) -> bool {
        self.h.is_some() && self.fresh
    }

    /// True when any transform has ever been computed (possibly stale).
    pub fn has_transform(&self) -> bool {
        self.h.is_some()
    }

    /// Recompute the transform from the markers visible in one frame.
    ///
    /// Markers with unknown IDs are ignored. With fewer than four known
    /// markers the previous transform is retained and marked stale.
    pub fn calibrate(&mut self, markers: &[MarkerDetection]) -> bool {
        let mut image_points = Vec::new();
        let mut world_points = Vec::new();

        for marker in markers {
            if let Some(&(_, world)) = MARKER_WORLD_COORDS.iter().find(|(id, _)| *id == marker.id) {
                image_points.push([marker.center.0, marker.center.1]);
                world_points.push([world.0, world.1]);
            }
        }

        if image_points.len() < 4 {
            self.fresh = false;
            return false;
        }

        match solve_homography(&image_points, &world_points) {
            Ok(h) => {
                self.h = Some(h);
                self.fresh = true;
                true
            }
            Err(e) => {
                debug!("Homography solve failed: {}", e);
                self.fresh = false;
                false
            }
        }
    }

    /// Apply the transform with homogeneous normalization. `None` until a
    /// transform has been computed at least once.
    pub fn pixel_to_world(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        let h = self.h.as_ref()?;
        let p = h * Vector3::new(px, py, 1.0);
        if p[2].abs() < 1e-12 {
            return None;
        }
        Some((p[0] / p[2], p[1] / p[2]))
    }
}

/// Least-squares projective fit from >=4 point correspondences.
///
/// Solves A h = 0 where the null vector is taken as the eigenvector of
/// A^T A with the smallest eigenvalue. Points are Hartley-normalized first
/// for conditioning.
pub fn solve_homography(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Matrix3<f64>, HomographyError> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return Err(HomographyError::TooFewPoints {
            needed: 4,
            got: n.min(dst.len()),
        });
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);

    let mut min_idx = 0;
    let mut min_val = eig.eigenvalues[0].abs();
    for i in 1..9 {
        let v = eig.eigenvalues[i].abs();
        if v < min_val {
            min_val = v;
            min_idx = i;
        }
    }

    let h_norm = Matrix3::from_fn(|r, c| eig.eigenvectors[(3 * r + c, min_idx)]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| HomographyError::NumericalFailure("normalization not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 {
        Ok(h)
    } else {
        Ok(h / scale)
    }
}

/// Translate centroid to origin and scale so the mean distance is sqrt(2).
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx: f64 = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy: f64 = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist: f64 = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| [s * (p[0] - cx), s * (p[1] - cy)]).collect();
    (t, normalized)
}
