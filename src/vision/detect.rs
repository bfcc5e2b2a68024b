// Per-frame blob detection
//
// Pipeline: background subtraction -> threshold -> morphological opening ->
// connected components -> ellipse shape filter -> merge nearby fragments ->
// intensity classification. Only objects darker than the background survive;
// the two color classes are split by how much darker they are.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::open;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::config::{
    ASPECT_RATIO_MAX, ASPECT_RATIO_MIN, BLACK_THRESHOLD, DIFF_THRESHOLD, GREY_THRESHOLD,
    MAX_AXIS, MERGE_DISTANCE, MIN_AXIS, MIN_CONTOUR_POINTS,
};

/// Color class of a detected cylinder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlobColor {
    Grey,
    Black,
}

/// Axis-aligned pixel bounding box (x, y, w, h)
pub type BoundingBox = (u32, u32, u32, u32);

/// One classified detection in pixel space
#[derive(Debug, Clone, PartialEq)]
pub struct BlobDetection {
    pub color: BlobColor,
    /// Bounding-box center in pixels
    pub center: (f64, f64),
    pub bbox: BoundingBox,
}

/// Candidate blob between the shape filter and the merge step
struct Candidate {
    center: (f64, f64),
    pixels: Vec<(u32, u32)>,
}

/// Run the full detection pipeline for one frame against a static background.
pub fn detect_blobs(frame: &GrayImage, background: &GrayImage) -> Vec<BlobDetection> {
    let mask = subtract_background(frame, background);
    let mask = open(&mask, Norm::LInf, 1);

    let candidates = extract_candidates(&mask);
    let merged = merge_candidates(candidates);

    merged
        .into_iter()
        .filter_map(|c| classify(frame, background, c))
        .collect()
}

/// Absolute difference against the background, binarized.
fn subtract_background(frame: &GrayImage, background: &GrayImage) -> GrayImage {
    let (w, h) = frame.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let f = frame.get_pixel(x, y)[0] as i16;
        let b = background.get_pixel(x, y)[0] as i16;
        if (f - b).unsigned_abs() > DIFF_THRESHOLD as u16 {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Label the binary mask and keep components that look like cylinders.
fn extract_candidates(mask: &GrayImage) -> Vec<Candidate> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut components: Vec<Vec<(u32, u32)>> = Vec::new();
    let mut index_of_label: std::collections::HashMap<u32, usize> = std::collections::HashMap::new();

    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel[0];
        if label == 0 {
            continue;
        }
        let idx = *index_of_label.entry(label).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[idx].push((x, y));
    }

    components
        .into_iter()
        .filter_map(|pixels| {
            if pixels.len() < MIN_CONTOUR_POINTS {
                return None;
            }

            let (center, major, minor) = ellipse_fit(&pixels);
            if major < MIN_AXIS || minor < MIN_AXIS || major > MAX_AXIS || minor > MAX_AXIS {
                return None;
            }
            let aspect = if minor > 0.0 { major / minor } else { 1.0 };
            if aspect < ASPECT_RATIO_MIN || aspect > ASPECT_RATIO_MAX {
                return None;
            }

            Some(Candidate { center, pixels })
        })
        .collect()
}

/// Equivalent-ellipse axes from the component's second central moments.
/// For a solid ellipse the variance along a principal axis is (axis/4)^2.
fn ellipse_fit(pixels: &[(u32, u32)]) -> ((f64, f64), f64, f64) {
    let n = pixels.len() as f64;
    let cx = pixels.iter().map(|&(x, _)| x as f64).sum::<f64>() / n;
    let cy = pixels.iter().map(|&(_, y)| y as f64).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for &(x, y) in pixels {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    sxx /= n;
    syy /= n;
    sxy /= n;

    // Eigenvalues of the 2x2 covariance matrix
    let trace = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    let disc = (trace * trace / 4.0 - det).max(0.0).sqrt();
    let l1 = trace / 2.0 + disc;
    let l2 = (trace / 2.0 - disc).max(0.0);

    ((cx, cy), 4.0 * l1.sqrt(), 4.0 * l2.sqrt())
}

/// Greedily cluster candidates whose centers are within the merge distance,
/// unioning their pixel sets. Collapses one object fragmented by noise into a
/// single detection.
fn merge_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::new();
    let mut used = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let (x1, y1) = candidates[i].center;
        let mut pixels = candidates[i].pixels.clone();

        for j in (i + 1)..candidates.len() {
            if used[j] {
                continue;
            }
            let (x2, y2) = candidates[j].center;
            let dist = ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt();
            if dist < MERGE_DISTANCE {
                used[j] = true;
                pixels.extend_from_slice(&candidates[j].pixels);
            }
        }

        merged.push(Candidate {
            center: (x1, y1),
            pixels,
        });
    }
    merged
}

/// Classify a merged candidate by its mean intensity relative to the
/// background over the same pixels. Lighter-than-background blobs are
/// discarded.
fn classify(frame: &GrayImage, background: &GrayImage, c: Candidate) -> Option<BlobDetection> {
    let n = c.pixels.len() as f64;
    let object_avg: f64 = c
        .pixels
        .iter()
        .map(|&(x, y)| frame.get_pixel(x, y)[0] as f64)
        .sum::<f64>()
        / n;
    let background_avg: f64 = c
        .pixels
        .iter()
        .map(|&(x, y)| background.get_pixel(x, y)[0] as f64)
        .sum::<f64>()
        / n;
    let avg_diff = object_avg - background_avg;

    let color = if avg_diff < BLACK_THRESHOLD {
        BlobColor::Black
    } else if avg_diff < GREY_THRESHOLD {
        BlobColor::Grey
    } else {
        return None;
    };

    let min_x = c.pixels.iter().map(|&(x, _)| x).min()?;
    let max_x = c.pixels.iter().map(|&(x, _)| x).max()?;
    let min_y = c.pixels.iter().map(|&(_, y)| y).min()?;
    let max_y = c.pixels.iter().map(|&(_, y)| y).max()?;
    let w = max_x - min_x + 1;
    let h = max_y - min_y + 1;

    Some(BlobDetection {
        color,
        center: (min_x as f64 + w as f64 / 2.0, min_y as f64 + h as f64 / 2.0),
        bbox: (min_x, min_y, w, h),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn background(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([200u8]))
    }

    fn draw_disk(img: &mut GrayImage, cx: i32, cy: i32, r: i32, value: u8) {
        for y in (cy - r)..=(cy + r) {
            for x in (cx - r)..=(cx + r) {
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r
                    && x >= 0
                    && y >= 0
                    && (x as u32) < img.width()
                    && (y as u32) < img.height()
                {
                    img.put_pixel(x as u32, y as u32, Luma([value]));
                }
            }
        }
    }

    #[test]
    fn dark_disk_detected_as_black() {
        let bg = background(300, 300);
        let mut frame = bg.clone();
        // Diameter 60 px, 160 darker than background
        draw_disk(&mut frame, 150, 150, 30, 40);

        let blobs = detect_blobs(&frame, &bg);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].color, BlobColor::Black);
        assert!((blobs[0].center.0 - 150.0).abs() < 3.0);
        assert!((blobs[0].center.1 - 150.0).abs() < 3.0);
    }

    #[test]
    fn moderately_dark_disk_detected_as_grey() {
        let bg = background(300, 300);
        let mut frame = bg.clone();
        // 80 darker: between the grey and black thresholds
        draw_disk(&mut frame, 100, 120, 28, 120);

        let blobs = detect_blobs(&frame, &bg);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].color, BlobColor::Grey);
    }

    #[test]
    fn lighter_than_background_discarded() {
        let bg = background(300, 300);
        let mut frame = bg.clone();
        draw_disk(&mut frame, 150, 150, 30, 255);
        assert!(detect_blobs(&frame, &bg).is_empty());
    }

    #[test]
    fn undersized_blob_filtered() {
        let bg = background(300, 300);
        let mut frame = bg.clone();
        // Diameter 20 px, below the 40 px axis floor
        draw_disk(&mut frame, 150, 150, 10, 40);
        assert!(detect_blobs(&frame, &bg).is_empty());
    }

    #[test]
    fn oversized_blob_filtered() {
        let bg = background(400, 400);
        let mut frame = bg.clone();
        // Diameter 120 px, above the 85 px axis ceiling
        draw_disk(&mut frame, 200, 200, 60, 40);
        assert!(detect_blobs(&frame, &bg).is_empty());
    }

    #[test]
    fn overlapping_fragments_yield_one_detection() {
        let bg = background(300, 300);
        let mut frame = bg.clone();
        draw_disk(&mut frame, 130, 150, 25, 40);
        draw_disk(&mut frame, 160, 150, 25, 40);

        let blobs = detect_blobs(&frame, &bg);
        assert_eq!(blobs.len(), 1, "fragments should collapse: {blobs:?}");
    }

    #[test]
    fn merge_unions_nearby_candidates() {
        let near = |cx: f64, px: u32| Candidate {
            center: (cx, 100.0),
            pixels: vec![(px, 100), (px + 1, 100)],
        };
        // 30 px apart: merge. 200 px apart: keep separate.
        let merged = merge_candidates(vec![near(100.0, 100), near(130.0, 130), near(300.0, 300)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].pixels.len(), 4);
        assert_eq!(merged[1].pixels.len(), 2);
    }

    #[test]
    fn distant_objects_stay_separate() {
        let bg = background(400, 300);
        let mut frame = bg.clone();
        draw_disk(&mut frame, 90, 150, 28, 40);
        draw_disk(&mut frame, 300, 150, 28, 120);

        let mut blobs = detect_blobs(&frame, &bg);
        blobs.sort_by(|a, b| a.center.0.partial_cmp(&b.center.0).unwrap());
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].color, BlobColor::Black);
        assert_eq!(blobs[1].color, BlobColor::Grey);
    }
}
