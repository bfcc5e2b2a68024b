// Bring-up implementations of the vision seams
//
// Real deployments plug a live camera and a fiducial decoder into the
// `FrameSource` / `MarkerDetector` traits. For bench testing the runtime can
// replay frames from a directory and take marker pixel positions from a
// JSON file (the camera is rigidly mounted, so they rarely move).

use std::fs;
use std::path::{Path, PathBuf};

use image::GrayImage;
use serde::Deserialize;
use tracing::{info, warn};

use crate::vision::homography::MarkerDetection;
use crate::vision::{FrameSource, MarkerDetector};

/// Replays image files from a directory in lexical order, each one once.
pub struct DirectoryFrameSource {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl DirectoryFrameSource {
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        info!("frame source: {} files in {}", files.len(), dir.display());
        Ok(Self { files, cursor: 0 })
    }
}

impl FrameSource for DirectoryFrameSource {
    fn latest_frame(&mut self) -> Option<GrayImage> {
        while self.cursor < self.files.len() {
            let path = &self.files[self.cursor];
            self.cursor += 1;
            match image::open(path) {
                Ok(img) => return Some(img.into_luma8()),
                Err(e) => warn!("skipping {}: {}", path.display(), e),
            }
        }
        None
    }
}

#[derive(Debug, Deserialize)]
struct MarkerEntry {
    id: u32,
    x: f64,
    y: f64,
}

/// Reports a fixed set of marker pixel centers loaded from JSON:
/// `[{"id":0,"x":52.0,"y":48.5}, ...]`
pub struct FixedMarkerDetector {
    markers: Vec<MarkerDetection>,
}

impl FixedMarkerDetector {
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let entries: Vec<MarkerEntry> = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self {
            markers: entries
                .into_iter()
                .map(|e| MarkerDetection {
                    id: e.id,
                    center: (e.x, e.y),
                })
                .collect(),
        })
    }

    /// No markers: calibration never succeeds, detection stays suspended.
    pub fn none() -> Self {
        Self {
            markers: Vec::new(),
        }
    }
}

impl MarkerDetector for FixedMarkerDetector {
    fn detect(&self, _frame: &GrayImage) -> Vec<MarkerDetection> {
        self.markers.clone()
    }
}
