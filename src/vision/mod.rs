// Vision subsystem
//
// Provides:
// - Pixel -> world coordinate mapping from fiducial markers (homography)
// - Background-subtraction blob detection with shape filtering and merging
// - Temporally debounced object tracking shared with the sorting coordinator

pub mod detect;
pub mod homography;
pub mod source;
pub mod tracker;

pub use detect::{detect_blobs, BlobColor, BlobDetection};
pub use homography::{CoordinateMapper, HomographyError, MarkerDetection};
pub use source::{DirectoryFrameSource, FixedMarkerDetector};
pub use tracker::{ObjectState, ObjectTracker, TrackedObject, VisionShared};

use image::GrayImage;

/// Pull-based source of decoded camera frames. Never blocks: returns `None`
/// when no new frame is available.
pub trait FrameSource: Send {
    fn latest_frame(&mut self) -> Option<GrayImage>;
}

/// Fiducial-marker detector seam. Implementations decode marker IDs and
/// report each marker's image-center.
pub trait MarkerDetector: Send {
    fn detect(&self, frame: &GrayImage) -> Vec<MarkerDetection>;
}
