// Temporally debounced object tracking
//
// Detections from single frames flicker; the tracker keeps an object list
// stable across frames with asymmetric hysteresis: an object becomes visible
// after SEEN_THRESHOLD consecutive detections and is evicted only after
// MISSED_THRESHOLD consecutive frames without one. Identity is approximate:
// same color, world position within IDENTITY_TOLERANCE.

use std::sync::{Arc, Mutex};

use image::GrayImage;
use tracing::{debug, info};

use crate::config::{
    CALIBRATE_EVERY_N_FRAMES, DETECT_EVERY_N_FRAMES, EXCLUSION_X, EXCLUSION_Y,
    IDENTITY_TOLERANCE, MISSED_THRESHOLD, SEEN_THRESHOLD,
};
use crate::sorting::SlotMap;
use crate::vision::detect::{detect_blobs, BlobColor, BoundingBox};
use crate::vision::homography::CoordinateMapper;
use crate::vision::MarkerDetector;

/// Lifecycle of a tracked object within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Unsorted,
    Sorted,
    Unreachable,
}

/// A cylinder on the worktable, identified by color and approximate world
/// position (there is no stable id).
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub color: BlobColor,
    pub world_x: f64,
    pub world_y: f64,
    pub bbox: BoundingBox,
    pub state: ObjectState,
    pub assigned_slot: Option<usize>,
    pub visible: bool,
    pub seen_streak: u32,
    pub missed_streak: u32,
}

impl TrackedObject {
    fn new(candidate: &ObjectCandidate) -> Self {
        Self {
            color: candidate.color,
            world_x: candidate.world_x,
            world_y: candidate.world_y,
            bbox: candidate.bbox,
            state: candidate.state,
            assigned_slot: candidate.assigned_slot,
            visible: false,
            seen_streak: 1,
            missed_streak: 0,
        }
    }

    /// Identity check: same color, within tolerance in both axes.
    pub fn matches(&self, color: BlobColor, world_x: f64, world_y: f64) -> bool {
        self.color == color
            && (self.world_x - world_x).abs() < IDENTITY_TOLERANCE
            && (self.world_y - world_y).abs() < IDENTITY_TOLERANCE
    }

    fn seen(&mut self) {
        self.missed_streak = 0;
        self.seen_streak = (self.seen_streak + 1).min(SEEN_THRESHOLD);
        if self.seen_streak >= SEEN_THRESHOLD {
            self.visible = true;
        }
    }

    /// Returns true when the object should be evicted.
    fn missed(&mut self) -> bool {
        self.visible = false;
        self.seen_streak = 0;
        self.missed_streak += 1;
        self.missed_streak >= MISSED_THRESHOLD
    }
}

/// Snapshot key the coordinator holds across a sorting cycle. The tracked
/// set may change underneath it; the key re-finds the object by identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectKey {
    pub color: BlobColor,
    pub world_x: f64,
    pub world_y: f64,
}

/// One world-projected, classified detection ready for reconciliation
#[derive(Debug, Clone)]
pub struct ObjectCandidate {
    pub color: BlobColor,
    pub world_x: f64,
    pub world_y: f64,
    pub bbox: BoundingBox,
    pub state: ObjectState,
    pub assigned_slot: Option<usize>,
}

/// One vision snapshot: the tracked-object set and the calibration
/// transform, guarded together by a single lock. Readers never observe a
/// half-updated tracking pass.
pub struct VisionShared {
    pub objects: Vec<TrackedObject>,
    pub mapper: CoordinateMapper,
    pub slots: SlotMap,
}

impl VisionShared {
    pub fn new(slots: SlotMap) -> Self {
        Self {
            objects: Vec::new(),
            mapper: CoordinateMapper::new(),
            slots,
        }
    }

    /// First unsorted, visible object, as a snapshot key.
    pub fn select_unsorted(&self) -> Option<ObjectKey> {
        self.objects
            .iter()
            .find(|o| o.state == ObjectState::Unsorted && o.visible)
            .map(|o| ObjectKey {
                color: o.color,
                world_x: o.world_x,
                world_y: o.world_y,
            })
    }

    pub fn find(&self, key: &ObjectKey) -> Option<&TrackedObject> {
        self.objects
            .iter()
            .find(|o| o.matches(key.color, key.world_x, key.world_y))
    }

    fn find_mut(&mut self, key: &ObjectKey) -> Option<&mut TrackedObject> {
        self.objects
            .iter_mut()
            .find(|o| o.matches(key.color, key.world_x, key.world_y))
    }

    pub fn mark_unreachable(&mut self, key: &ObjectKey) {
        if let Some(obj) = self.find_mut(key) {
            info!(
                "{:?} object at ({:.2}, {:.2}) marked unreachable",
                obj.color, obj.world_x, obj.world_y
            );
            obj.state = ObjectState::Unreachable;
        }
    }

    pub fn mark_sorted(&mut self, key: &ObjectKey, slot: Option<usize>) {
        if let Some(obj) = self.find_mut(key) {
            obj.state = ObjectState::Sorted;
            obj.assigned_slot = slot;
        }
    }

    /// First free slot for a color; occupancy is derived from the objects
    /// currently marked sorted.
    pub fn first_free_slot(&self, color: BlobColor) -> Option<(usize, (f64, f64))> {
        self.slots.first_free(color, &self.objects)
    }
}

/// Runs the detection pipeline at its cadence and reconciles the results
/// into the shared tracked set.
pub struct ObjectTracker {
    background: GrayImage,
    detector: Box<dyn MarkerDetector>,
    shared: Arc<Mutex<VisionShared>>,
    frame_index: u64,
}

impl ObjectTracker {
    pub fn new(
        background: GrayImage,
        detector: Box<dyn MarkerDetector>,
        shared: Arc<Mutex<VisionShared>>,
    ) -> Self {
        Self {
            background,
            detector,
            shared,
            frame_index: 0,
        }
    }

    /// Process one frame. Detection runs every DETECT_EVERY_N_FRAMES once a
    /// transform exists; calibration is re-attempted every
    /// CALIBRATE_EVERY_N_FRAMES to bound cost.
    pub fn update(&mut self, frame: &GrayImage) {
        let run_detection = self.frame_index % DETECT_EVERY_N_FRAMES == 0;
        let run_calibration = self.frame_index % CALIBRATE_EVERY_N_FRAMES == 0;
        self.frame_index += 1;

        if run_calibration {
            let markers = self.detector.detect(frame);
            let mut shared = self.shared.lock().unwrap();
            let ok = shared.mapper.calibrate(&markers);
            debug!(markers = markers.len(), ok, "calibration attempt");
        }

        if !run_detection {
            return;
        }

        // Nothing downstream can use pixel detections until a transform
        // exists; skip the pipeline entirely
        if !self.shared.lock().unwrap().mapper.has_transform() {
            return;
        }

        // Pixel-space work happens outside the lock
        let blobs = detect_blobs(frame, &self.background);

        let mut shared = self.shared.lock().unwrap();
        let mut candidates = Vec::new();
        for blob in blobs {
            let Some((wx, wy)) = shared.mapper.pixel_to_world(blob.center.0, blob.center.1) else {
                continue;
            };
            if in_exclusion_zone(wx, wy) {
                debug!("skipping blob at ({:.2}, {:.2}): robot base zone", wx, wy);
                continue;
            }
            // Objects already resting on a slot were sorted before tracking
            // started
            let slot = shared.slots.match_slot(blob.color, wx, wy);
            candidates.push(ObjectCandidate {
                color: blob.color,
                world_x: wx,
                world_y: wy,
                bbox: blob.bbox,
                state: if slot.is_some() {
                    ObjectState::Sorted
                } else {
                    ObjectState::Unsorted
                },
                assigned_slot: slot,
            });
        }

        reconcile(&mut shared.objects, &candidates);
    }
}

/// World-space rectangle around the robot base where detections are always
/// the arm itself.
pub fn in_exclusion_zone(world_x: f64, world_y: f64) -> bool {
    EXCLUSION_X.0 <= world_x
        && world_x <= EXCLUSION_X.1
        && EXCLUSION_Y.0 <= world_y
        && world_y <= EXCLUSION_Y.1
}

/// Merge one frame's candidates into the tracked set. Runs atomically under
/// the shared lock; callers see either the previous or the new set.
pub fn reconcile(objects: &mut Vec<TrackedObject>, candidates: &[ObjectCandidate]) {
    let mut matched = vec![false; objects.len()];

    for cand in candidates {
        match objects
            .iter()
            .position(|o| o.matches(cand.color, cand.world_x, cand.world_y))
        {
            Some(i) => {
                objects[i].seen();
                matched[i] = true;
            }
            None => {
                info!(
                    "new {:?} object at ({:.2}, {:.2})",
                    cand.color, cand.world_x, cand.world_y
                );
                objects.push(TrackedObject::new(cand));
                matched.push(true);
            }
        }
    }

    let mut i = 0;
    objects.retain_mut(|obj| {
        let was_matched = matched[i];
        i += 1;
        if was_matched {
            true
        } else if obj.missed() {
            info!(
                "{:?} object at ({:.2}, {:.2}) lost, evicting",
                obj.color, obj.world_x, obj.world_y
            );
            false
        } else {
            true
        }
    });
}
