// Host runtime
//
// Wires the four concurrent activities together: the vision loop pulling
// frames through the tracker, the sorting coordinator, the inbound-signal
// reader inside the link, and a supervision loop that forwards manual
// control-plane messages and publishes a health summary over zenoh.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{interval, sleep};
use tracing::{info, warn};

use crate::config::{TOPIC_CMD_COORDS, TOPIC_CMD_GRIP, TOPIC_HEALTH};
use crate::link;
use crate::messages::{ControlMessage, GripState, RuntimeHealth};
use crate::sorting::{CommandPort, SlotMap, SortingCoordinator};
use crate::vision::{
    DirectoryFrameSource, FixedMarkerDetector, FrameSource, ObjectTracker, VisionShared,
};

pub struct HostOptions {
    pub controller_addr: String,
    pub background: PathBuf,
    pub frames: PathBuf,
    pub markers: Option<PathBuf>,
}

pub async fn run(opts: HostOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up control-plane subscribers...");
    let sub_coords = session.declare_subscriber(TOPIC_CMD_COORDS).await?;
    let sub_grip = session.declare_subscriber(TOPIC_CMD_GRIP).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let background = image::open(&opts.background)?.into_luma8();
    let detector = match &opts.markers {
        Some(path) => FixedMarkerDetector::from_file(path)?,
        None => {
            warn!("no marker file given; calibration will never succeed");
            FixedMarkerDetector::none()
        }
    };

    let shared = Arc::new(Mutex::new(VisionShared::new(SlotMap::deployed())));

    let (link_handle, signal_rx) = link::connect(&opts.controller_addr).await?;

    // Vision loop: reprocess only genuinely new frames, sleep briefly
    // otherwise
    let mut tracker = ObjectTracker::new(background, Box::new(detector), shared.clone());
    let mut source = DirectoryFrameSource::open(&opts.frames)?;
    tokio::task::spawn_blocking(move || {
        loop {
            match source.latest_frame() {
                Some(frame) => tracker.update(&frame),
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    });

    // Sorting loop
    let mut coordinator = SortingCoordinator::new(shared.clone(), link_handle.clone(), signal_rx);
    let robot_state = coordinator.state_watch();
    let sorter = tokio::spawn(async move {
        coordinator.run().await;
    });

    info!("host runtime started");
    info!("Subscribed to: {}, {}", TOPIC_CMD_COORDS, TOPIC_CMD_GRIP);
    info!("Publishing to: {}", TOPIC_HEALTH);

    let mut manual_link = link_handle.clone();
    let mut tick = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let health = {
                    let s = shared.lock().unwrap();
                    RuntimeHealth {
                        robot_state: robot_state.borrow().name().to_string(),
                        tracked_objects: s.objects.len(),
                        calibrated: s.mapper.is_calibrated(),
                    }
                };
                pub_health.put(serde_json::to_string(&health)?).await?;

                if sorter.is_finished() {
                    warn!("sorting loop stopped; shutting down runtime");
                    let _ = link_handle.send_shutdown();
                    sleep(Duration::from_millis(500)).await;
                    return Ok(());
                }
            }
            sample = sub_coords.recv_async() => {
                if let Ok(sample) = sample {
                    forward_manual(&mut manual_link, sample.payload().to_bytes().as_ref());
                }
            }
            sample = sub_grip.recv_async() => {
                if let Ok(sample) = sample {
                    forward_manual(&mut manual_link, sample.payload().to_bytes().as_ref());
                }
            }
        }
    }
}

/// Manual jog path: forward a control-plane JSON message to the link.
/// Intended for use while the sorter is idle; its completion signal is
/// consumed like any other.
fn forward_manual(link: &mut crate::link::LinkHandle, payload: &[u8]) {
    match serde_json::from_slice::<ControlMessage>(payload) {
        Ok(ControlMessage::Coords { x, y }) => {
            if let Err(e) = link.send_coords(x, y) {
                warn!("manual move failed: {}", e);
            }
        }
        Ok(ControlMessage::Grip { state }) => {
            if let Err(e) = link.send_grip(state == GripState::On) {
                warn!("manual grip failed: {}", e);
            }
        }
        Err(e) => warn!("Failed to parse control message: {}", e),
    }
}
