// Cadences, thresholds, geometry and motor configuration
use std::time::Duration;

// Coordinator poll interval while idle
pub const IDLE_POLL: Duration = Duration::from_secs(1);

// Vision cadence (in frames)
pub const DETECT_EVERY_N_FRAMES: u64 = 10;
pub const CALIBRATE_EVERY_N_FRAMES: u64 = 30;

// Zenoh topics
pub const TOPIC_CMD_COORDS: &str = "sortarm/cmd/coords"; // manual jog commands
pub const TOPIC_CMD_GRIP: &str = "sortarm/cmd/grip"; // manual grip commands
pub const TOPIC_HEALTH: &str = "sortarm/state/health"; // runtime health summary

// Controller link
pub const CONTROLLER_ADDR: &str = "10.42.0.3:1234";

// Fiducial markers: id -> world coordinate (cm)
pub const MARKER_WORLD_COORDS: [(u32, (f64, f64)); 4] = [
    (0, (-10.0, 10.0)),
    (1, (10.0, 10.0)),
    (2, (-10.0, -10.0)),
    (3, (10.0, -10.0)),
];

// Drop-off slots per color, ordered by allocation preference
pub const GREY_SLOTS: [(f64, f64); 3] = [(-18.0, -6.0), (-14.0, -11.0), (-8.0, -16.0)];
pub const BLACK_SLOTS: [(f64, f64); 3] = [(18.0, -6.0), (14.0, -11.0), (9.0, -13.0)];

// Detection thresholds
pub const DIFF_THRESHOLD: u8 = 30;
pub const MIN_CONTOUR_POINTS: usize = 5;
pub const MIN_AXIS: f64 = 40.0;
pub const MAX_AXIS: f64 = 85.0;
pub const ASPECT_RATIO_MIN: f64 = 0.5;
pub const ASPECT_RATIO_MAX: f64 = 2.0;
pub const MERGE_DISTANCE: f64 = 40.0;
pub const BLACK_THRESHOLD: f64 = -110.0;
pub const GREY_THRESHOLD: f64 = -50.0;

// World-space exclusion rectangle around the robot base
pub const EXCLUSION_X: (f64, f64) = (-10.0, 10.0);
pub const EXCLUSION_Y: (f64, f64) = (-10.0, 10.0);

// Tracking hysteresis
pub const SEEN_THRESHOLD: u32 = 3;
pub const MISSED_THRESHOLD: u32 = 10;
pub const IDENTITY_TOLERANCE: f64 = 1.0;
pub const SLOT_MATCH_TOLERANCE: f64 = 1.5;

// Arm geometry (cm) and joint limits (degrees)
pub const LINK_1: f64 = 11.3;
pub const LINK_2: f64 = 6.8;
pub const END_OFFSET: f64 = 6.0;
pub const J1_LIMIT: f64 = 150.0;
pub const J2_LIMIT: f64 = 90.0;

// Arm park position between sorting cycles (world cm)
pub const HOME_POSITION: (f64, f64) = (6.0, 18.1);

// Joint servo configuration
pub const PID_KP: f64 = 1.1;
pub const PID_KI: f64 = 0.0;
pub const PID_KD: f64 = 0.1;
pub const MAX_PID_OUTPUT: f64 = 100.0;

pub const J1_MAX_SPEED: f64 = 50.0; // deg/s at the link
pub const J1_GEAR_RATIO: f64 = 7.0;
pub const J2_MAX_SPEED: f64 = 70.0;
pub const J2_GEAR_RATIO: f64 = 5.0;

// Trajectory control loop
pub const CONTROL_HZ: u64 = 100;
pub const SETTLE_PAUSE: Duration = Duration::from_millis(200);

// Grabber: stall detection tuned separately for closing and opening
pub const GRAB_DUTY: f64 = 40.0;
pub const GRAB_SPEED_FLOOR: f64 = 230.0;
pub const GRAB_SPEED_DROP: f64 = 60.0;
pub const RELEASE_DUTY: f64 = -40.0;
pub const RELEASE_SPEED_FLOOR: f64 = 210.0;
pub const RELEASE_SPEED_DROP: f64 = 25.0;
pub const GRABBER_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
pub const RELAX_SPEED: f64 = 35.0;
pub const RELAX_ROTATIONS: f64 = 1.0;
