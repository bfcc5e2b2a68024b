// Coordinated two-joint interpolation
//
// Joint 2 is mechanically linked to joint 1: its commanded angle is its own
// desired angle plus joint 1's. Both joints follow an eased interpolation
// sized so the slower-required joint dictates the pace and both arrive
// together. The grabber motor is driven proportionally to joint 2's motion
// to compensate the mechanical coupling.

use std::f64::consts::PI;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::{CONTROL_HZ, SETTLE_PAUSE};
use crate::controller::grabber::Grabber;
use crate::controller::motor::{Actuator, Result};
use crate::controller::servo::JointServo;

/// Half-sine ease: zero slope at both ends, so joint velocity ramps in and
/// out without discontinuities.
pub fn smooth_step(progress: f64) -> f64 {
    (-PI / 2.0 + progress * PI).sin() / 2.0 + 0.5
}

/// Overall move duration in seconds: the joint needing more time dictates
/// the pace.
pub fn move_duration(distance1: f64, max_speed1: f64, distance2: f64, max_speed2: f64) -> f64 {
    (distance1.abs() / max_speed1).max(distance2.abs() / max_speed2)
}

/// Drive both joints to absolute link angles (degrees), arriving
/// simultaneously. Blocks for the whole move plus a settling pause.
pub fn coordinated_move<A, B, C>(
    j1: &mut JointServo<A>,
    j2: &mut JointServo<B>,
    grabber: &mut Grabber<C>,
    angle1: f64,
    angle2: f64,
) -> Result<()>
where
    A: Actuator,
    B: Actuator,
    C: Actuator,
{
    // Joint 2 rides on joint 1's rotation
    let angle2 = angle2 + angle1;

    let start1 = j1.link_position()?;
    let start2 = j2.link_position()?;
    let distance1 = angle1 - start1;
    let distance2 = angle2 - start2;

    let duration = move_duration(distance1, j1.max_speed(), distance2, j2.max_speed());
    debug!(
        distance1,
        distance2, duration, "starting coordinated move"
    );

    let tick = Duration::from_millis(1000 / CONTROL_HZ);
    let start_time = Instant::now();

    // Already at the target; skip straight to the settle pause
    while duration > 0.0 && start_time.elapsed().as_secs_f64() <= duration {
        let progress = smooth_step(start_time.elapsed().as_secs_f64() / duration);

        j1.set_link_target(start1 + distance1 * progress);
        j2.set_link_target(start2 + distance2 * progress);

        j1.update()?;
        j2.update()?;
        grabber.compensate(j2.commanded_speed() / j2.gear_ratio())?;

        sleep(tick);
    }

    j1.stop()?;
    j2.stop()?;
    grabber.stop()?;
    sleep(SETTLE_PAUSE);
    Ok(())
}
