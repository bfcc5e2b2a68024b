// Grabber control without a force sensor
//
// The grabber motor is driven open-loop at a fixed duty while its speed is
// sampled on a fixed cadence. Contact is inferred from the speed: a hard
// stall (speed under an absolute floor) or a sharp drop between consecutive
// samples stops the drive. Closing and opening carry different mechanical
// loads, so each direction has its own duty, floor and drop thresholds.

use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{
    GRAB_DUTY, GRAB_SPEED_DROP, GRAB_SPEED_FLOOR, GRABBER_SAMPLE_INTERVAL, RELAX_ROTATIONS,
    RELAX_SPEED, RELEASE_DUTY, RELEASE_SPEED_DROP, RELEASE_SPEED_FLOOR, SETTLE_PAUSE,
};
use crate::controller::motor::{Actuator, Result};

#[derive(Debug, Clone)]
pub struct GrabberConfig {
    pub grab_duty: f64,
    pub grab_floor: f64,
    pub grab_drop: f64,
    pub release_duty: f64,
    pub release_floor: f64,
    pub release_drop: f64,
    pub sample_interval: Duration,
    pub settle_pause: Duration,
    pub relax_speed: f64,
    pub relax_rotations: f64,
}

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            grab_duty: GRAB_DUTY,
            grab_floor: GRAB_SPEED_FLOOR,
            grab_drop: GRAB_SPEED_DROP,
            release_duty: RELEASE_DUTY,
            release_floor: RELEASE_SPEED_FLOOR,
            release_drop: RELEASE_SPEED_DROP,
            sample_interval: GRABBER_SAMPLE_INTERVAL,
            settle_pause: SETTLE_PAUSE,
            relax_speed: RELAX_SPEED,
            relax_rotations: RELAX_ROTATIONS,
        }
    }
}

pub struct Grabber<A: Actuator> {
    motor: A,
    config: GrabberConfig,
}

impl<A: Actuator> Grabber<A> {
    pub fn new(motor: A, config: GrabberConfig) -> Self {
        Self { motor, config }
    }

    /// Close onto an object; blocks until the stall condition fires.
    pub fn grab(&mut self) -> Result<()> {
        info!("grabbing");
        let (duty, floor, drop) = (
            self.config.grab_duty,
            self.config.grab_floor,
            self.config.grab_drop,
        );
        self.drive_until_stall(duty, floor, drop)
    }

    /// Open the claw; blocks until the stall condition fires.
    pub fn release(&mut self) -> Result<()> {
        info!("releasing");
        let (duty, floor, drop) = (
            self.config.release_duty,
            self.config.release_floor,
            self.config.release_drop,
        );
        self.drive_until_stall(duty, floor, drop)
    }

    /// Shutdown only: release and spin further to fully de-tension the
    /// mechanism.
    pub fn relax(&mut self) -> Result<()> {
        self.release()?;
        self.motor
            .run_rotations(self.config.relax_speed, self.config.relax_rotations)?;
        sleep(self.config.settle_pause);
        self.motor.stop()
    }

    /// Drive at a speed proportional to joint 2's motion (mechanical
    /// coupling compensation during coordinated moves).
    pub fn compensate(&mut self, speed: f64) -> Result<()> {
        if speed != 0.0 {
            self.motor.run(speed)
        } else {
            self.motor.stop()
        }
    }

    pub fn stop(&mut self) -> Result<()> {
        self.motor.stop()
    }

    pub fn off(&mut self) -> Result<()> {
        self.motor.off()
    }

    fn drive_until_stall(&mut self, duty: f64, floor: f64, drop: f64) -> Result<()> {
        self.motor.run_duty(duty)?;

        let mut prev_speed: Option<f64> = None;
        loop {
            sleep(self.config.sample_interval);
            let speed = self.motor.speed()?.abs();
            debug!(speed, "grabber sample");

            if stalled(prev_speed, speed, floor, drop) {
                self.motor.stop()?;
                break;
            }
            prev_speed = Some(speed);
        }

        sleep(self.config.settle_pause);
        Ok(())
    }
}

/// Stall condition: speed under the absolute floor, or a drop between
/// consecutive samples sharper than the threshold.
pub fn stalled(prev_speed: Option<f64>, speed: f64, floor: f64, drop: f64) -> bool {
    prev_speed.is_some_and(|prev| prev - speed > drop) || speed < floor
}
