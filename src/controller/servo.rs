// Joint servo: closed-loop position control of one geared joint
//
// Targets are link-space degrees scaled by the gear ratio into encoder
// counts. Each update tick runs the PID against the current position, clamps
// the output and commands the motor at that speed.

use crate::config::{MAX_PID_OUTPUT, PID_KD, PID_KI, PID_KP};
use crate::controller::motor::{Actuator, Result};
use crate::controller::pid::Pid;

pub struct JointServo<A: Actuator> {
    motor: A,
    pid: Pid,
    /// Encoder counts per link degree
    ratio: f64,
    /// Maximum link speed in deg/s, dictates trajectory pacing
    max_speed: f64,
    max_output: f64,
    /// Encoder count treated as link zero
    reference: i32,
    /// Target position in counts relative to the reference
    target: f64,
    /// Last commanded speed (counts/s), exposed for coupling compensation
    commanded: f64,
}

impl<A: Actuator> JointServo<A> {
    pub fn new(mut motor: A, ratio: f64, max_speed: f64) -> Result<Self> {
        let reference = motor.position()?;
        Ok(Self {
            motor,
            pid: Pid::new(PID_KP, PID_KI, PID_KD),
            ratio,
            max_speed,
            max_output: MAX_PID_OUTPUT,
            reference,
            target: 0.0,
            commanded: 0.0,
        })
    }

    /// Re-zero the link position at the current encoder count.
    pub fn reset_reference(&mut self) -> Result<()> {
        self.reference = self.motor.position()?;
        Ok(())
    }

    /// Position in counts relative to the reference
    pub fn position(&mut self) -> Result<i32> {
        Ok(self.motor.position()? - self.reference)
    }

    /// Position in link degrees
    pub fn link_position(&mut self) -> Result<f64> {
        Ok(self.position()? as f64 / self.ratio)
    }

    /// Set the target in link degrees.
    pub fn set_link_target(&mut self, degrees: f64) {
        self.target = degrees * self.ratio;
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn gear_ratio(&self) -> f64 {
        self.ratio
    }

    /// Commanded speed from the last update, in counts/s
    pub fn commanded_speed(&self) -> f64 {
        self.commanded
    }

    /// One control tick: PID toward the target, clamp, command the motor.
    pub fn update(&mut self) -> Result<()> {
        let pos = self.position()? as f64;
        let output = self.pid.compute(self.target, pos);
        let clamped = output.clamp(-self.max_output, self.max_output);
        self.commanded = clamped;
        if clamped != 0.0 {
            self.motor.run(clamped)?;
        } else {
            self.motor.stop()?;
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.commanded = 0.0;
        self.pid.reset();
        self.motor.stop()
    }

    /// Power the joint off entirely (shutdown only).
    pub fn off(&mut self) -> Result<()> {
        self.commanded = 0.0;
        self.motor.off()
    }
}
