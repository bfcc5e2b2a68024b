// Actuator seam over the physical motors
//
// The servo, trajectory and grabber layers talk to this trait; hardware
// bindings and the simulated motor both implement it. Speeds are in native
// encoder counts per second, duty in percent.

use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("motor io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("motor fault: {0}")]
    Fault(String),
}

pub type Result<T> = std::result::Result<T, MotorError>;

pub trait Actuator: Send {
    /// Raw encoder position in counts
    fn position(&mut self) -> Result<i32>;

    /// Measured speed in counts per second
    fn speed(&mut self) -> Result<f64>;

    /// Closed-loop speed command
    fn run(&mut self, speed: f64) -> Result<()>;

    /// Open-loop duty-cycle drive in percent
    fn run_duty(&mut self, duty: f64) -> Result<()>;

    /// Blocking relative move, used only by the grabber de-tension path
    fn run_rotations(&mut self, speed: f64, rotations: f64) -> Result<()>;

    /// Brake
    fn stop(&mut self) -> Result<()>;

    /// Power off (coast)
    fn off(&mut self) -> Result<()>;
}

/// First-order simulated motor: tracks commanded speed exactly and
/// integrates position over wall time. Duty drive reports a decaying speed
/// so stall detection terminates, mimicking a grabber meeting resistance.
pub struct SimMotor {
    position: f64,
    commanded: f64,
    duty_active: bool,
    duty_samples: u32,
    last_update: Instant,
    counts_per_rotation: f64,
    /// Encoder counts/s produced per unit of commanded speed (speed commands
    /// are in percent-like native units, roughly 10 counts/s each)
    speed_scale: f64,
}

impl SimMotor {
    /// Duty-mode speed starts here and decays per sample
    const DUTY_SPEED_BASE: f64 = 400.0;
    const DUTY_SPEED_DECAY: f64 = 80.0;

    pub fn new() -> Self {
        Self {
            position: 0.0,
            commanded: 0.0,
            duty_active: false,
            duty_samples: 0,
            last_update: Instant::now(),
            counts_per_rotation: 360.0,
            speed_scale: 10.0,
        }
    }

    fn integrate(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.position += self.commanded * self.speed_scale * dt;
        self.last_update = now;
    }
}

impl Default for SimMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl Actuator for SimMotor {
    fn position(&mut self) -> Result<i32> {
        self.integrate();
        Ok(self.position.round() as i32)
    }

    fn speed(&mut self) -> Result<f64> {
        if self.duty_active {
            let speed = (Self::DUTY_SPEED_BASE - Self::DUTY_SPEED_DECAY * self.duty_samples as f64)
                .max(0.0);
            self.duty_samples += 1;
            Ok(speed)
        } else {
            Ok(self.commanded)
        }
    }

    fn run(&mut self, speed: f64) -> Result<()> {
        self.integrate();
        self.commanded = speed;
        self.duty_active = false;
        Ok(())
    }

    fn run_duty(&mut self, duty: f64) -> Result<()> {
        self.integrate();
        self.commanded = duty.signum() * Self::DUTY_SPEED_BASE;
        self.duty_active = true;
        self.duty_samples = 0;
        Ok(())
    }

    fn run_rotations(&mut self, _speed: f64, rotations: f64) -> Result<()> {
        self.integrate();
        self.position += rotations * self.counts_per_rotation;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.integrate();
        self.commanded = 0.0;
        self.duty_active = false;
        Ok(())
    }

    fn off(&mut self) -> Result<()> {
        self.stop()
    }
}
