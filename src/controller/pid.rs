// PID position controller
//
// Terms use wall-clock delta time in milliseconds: the integral accumulates
// error * dt, the derivative is (error - prev_error) / dt. The reference
// tuning (kp=1.1, ki=0, kd=0.1) is effectively PD.

use std::time::Instant;

pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    integral: f64,
    prev_error: f64,
    prev_time: Instant,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            prev_error: 0.0,
            prev_time: Instant::now(),
        }
    }

    /// Compute the control output for the current wall-clock tick.
    pub fn compute(&mut self, setpoint: f64, measured: f64) -> f64 {
        let now = Instant::now();
        let dt_ms = now.duration_since(self.prev_time).as_secs_f64() * 1000.0;
        self.prev_time = now;
        self.compute_with_dt(setpoint, measured, dt_ms)
    }

    /// Core update with an explicit time step (milliseconds).
    pub fn compute_with_dt(&mut self, setpoint: f64, measured: f64, dt_ms: f64) -> f64 {
        // The control loop ticks at a fixed rate; a zero dt only happens on
        // pathological timer behavior
        let dt_ms = dt_ms.max(1e-3);

        let error = setpoint - measured;
        self.integral += error * dt_ms;
        let derivative = (error - self.prev_error) / dt_ms;
        self.prev_error = error;

        self.kp * error + self.ki * self.integral + self.kd * derivative
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.prev_time = Instant::now();
    }
}
