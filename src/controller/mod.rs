// Embedded motion controller
//
// Provides:
// - An actuator seam over the physical motors (plus a simulated motor)
// - PID position control per geared joint
// - Coordinated two-joint interpolation with grabber coupling compensation
// - Stall-detection grabber control
// - The blocking line-protocol command server

pub mod grabber;
pub mod motor;
pub mod pid;
pub mod servo;
pub mod server;
pub mod trajectory;

pub use grabber::{Grabber, GrabberConfig};
pub use motor::{Actuator, MotorError, SimMotor};
pub use pid::Pid;
pub use servo::JointServo;
pub use server::{parse_command, serve, Command, Controller, ProtocolError};
pub use trajectory::{coordinated_move, move_duration, smooth_step};
