// Line-protocol command server
//
// One persistent connection, newline-delimited text commands, one reply per
// command. The control loop is strictly synchronous: each command runs to
// its natural termination before the next is read, and nothing preempts an
// in-flight trajectory. SHUTDOWN is the only exit path; execution faults
// become an `ERROR:` reply and the loop keeps accepting commands.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

use tracing::{error, info, warn};

use crate::controller::grabber::Grabber;
use crate::controller::motor::{Actuator, MotorError};
use crate::controller::servo::JointServo;
use crate::controller::trajectory::coordinated_move;

/// A parsed host command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Absolute link angles for both joints, degrees
    Motor { angle1: f64, angle2: f64 },
    /// true = grip, false = release
    Grabber(bool),
    Shutdown,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProtocolError {
    // Reply text kept verbatim from the deployed controller
    #[error("Wrong grabber state")]
    BadGrabberState,

    #[error("malformed {0} command")]
    Malformed(&'static str),

    #[error("unknown command: {0}")]
    Unknown(String),
}

/// Parse one command line. Unknown keywords get an explicit rejection
/// instead of silence, so the caller never waits on a reply that will not
/// come.
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("MOTOR") => {
            let angle1 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(ProtocolError::Malformed("MOTOR"))?;
            let angle2 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(ProtocolError::Malformed("MOTOR"))?;
            Ok(Command::Motor { angle1, angle2 })
        }
        Some("GRABBER") => match parts.next() {
            Some("on") => Ok(Command::Grabber(true)),
            Some("off") => Ok(Command::Grabber(false)),
            _ => Err(ProtocolError::BadGrabberState),
        },
        Some("SHUTDOWN") => Ok(Command::Shutdown),
        Some(other) => Err(ProtocolError::Unknown(other.to_string())),
        None => Err(ProtocolError::Unknown(String::new())),
    }
}

/// The physical execution layer: two linked joints and the grabber.
pub struct Controller<A: Actuator, B: Actuator, C: Actuator> {
    pub joint1: JointServo<A>,
    pub joint2: JointServo<B>,
    pub grabber: Grabber<C>,
}

impl<A: Actuator, B: Actuator, C: Actuator> Controller<A, B, C> {
    pub fn new(joint1: JointServo<A>, joint2: JointServo<B>, grabber: Grabber<C>) -> Self {
        Self {
            joint1,
            joint2,
            grabber,
        }
    }

    /// Execute one command to completion. Returns true when the controller
    /// should shut down. A fault can abort mid-command with motors still
    /// commanded; everything is stopped before the fault is reported.
    fn execute(&mut self, command: Command) -> Result<bool, MotorError> {
        let result = self.run_command(command);
        if result.is_err() {
            let _ = self.joint1.stop();
            let _ = self.joint2.stop();
            let _ = self.grabber.stop();
        }
        result
    }

    fn run_command(&mut self, command: Command) -> Result<bool, MotorError> {
        match command {
            Command::Motor { angle1, angle2 } => {
                coordinated_move(
                    &mut self.joint1,
                    &mut self.joint2,
                    &mut self.grabber,
                    angle1,
                    angle2,
                )?;
                Ok(false)
            }
            Command::Grabber(true) => {
                self.grabber.grab()?;
                Ok(false)
            }
            Command::Grabber(false) => {
                self.grabber.release()?;
                Ok(false)
            }
            Command::Shutdown => {
                info!("shutdown: homing joints and relaxing grabber");
                coordinated_move(
                    &mut self.joint1,
                    &mut self.joint2,
                    &mut self.grabber,
                    0.0,
                    0.0,
                )?;
                self.joint1.off()?;
                self.joint2.off()?;
                self.grabber.relax()?;
                self.grabber.off()?;
                Ok(true)
            }
        }
    }
}

/// Serve one host connection to completion. Blocks the calling thread for
/// the lifetime of the connection.
pub fn serve<A, B, C>(
    listener: TcpListener,
    controller: &mut Controller<A, B, C>,
) -> std::io::Result<()>
where
    A: Actuator,
    B: Actuator,
    C: Actuator,
{
    info!("controller listening on {}", listener.local_addr()?);
    let (stream, peer) = listener.accept()?;
    info!("host connected from {}", peer);

    handle_connection(stream, controller)
}

fn handle_connection<A, B, C>(
    mut stream: TcpStream,
    controller: &mut Controller<A, B, C>,
) -> std::io::Result<()>
where
    A: Actuator,
    B: Actuator,
    C: Actuator,
{
    stream.write_all(b"Motor Control Starting\n")?;

    // Open the claw to a known state before accepting commands
    if let Err(e) = controller.grabber.release() {
        error!("initial grabber release failed: {}", e);
        stream.write_all(format!("ERROR: {}\n", e).as_bytes())?;
        return Ok(());
    }

    stream.write_all(b"RDY\n")?;

    let reader = BufReader::new(stream.try_clone()?);
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let reply = match parse_command(trimmed) {
            Ok(command) => {
                let is_shutdown = command == Command::Shutdown;
                match controller.execute(command) {
                    Ok(done) => {
                        if done {
                            stream.write_all(b"OK\n")?;
                            info!("shutdown complete, closing connection");
                            return Ok(());
                        }
                        "OK\n".to_string()
                    }
                    Err(e) => {
                        error!("execution fault: {}", e);
                        let reply = format!("ERROR: {}\n", e);
                        if is_shutdown {
                            // Faults during shutdown still terminate the loop
                            stream.write_all(reply.as_bytes())?;
                            return Ok(());
                        }
                        reply
                    }
                }
            }
            Err(ProtocolError::BadGrabberState) => {
                warn!("rejected grabber command: {:?}", trimmed);
                "Wrong grabber state\n".to_string()
            }
            Err(e) => {
                warn!("rejected command {:?}: {}", trimmed, e);
                format!("ERROR: {}\n", e)
            }
        };

        stream.write_all(reply.as_bytes())?;
    }

    info!("host disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::grabber::GrabberConfig;
    use crate::controller::motor::SimMotor;
    use std::io::{BufRead, BufReader, Write};
    use std::time::Duration;

    #[test]
    fn parse_motor_command() {
        assert_eq!(
            parse_command("MOTOR 12.50 -30.00"),
            Ok(Command::Motor {
                angle1: 12.5,
                angle2: -30.0
            })
        );
        assert_eq!(
            parse_command("MOTOR 12.5"),
            Err(ProtocolError::Malformed("MOTOR"))
        );
        assert_eq!(
            parse_command("MOTOR x y"),
            Err(ProtocolError::Malformed("MOTOR"))
        );
    }

    #[test]
    fn parse_grabber_command() {
        assert_eq!(parse_command("GRABBER on"), Ok(Command::Grabber(true)));
        assert_eq!(parse_command("GRABBER off"), Ok(Command::Grabber(false)));
        assert_eq!(
            parse_command("GRABBER maybe"),
            Err(ProtocolError::BadGrabberState)
        );
        assert_eq!(parse_command("GRABBER"), Err(ProtocolError::BadGrabberState));
    }

    #[test]
    fn parse_shutdown_and_unknown() {
        assert_eq!(parse_command("SHUTDOWN"), Ok(Command::Shutdown));
        assert!(matches!(
            parse_command("JUMP 1 2"),
            Err(ProtocolError::Unknown(_))
        ));
    }

    use crate::controller::motor::Result as MotorResult;
    use std::sync::{Arc, Mutex};

    /// Accepts every drive command but faults on speed readback
    struct FaultyMotor {
        stopped: Arc<Mutex<bool>>,
    }

    impl FaultyMotor {
        fn new() -> (Self, Arc<Mutex<bool>>) {
            let stopped = Arc::new(Mutex::new(false));
            (
                Self {
                    stopped: stopped.clone(),
                },
                stopped,
            )
        }
    }

    impl Actuator for FaultyMotor {
        fn position(&mut self) -> MotorResult<i32> {
            Ok(0)
        }

        fn speed(&mut self) -> MotorResult<f64> {
            Err(MotorError::Fault("speed sensor offline".into()))
        }

        fn run(&mut self, _speed: f64) -> MotorResult<()> {
            Ok(())
        }

        fn run_duty(&mut self, _duty: f64) -> MotorResult<()> {
            *self.stopped.lock().unwrap() = false;
            Ok(())
        }

        fn run_rotations(&mut self, _speed: f64, _rotations: f64) -> MotorResult<()> {
            Ok(())
        }

        fn stop(&mut self) -> MotorResult<()> {
            *self.stopped.lock().unwrap() = true;
            Ok(())
        }

        fn off(&mut self) -> MotorResult<()> {
            Ok(())
        }
    }

    #[test]
    fn fault_mid_command_stops_all_motors() {
        let (m1, j1_stopped) = FaultyMotor::new();
        let (m2, j2_stopped) = FaultyMotor::new();
        let (m3, grabber_stopped) = FaultyMotor::new();
        let mut controller = Controller::new(
            JointServo::new(m1, 7.0, 50.0).unwrap(),
            JointServo::new(m2, 5.0, 70.0).unwrap(),
            Grabber::new(
                m3,
                GrabberConfig {
                    sample_interval: Duration::ZERO,
                    settle_pause: Duration::ZERO,
                    ..GrabberConfig::default()
                },
            ),
        );

        // The grabber drive starts, then the first speed sample faults
        assert!(controller.execute(Command::Grabber(true)).is_err());
        assert!(*grabber_stopped.lock().unwrap());
        assert!(*j1_stopped.lock().unwrap());
        assert!(*j2_stopped.lock().unwrap());
    }

    fn sim_controller() -> Controller<SimMotor, SimMotor, SimMotor> {
        let fast = GrabberConfig {
            sample_interval: Duration::ZERO,
            settle_pause: Duration::ZERO,
            ..GrabberConfig::default()
        };
        Controller::new(
            JointServo::new(SimMotor::new(), 7.0, 50.0).unwrap(),
            JointServo::new(SimMotor::new(), 5.0, 70.0).unwrap(),
            Grabber::new(SimMotor::new(), fast),
        )
    }

    #[test]
    fn one_reply_per_command_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let mut controller = sim_controller();
            serve(listener, &mut controller).unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut lines = BufReader::new(stream).lines();

        // Banner lines until the ready handshake
        loop {
            let line = lines.next().unwrap().unwrap();
            if line == "RDY" {
                break;
            }
        }

        writer.write_all(b"MOTOR 1.0 1.0\n").unwrap();
        assert_eq!(lines.next().unwrap().unwrap(), "OK");

        writer.write_all(b"GRABBER on\n").unwrap();
        assert_eq!(lines.next().unwrap().unwrap(), "OK");

        writer.write_all(b"GRABBER sideways\n").unwrap();
        assert_eq!(lines.next().unwrap().unwrap(), "Wrong grabber state");

        writer.write_all(b"WIGGLE\n").unwrap();
        let reply = lines.next().unwrap().unwrap();
        assert!(reply.starts_with("ERROR:"), "got {reply:?}");

        writer.write_all(b"SHUTDOWN\n").unwrap();
        assert_eq!(lines.next().unwrap().unwrap(), "OK");

        server.join().unwrap();
    }
}
