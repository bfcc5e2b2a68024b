// Host -> controller command link
//
// One persistent line-oriented connection. Commands go out as `MOTOR`/
// `GRABBER` lines; every reply is consumed by a reader task and mapped to
// exactly one signal for the coordinator (`OK` -> CMP, anything else ->
// UNR). Coordinates are converted to joint angles here; a target the solver
// cannot reach is refused locally and signalled UNR without touching the
// controller. A dropped connection surfaces as `LinkError::NotConnected` on
// the next send, never as a blocked caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::kinematics::ArmSolver;
use crate::messages::Signal;
use crate::sorting::CommandPort;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("not connected to controller")]
    NotConnected,

    #[error("link io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cheap handle for issuing commands over the link. Cloneable; all clones
/// share the connection and the signal queue.
#[derive(Clone)]
pub struct LinkHandle {
    solver: ArmSolver,
    outbound: UnboundedSender<String>,
    signals: UnboundedSender<Signal>,
    connected: Arc<AtomicBool>,
}

impl CommandPort for LinkHandle {
    fn send_coords(&mut self, x: f64, y: f64) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(LinkError::NotConnected);
        }

        let angles = self.solver.solve(x, y);
        if !angles.reachable {
            warn!("target ({:.2}, {:.2}) unreachable, refusing move", x, y);
            // The command is never sent; the UNR takes its signal slot
            let _ = self.signals.send(Signal::Unreachable);
            return Ok(());
        }

        self.send_line(format!("MOTOR {:.2} {:.2}\n", angles.theta1, angles.theta2))
    }

    fn send_grip(&mut self, engaged: bool) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(LinkError::NotConnected);
        }
        let state = if engaged { "on" } else { "off" };
        self.send_line(format!("GRABBER {}\n", state))
    }
}

impl LinkHandle {
    fn send_line(&self, line: String) -> Result<(), LinkError> {
        self.outbound
            .send(line)
            .map_err(|_| LinkError::NotConnected)
    }

    /// Request controller shutdown. The reply is consumed by the reader like
    /// any other, but no coordinator step awaits it.
    pub fn send_shutdown(&self) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(LinkError::NotConnected);
        }
        self.send_line("SHUTDOWN\n".to_string())
    }
}

/// Connect to the controller, wait for its ready handshake, and spawn the
/// writer/reader tasks. Returns the command handle and the signal queue the
/// coordinator consumes.
pub async fn connect(addr: &str) -> Result<(LinkHandle, UnboundedReceiver<Signal>), LinkError> {
    info!("connecting to controller at {}", addr);
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Banner lines precede the handshake and carry no signal
    loop {
        match lines.next_line().await? {
            Some(line) if line == "RDY" => break,
            Some(line) => info!("controller: {}", line),
            None => return Err(LinkError::NotConnected),
        }
    }
    info!("controller ready");

    let connected = Arc::new(AtomicBool::new(true));
    let (outbound_tx, mut outbound_rx) = unbounded_channel::<String>();
    let (signal_tx, signal_rx) = unbounded_channel::<Signal>();

    let writer_connected = connected.clone();
    tokio::spawn(async move {
        while let Some(line) = outbound_rx.recv().await {
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                warn!("link write failed: {}", e);
                writer_connected.store(false, Ordering::Relaxed);
                break;
            }
        }
    });

    let reader_connected = connected.clone();
    let reader_signals = signal_tx.clone();
    tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let signal = if line == "OK" {
                        Signal::Complete
                    } else {
                        warn!("controller reported: {}", line);
                        Signal::Unreachable
                    };
                    if reader_signals.send(signal).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    info!("controller closed the connection");
                    reader_connected.store(false, Ordering::Relaxed);
                    break;
                }
                Err(e) => {
                    warn!("link read failed: {}", e);
                    reader_connected.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
    });

    Ok((
        LinkHandle {
            solver: ArmSolver::deployed(),
            outbound: outbound_tx,
            signals: signal_tx,
            connected,
        },
        signal_rx,
    ))
}
