use std::net::TcpListener;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sortarm_runtime::config::{
    CONTROLLER_ADDR, J1_GEAR_RATIO, J1_MAX_SPEED, J2_GEAR_RATIO, J2_MAX_SPEED,
};
use sortarm_runtime::controller::{Controller, Grabber, GrabberConfig, JointServo, SimMotor};
use sortarm_runtime::runtime::{self, HostOptions};

#[derive(Parser)]
#[command(about = "Camera-guided cylinder sorting runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host side: vision, sorting coordinator, control plane
    Host {
        /// Controller address (host:port)
        #[arg(long, default_value = CONTROLLER_ADDR)]
        controller: String,
        /// Static background reference image
        #[arg(long)]
        background: PathBuf,
        /// Directory of frames to replay
        #[arg(long)]
        frames: PathBuf,
        /// JSON file with fixed marker pixel positions
        #[arg(long)]
        markers: Option<PathBuf>,
    },
    /// Run the motion controller with simulated motors
    Controller {
        #[arg(long, default_value = "0.0.0.0:1234")]
        listen: String,
    },
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Host {
            controller,
            background,
            frames,
            markers,
        } => {
            runtime::run(HostOptions {
                controller_addr: controller,
                background,
                frames,
                markers,
            })
            .await
        }
        Commands::Controller { listen } => run_controller(listen).await,
    };

    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run_controller(listen: String) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // The control loop is synchronous by design: one command at a time,
    // nothing preempts an in-flight trajectory
    tokio::task::spawn_blocking(move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&listen)?;
        let mut controller = Controller::new(
            JointServo::new(SimMotor::new(), J1_GEAR_RATIO, J1_MAX_SPEED)?,
            JointServo::new(SimMotor::new(), J2_GEAR_RATIO, J2_MAX_SPEED)?,
            Grabber::new(SimMotor::new(), GrabberConfig::default()),
        );
        sortarm_runtime::controller::serve(listener, &mut controller)?;
        Ok(())
    })
    .await?
}
