//! Binary entry point: parse arguments, load configuration, stand up
//! logging, build an [`Instrument`] against simulated device transports, and
//! block on the command server.
//!
//! Real vendor SDK bindings for the frame grabber, filter-wheel HID
//! transport, nudgematic USB-PIO transport, and detector serial channel are
//! out of scope; every device handle constructed here is the
//! `Simulated*` stand-in, the same role `ci2-pyloncxx`/`ci2-vimba` play
//! behind `ci2::Camera` for real Basler/Vimba hardware in `strand-cam`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use liric_server::buffer::Geometry;
use liric_server::config;
use liric_server::detector::SimulatedSerialTransport;
use liric_server::filter_wheel::{FilterWheelDriver, SimulatedFilterWheelTransport};
use liric_server::frame_grabber::SimulatedGrabber;
use liric_server::instrument::Instrument;
use liric_server::logging;
use liric_server::nudgematic::{NudgematicController, SimulatedNudgematicTransport};
use liric_server::server;

/// Sensor geometry of the Raptor Ninox-640 InGaAs array. Not a configuration
/// key: the format-description file a real
/// detector reconfigure loads would carry this, but the simulated transport
/// has no such file to parse.
const SENSOR_GEOMETRY: Geometry = Geometry {
    width: 640,
    height: 512,
};

#[derive(Parser, Debug)]
#[command(name = "liric-server", about = "Instrument-control server for the Liric InGaAs imager")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Parse configuration and construct the instrument, then exit without
    /// starting the command server.
    #[arg(long)]
    dry_run: bool,

    /// Increase log verbosity (stacks: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cfg = config::parse_config_file(&args.config)?;

    if args.verbose > 0 && std::env::var("RUST_LOG").is_err() {
        let level = if args.verbose >= 2 { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }
    let _logging_guard = logging::init(&cfg.logging.directory_name, &cfg.logging.root_log);

    tracing::info!(config_path = %args.config.display(), "liric-server starting");

    let filter_wheel = if cfg.filter_wheel.enable {
        Some(FilterWheelDriver::new(
            &cfg.filter_wheel,
            Box::new(SimulatedFilterWheelTransport::new(1)),
        ))
    } else {
        None
    };

    let nudgematic = if cfg.nudgematic.enable {
        Some(NudgematicController::new(
            &cfg.nudgematic,
            Box::new(SimulatedNudgematicTransport::new(1)),
        ))
    } else {
        None
    };

    let instrument = Instrument::new(
        cfg,
        Box::new(SimulatedGrabber::new(0)),
        SENSOR_GEOMETRY,
        filter_wheel,
        nudgematic,
        Box::new(SimulatedSerialTransport::new(2048)),
    )?;
    let instrument = Arc::new(instrument);

    if args.dry_run {
        tracing::info!("dry run: instrument constructed successfully, not starting server");
        return Ok(());
    }

    {
        let state = Arc::clone(&instrument.state);
        ctrlc::set_handler(move || {
            tracing::info!("signal received, requesting shutdown");
            state.request_shutdown();
        })?;
    }

    server::run(instrument)?;
    Ok(())
}
