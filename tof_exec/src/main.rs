//! # ToF Executable
//!
//! Runs the time-of-flight sensor pipeline on the robot:
//! - Reads frames from the sensor board over SPI
//! - Converts them into point cloud scans
//! - Optionally saves each scan into the session archive
//!
//! Single key commands are read from the console, see [`comms_if::tc::TofTc::from_key`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::mpsc::{self, Sender, TryRecvError},
    thread,
    time::Duration,
};
use structopt::StructOpt;

// Internal
use comms_if::tc::TofTc;
use tof_lib::{
    cloud::scan::Scan, params::TofExecParams, pipeline::TofPipeline, spi_driver::spidev,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    maths::ang32_to_deg,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Sleep between two iterations of the main loop.
const MAIN_LOOP_SLEEP: Duration = Duration::from_millis(10);

/// Saved cloud numbers wrap around after this many files.
const NUM_CLOUD_FILES: u32 = 100_000;

const PROMPT: &str = "tof $ ";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "tof_exec", about = "Time-of-flight sensor acquisition and point clouds")]
struct Opts {
    /// Parameter file, relative to `$TOF_SW_ROOT/params`
    #[structopt(long, default_value = "tof_exec.toml")]
    params: String,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("tof_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Info, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("ToF Executable\n");
    info!(
        "Running on: {}",
        host::get_uname()
            .wrap_err("Failed to get host information")?
            .nodename
    );
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: TofExecParams = util::params::load(&opts.params)
        .wrap_err_with(|| format!("Failed to load parameters from {}", opts.params))?;

    info!("Parameters loaded");

    // ---- PIPELINE INITIALISATION ----

    let spi_params = params.spi.clone();
    let mut pipeline = TofPipeline::start(move || spidev::open(&spi_params), &params)
        .wrap_err("Failed to start the ToF pipeline")?;

    let clouds_dir = session.arch_root.join("clouds");
    if params.save_clouds {
        fs::create_dir_all(&clouds_dir).wrap_err("Failed to create the clouds directory")?;
        info!("Saving point clouds to {:?}", clouds_dir);
    }

    // ---- CONSOLE INITIALISATION ----

    let (tc_tx, tc_rx) = mpsc::channel();
    thread::Builder::new()
        .name("console".into())
        .spawn(move || console(tc_tx))
        .wrap_err("Failed to start the console")?;

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering main loop");

    let mut cloud_num = 0;

    'main: loop {
        loop {
            match tc_rx.try_recv() {
                Ok(tc) => {
                    if pipeline.handle_tc(tc) {
                        break 'main;
                    }
                }
                Err(TryRecvError::Disconnected) => break 'main,
                Err(TryRecvError::Empty) => break,
            }
        }

        while let Some(scan) = pipeline.try_get_completed_scan() {
            info!(
                "Scan {}: {} points, pose = ({}, {}, {:.1} deg), {} dropped",
                scan.seq,
                scan.points.len(),
                scan.robot_pose.x,
                scan.robot_pose.y,
                ang32_to_deg(scan.robot_pose.ang),
                pipeline.scans_dropped()
            );

            if params.save_clouds {
                if let Err(e) = save_cloud(&clouds_dir, cloud_num, &scan) {
                    warn!("Could not save point cloud {}: {}", cloud_num, e);
                }
                cloud_num = (cloud_num + 1) % NUM_CLOUD_FILES;
            }
        }

        thread::sleep(MAIN_LOOP_SLEEP);
    }

    info!("Shutting down");

    pipeline.join().wrap_err("Failed to stop the ToF pipeline")?;

    info!("End of execution");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read operator commands from the console until it is closed or a quit command is entered.
fn console(tc_tx: Sender<TofTc>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            warn!("No console available, commands disabled: {}", e);
            return;
        }
    };

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                tc_tx.send(TofTc::Quit).ok();
                return;
            }
            Err(e) => {
                warn!("Console error: {}", e);
                tc_tx.send(TofTc::Quit).ok();
                return;
            }
        };

        rl.add_history_entry(line.as_str()).ok();

        let tcs = match TofTc::parse_line(&line) {
            Ok(t) => t,
            Err(e) => {
                warn!("Invalid command: {}", e);
                continue;
            }
        };

        for tc in tcs {
            if tc_tx.send(tc).is_err() || tc == TofTc::Quit {
                return;
            }
        }
    }
}

/// Write a scan's points as `cloudNNNNN.xyz`, one `x -y z` line per point.
fn save_cloud(dir: &Path, num: u32, scan: &Scan) -> io::Result<PathBuf> {
    let path = dir.join(format!("cloud{:05}.xyz", num));
    let mut file = BufWriter::new(File::create(&path)?);

    for p in scan.points.iter() {
        writeln!(file, "{} {} {}", p.x, -p.y, p.z)?;
    }
    file.flush()?;

    info!("Saved {} points to {:?}", scan.points.len(), path);

    Ok(path)
}
