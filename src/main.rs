//! Thin command line surface over the registration pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use image::{ImageBuffer, Luma};
use log::{error, info, LevelFilter};
use ndarray::Array2;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use starstack::pipeline;
use starstack::store::SidecarStore;
use starstack::StarDetector;

#[derive(Parser)]
#[command(name = "starstack", version, about = "Register, align, and stack astrophotography frames")]
struct Cli {
    /// Show per-candidate diagnostics.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect stars and write them to each frame's sidecar.
    Register {
        /// Re-run detection for frames that already have stars.
        #[arg(short = 'f', long)]
        force: bool,
        /// Image files to register.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Align target frames against a reference frame.
    Align {
        /// Frame whose coordinate system the targets are mapped onto.
        reference: PathBuf,
        /// Frames to align.
        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },
    /// Average frames into a single stacked image.
    Stack {
        /// Output image path.
        #[arg(short, long, default_value = "stack.png")]
        output: PathBuf,
        /// Frames to average.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );

    let mut store = SidecarStore;
    match cli.command {
        Command::Register { force, files } => {
            let registered =
                pipeline::register_frames(&mut store, &files, &StarDetector::default(), force);
            info!("registered {registered} of {} frames", files.len());
            ExitCode::SUCCESS
        }
        Command::Align { reference, targets } => {
            match pipeline::align_frames(&mut store, &reference, &targets) {
                Ok(aligned) => {
                    info!("aligned {aligned} of {} frames", targets.len());
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    error!("{err}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Stack { output, files } => match pipeline::stack_frames(&store, &files) {
            Some(mean) => write_stack(&mean, &output),
            None => {
                error!("no frames could be stacked");
                ExitCode::FAILURE
            }
        },
    }
}

/// Write the mean image as a 16-bit grayscale PNG.
fn write_stack(mean: &Array2<f64>, output: &PathBuf) -> ExitCode {
    let (height, width) = mean.dim();
    let buffer = ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let value = mean[[y as usize, x as usize]].clamp(0.0, 1.0);
        Luma([(value * f64::from(u16::MAX)).round() as u16])
    });
    match buffer.save(output) {
        Ok(()) => {
            info!("wrote {}", output.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("failed to write {}: {err}", output.display());
            ExitCode::FAILURE
        }
    }
}
