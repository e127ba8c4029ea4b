//! CLI argument parsing using clap

use super::settings::ScaleKind;
use crate::video::TargetFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// emuout - emulator audio and video output adapter
///
/// Drives an emulation core and delivers its sample bursts and frames to host devices
#[derive(Parser, Debug)]
#[command(name = "emuout")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    /// Settings file (default: emuout.toml beside the executable, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the built-in pattern core through both pipelines
    Run {
        /// Stop after this many frames
        #[arg(short, long)]
        frames: Option<u64>,

        /// Frame limiter rate (0 = paced by audio only)
        #[arg(long)]
        fps: Option<u32>,

        /// Disable audio output
        #[arg(long)]
        no_audio: bool,

        /// Disable video output
        #[arg(long)]
        no_video: bool,

        /// Deliver mono samples from the core
        #[arg(long)]
        mono: bool,

        /// Do not hold periods for their play time
        #[arg(long)]
        free_run: bool,

        /// Write played PCM to a file
        #[arg(long)]
        pcm_out: Option<PathBuf>,

        /// Scaling algorithm
        #[arg(long, value_enum)]
        scale: Option<ScaleKind>,

        /// Framebuffer pixel format
        #[arg(long, value_parser = parse_format)]
        format: Option<TargetFormat>,
    },

    /// Show derived buffer sizes and frame geometry
    Info,

    /// Print a sample settings file
    Config {
        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_format(value: &str) -> Result<TargetFormat, String> {
    match value {
        "rgb565" => Ok(TargetFormat::Rgb565),
        "rgb565-be" => Ok(TargetFormat::Rgb565Be),
        "xrgb8888" => Ok(TargetFormat::Xrgb8888),
        other => Err(format!(
            "unknown format '{}' (expected rgb565, rgb565-be or xrgb8888)",
            other
        )),
    }
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.quiet {
            Some(tracing::Level::ERROR)
        } else {
            match self.verbose {
                0 => None,
                1 => Some(tracing::Level::DEBUG),
                _ => Some(tracing::Level::TRACE),
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Run {
            frames: None,
            fps: None,
            no_audio: false,
            no_video: false,
            mono: false,
            free_run: false,
            pcm_out: None,
            scale: None,
            format: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_overrides() {
        let args = Args::try_parse_from([
            "emuout", "-vv", "run", "--frames", "120", "--mono", "--scale", "bilinear",
            "--format", "rgb565-be",
        ])
        .unwrap();
        assert_eq!(args.log_level(), Some(tracing::Level::TRACE));

        match args.command {
            Some(Command::Run {
                frames,
                mono,
                scale,
                format,
                ..
            }) => {
                assert_eq!(frames, Some(120));
                assert!(mono);
                assert_eq!(scale, Some(ScaleKind::Bilinear));
                assert_eq!(format, Some(TargetFormat::Rgb565Be));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_level_defaults_to_settings() {
        let args = Args::try_parse_from(["emuout", "info"]).unwrap();
        assert_eq!(args.log_level(), None);
        let args = Args::try_parse_from(["emuout", "-q", "info"]).unwrap();
        assert_eq!(args.log_level(), Some(tracing::Level::ERROR));
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Args::try_parse_from(["emuout", "run", "--format", "yuv"]).is_err());
    }
}
