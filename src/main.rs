//! emuout - emulator output adapter CLI

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use emuout::audio::{AudioConfig, AudioRepacketizer, ChannelAudioOutput, ChannelLayout, PcmSink};
use emuout::config::{Args, Command, Settings};
use emuout::driver::{
    DriverCommand, DriverConfig, DriverLoop, EmulationCore, PatternCore, VideoPipeline,
    CALLBACK_ABI_VERSION,
};
use emuout::video::{FrameCompositor, MemoryFramebuffer, SOURCE_HEIGHT, SOURCE_WIDTH};

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_default()?,
    };

    // Initialize logging
    init_logging(&args, &settings)?;

    // Execute command
    match args.command.clone().unwrap_or_default() {
        Command::Run {
            frames,
            fps,
            no_audio,
            no_video,
            mono,
            free_run,
            pcm_out,
            scale,
            format,
        } => {
            let mut settings = settings;
            if let Some(fps) = fps {
                settings.driver.target_fps = fps;
            }
            settings.audio.enabled &= !no_audio;
            settings.video.enabled &= !no_video;
            if mono {
                settings.audio.source_layout = ChannelLayout::Mono;
            }
            settings.audio.realtime &= !free_run;
            if let Some(path) = pcm_out {
                settings.audio.pcm_file = path.to_string_lossy().to_string();
            }
            if let Some(scale) = scale {
                settings.video.scale = scale;
            }
            if let Some(format) = format {
                settings.video.format = Some(format);
            }
            cmd_run(&settings, frames)
        }
        Command::Info => cmd_info(&settings),
        Command::Config { output } => cmd_config(output),
    }
}

fn init_logging(args: &Args, settings: &Settings) -> Result<()> {
    let level = args
        .log_level()
        .map(|level| level.to_string())
        .unwrap_or_else(|| settings.log_level.clone());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args
        .log
        .clone()
        .or_else(|| (!settings.log_file.is_empty()).then(|| PathBuf::from(&settings.log_file)));

    if let Some(log_file) = log_file {
        let file = File::create(&log_file)
            .with_context(|| format!("Failed to create log file {}", log_file.display()))?;
        subscriber.with_ansi(false).with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Open the playback device and the audio session on top of it
fn open_audio(settings: &Settings, config: AudioConfig) -> emuout::Result<AudioRepacketizer<ChannelAudioOutput>> {
    config.validate()?;

    let sink: Option<PcmSink> = if settings.audio.pcm_file.is_empty() {
        None
    } else {
        let file = File::create(&settings.audio.pcm_file)?;
        info!("Writing PCM to {}", settings.audio.pcm_file);
        Some(Box::new(BufWriter::new(file)))
    };

    let output = ChannelAudioOutput::spawn(config.format.clone(), settings.audio.realtime, sink)?;
    AudioRepacketizer::new(config, output)
}

/// Run the pattern core through both pipelines
fn cmd_run(settings: &Settings, frames: Option<u64>) -> Result<()> {
    println!("emuout {} - pattern core\n", emuout::VERSION);

    let audio_config = settings.to_audio_config();
    let video_config = settings.to_video_config();
    let core = PatternCore::new(
        audio_config.format.sample_rate,
        audio_config.source_layout,
        settings.audio.tone_hz,
    );

    // Ctrl+C asks the driver to shut down after the current frame
    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        let _ = command_tx.send(DriverCommand::Shutdown);
    })
    .context("Failed to install Ctrl+C handler")?;

    let video = if settings.video.enabled {
        let compositor = FrameCompositor::from_config(&video_config);
        let pipeline = MemoryFramebuffer::new(
            video_config.width,
            video_config.height,
            video_config.stride,
            video_config.format,
        )
        .and_then(|framebuffer| VideoPipeline::new(compositor, framebuffer, core.frame_size()));
        match pipeline {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                error!("Video pipeline not started: {}", e);
                None
            }
        }
    } else {
        None
    };

    let driver_config = DriverConfig {
        target_fps: Some(settings.driver.target_fps).filter(|&fps| fps > 0),
        max_frames: frames,
    };
    let mut driver = DriverLoop::new(core, video, command_rx, driver_config)?;
    if settings.audio.enabled {
        driver = driver.with_audio(open_audio(settings, audio_config));
    }

    println!("Running. Press Ctrl+C to stop.\n");
    let stats = driver.run();

    println!("Frames:     {} ({} presented, {} dropped)", stats.frames, stats.frames_presented, stats.frames_dropped);
    if let Some(audio) = stats.audio {
        println!(
            "Audio:      {} periods submitted, {} dropped, {} waits",
            audio.periods_submitted, audio.periods_dropped, audio.waits
        );
    }
    if let Some(pipeline) = driver.video() {
        println!("Video:      {} frames composited", pipeline.compositor().frames());
    }
    println!("Stopped.");

    Ok(())
}

/// Show derived buffer sizes and frame geometry
fn cmd_info(settings: &Settings) -> Result<()> {
    let audio = settings.to_audio_config();
    let video = settings.to_video_config();

    println!("emuout {} (callback ABI {})\n", emuout::VERSION, CALLBACK_ABI_VERSION);

    println!("Audio:");
    println!("  Format:        {}", audio.format);
    println!("  Source:        {:?}", audio.source_layout);
    match audio.validate() {
        Ok(()) => {
            println!("  Period:        {} bytes ({} samples, {:?})", audio.data_size(), audio.period_samples(), audio.period_duration());
            println!("  Buffer:        {} bytes, aligned to {}", audio.buffer_size(), audio.alignment);
            println!("  Queue depth:   {} ({} staging buffers)", audio.queue_depth, audio.queue_depth + 1);
            match audio.wait_timeout {
                Some(timeout) => println!("  Wait timeout:  {:?}", timeout),
                None => println!("  Wait timeout:  none"),
            }
        }
        Err(e) => println!("  Invalid:       {}", e),
    }

    println!("\nVideo:");
    println!("  Source:        {}x{}", SOURCE_WIDTH, SOURCE_HEIGHT);
    println!("  Framebuffer:   {}x{} stride {} ({})", video.width, video.height, video.stride, video.format);
    println!("  Mode:          {}", video.mode);
    let compositor = FrameCompositor::from_config(&video);
    match compositor.plan(SOURCE_WIDTH, SOURCE_HEIGHT, video.stride, video.height) {
        Ok(placement) => println!(
            "  Placement:     {}x{} at x={}",
            placement.width, placement.height, placement.x
        ),
        Err(e) => println!("  Invalid:       {}", e),
    }

    if let Some(path) = Settings::default_path() {
        println!("\nSettings file: {}", path.display());
    }

    Ok(())
}

/// Print or write a sample settings file
fn cmd_config(output: Option<PathBuf>) -> Result<()> {
    let sample = Settings::sample_config();
    match output {
        Some(path) => {
            std::fs::write(&path, sample)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Sample configuration written to {}", path.display());
        }
        None => print!("{}", sample),
    }
    Ok(())
}
