mod cli;

use kino::{config, server};
use kino_av::{FfprobeProber, MediaInfo, Prober, ToolPaths};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over the config file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting Kino server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!(
        media_root = %config.media.root.display(),
        max_sessions = config.transcoding.max_sessions,
        hardware = ?config.transcoding.hardware,
        "Transcoding configured"
    );

    let ctx = server::AppContext::from_config(config)?;
    tracing::debug!(
        ffmpeg = %ctx.tools.ffmpeg.display(),
        ffprobe = %ctx.tools.ffprobe.display(),
        "Resolved tools"
    );

    server::start_server(ctx).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "kino=trace,kino_av=trace,kino_common=debug,tower_http=debug".to_string()
        } else {
            "kino=debug,kino_av=debug,kino_common=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => probe_file(&file, json, cli.config.as_deref()),
        Commands::CheckTools => check_tools(),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("kino {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolPaths::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );
    let prober = FfprobeProber::new(tools.ffprobe);

    let rt = tokio::runtime::Runtime::new()?;
    let media_info = rt.block_on(prober.probe(file))?;

    if json {
        let json_str = serde_json::to_string_pretty(&media_info)?;
        println!("{}", json_str);
    } else {
        print_media_info(file, &media_info);
    }

    Ok(())
}

fn print_media_info(file: &Path, media_info: &MediaInfo) {
    println!("File: {}", file.display());
    let secs = media_info.duration as u64;
    let mins = secs / 60;
    let hours = mins / 60;
    println!("Duration: {:02}:{:02}:{:02}", hours, mins % 60, secs % 60);
    if let Some(rate) = media_info.bit_rate {
        println!("Bitrate: {} kb/s", rate / 1000);
    }

    println!("\nVideo Tracks: {}", media_info.video_tracks.len());
    for track in &media_info.video_tracks {
        print!("  [{}] {} {}x{}", track.index, track.codec, track.width, track.height);
        if let Some(rate) = track.bit_rate {
            print!(", {} kb/s", rate / 1000);
        }
        println!();
    }

    println!("\nAudio Tracks: {}", media_info.audio_tracks.len());
    for track in &media_info.audio_tracks {
        print!("  [{}] {} {}ch", track.index, track.codec, track.channels);
        if !track.lang.is_empty() {
            print!(" ({})", track.lang);
        }
        if !track.title.is_empty() {
            print!(" \"{}\"", track.title);
        }
        println!();
    }

    println!("\nSubtitle Tracks: {}", media_info.subtitle_tracks.len());
    for track in &media_info.subtitle_tracks {
        print!("  [{}] {}", track.index, track.codec);
        if !track.lang.is_empty() {
            print!(" ({})", track.lang);
        }
        if track.bitmap {
            print!(" [bitmap]");
        }
        println!();
    }
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let tools = kino_av::check_tools();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Streaming needs both ffmpeg and ffprobe.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            let transcoding = &config.transcoding;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Media root: {}", config.media.root.display());
            println!("  Hardware: {:?}", transcoding.hardware);
            println!("  Max sessions: {}", transcoding.max_sessions);
            println!("  Segment duration: {}s", transcoding.segment_duration);
            println!("  Idle timeout: {}s", transcoding.idle_timeout_secs);
            println!("  Profiles: {}", transcoding.profiles.len());
            for profile in &transcoding.profiles {
                println!("    {}", profile.name);
            }
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Media root: {}", config.media.root.display());
        }
    }

    Ok(())
}
