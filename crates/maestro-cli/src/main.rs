//! maestro CLI — drive the playback coordinator from a terminal.
//!
//! Commands:
//!   maestro play <loc> [loc...]      Push locations onto the music stack and play
//!   maestro voice <loc>              Play one voice line
//!   maestro sfx <asset> [asset...]   Fire effects and wait for them to finish
//!   maestro durations <loc> [loc...] Print each stack entry's duration
//!   maestro config                   Print the effective configuration
//!
//! A location is `http(s)://…`, `asset:<path>` (under the configured asset
//! root) or a file path. `MAESTRO_CONFIG` points at a JSON config file.

use std::io::Write;
use std::thread;
use std::time::Duration;

use maestro_core::{AudioSource, Maestro, MaestroConfig, PlaybackState};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return;
    }

    let config = match std::env::var("MAESTRO_CONFIG") {
        Ok(path) => MaestroConfig::load_or_default(path),
        Err(_) => MaestroConfig::default(),
    };
    log::debug!("maestro: config {:?}", config);

    let ok = match args[0].as_str() {
        "play" => cmd_play(config, &args[1..]),
        "voice" => cmd_voice(config, &args[1..]),
        "sfx" => cmd_sfx(config, &args[1..]),
        "durations" => cmd_durations(config, &args[1..]),
        "config" => cmd_config(&config),
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
            false
        }
    };

    if !ok {
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_play(config: MaestroConfig, args: &[String]) -> bool {
    if args.is_empty() {
        eprintln!("usage: maestro play <loc> [loc...]");
        return false;
    }
    let maestro = Maestro::native(config);
    let music = maestro.music();

    for location in args {
        if let Err(e) = music.push_audio_source(AudioSource::from_location(location)) {
            eprintln!("{}: {}", location, e);
            return false;
        }
    }
    if let Err(e) = music.play() {
        eprintln!("play failed: {}", e);
        return false;
    }
    if let Err(e) = maestro.start() {
        eprintln!("{}", e);
        return false;
    }

    // Block showing progress until the stack runs out (Ctrl+C exits).
    // With the default `all` loop mode that is never.
    loop {
        thread::sleep(Duration::from_millis(250));
        let state = music.state();
        let label = match music.current_index() {
            Some(i) => args.get(i).map(String::as_str).unwrap_or("?"),
            None => "-",
        };
        print_progress(
            label,
            music.position().unwrap_or_default(),
            music.duration(),
            music.volume(),
        );
        if matches!(state, PlaybackState::Stopped | PlaybackState::Idle) {
            break;
        }
    }
    println!();
    maestro.dispose();
    true
}

fn cmd_voice(config: MaestroConfig, args: &[String]) -> bool {
    let Some(location) = args.first() else {
        eprintln!("usage: maestro voice <loc>");
        return false;
    };
    let maestro = Maestro::native(config);
    let voice = maestro.voice();

    let armed = voice
        .set_audio_source(AudioSource::from_location(location))
        .and_then(|_| voice.play());
    if let Err(e) = armed {
        eprintln!("{}: {}", location, e);
        return false;
    }
    if let Err(e) = maestro.start() {
        eprintln!("{}", e);
        return false;
    }

    while voice.state() == PlaybackState::Playing {
        thread::sleep(Duration::from_millis(250));
        print_progress(
            location,
            voice.position().unwrap_or_default(),
            voice.duration(),
            voice.volume(),
        );
    }
    println!();
    true
}

fn cmd_sfx(config: MaestroConfig, args: &[String]) -> bool {
    if args.is_empty() {
        eprintln!("usage: maestro sfx <asset> [asset...]");
        return false;
    }
    let maestro = Maestro::native(config);
    let vfx = maestro.vfx();

    let mut ok = true;
    for asset in args {
        if let Err(e) = vfx.play_asset(asset) {
            eprintln!("{}: {}", asset, e);
            ok = false;
        }
    }
    while vfx.reap().unwrap_or(0) > 0 {
        thread::sleep(Duration::from_millis(50));
    }
    ok
}

fn cmd_durations(config: MaestroConfig, args: &[String]) -> bool {
    let maestro = Maestro::native(config);
    let music = maestro.music();

    for location in args {
        if let Err(e) = music.push_audio_source(AudioSource::from_location(location)) {
            eprintln!("{}: {}", location, e);
            return false;
        }
    }
    let mut ok = true;
    for (i, location) in args.iter().enumerate() {
        match music.get_track_duration(i) {
            Ok(Some(d)) => println!("{:>3}  {:>6}  {}", i, fmt_time(d), location),
            Ok(None) => println!("{:>3}  {:>6}  {}", i, "?", location),
            Err(e) => {
                eprintln!("{}: {}", location, e);
                ok = false;
            }
        }
    }
    ok
}

fn cmd_config(config: &MaestroConfig) -> bool {
    match serde_json::to_string_pretty(config) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            eprintln!("config: {}", e);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

fn print_progress(label: &str, position: Duration, duration: Option<Duration>, volume: f32) {
    let bar_width = 30;
    let filled = match duration {
        Some(d) if !d.is_zero() => {
            ((position.as_secs_f64() / d.as_secs_f64()).min(1.0) * bar_width as f64) as usize
        }
        _ => 0,
    };
    let empty = bar_width - filled;

    print!(
        "\r  {}  [{}{}] {} / {}  vol: {}%    ",
        label,
        "=".repeat(filled),
        " ".repeat(empty),
        fmt_time(position),
        duration.map(fmt_time).unwrap_or_else(|| "--:--".into()),
        (volume * 100.0).round() as u32,
    );
    std::io::stdout().flush().ok();
}

fn fmt_time(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn print_usage() {
    println!("maestro - playback coordinator CLI");
    println!();
    println!("usage: maestro <command> [args]");
    println!();
    println!("commands:");
    println!("  play <loc> [loc...]       Push onto the music stack and play");
    println!("  voice <loc>               Play one voice line");
    println!("  sfx <asset> [asset...]    Fire effects");
    println!("  durations <loc> [loc...]  Print stack entry durations");
    println!("  config                    Print the effective configuration");
    println!();
    println!("locations: http(s)://..., asset:<path>, or a file path");
    println!("env: MAESTRO_CONFIG=<file.json>, RUST_LOG=maestro_core=debug");
}
