use std::fs;
use std::io::{self, BufRead, Read};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use ghosttype::config::EngineConfig;
use ghosttype::emitter::{self, EmitterBackend, KeystrokeEmitter, PreviewEmitter};
use ghosttype::keyboard::{byte_index_to_line_col, find_first_unsupported_char};
use ghosttype::report::SessionStats;
use ghosttype::{
    Engine, EngineOptions, SessionObserver, SessionState, SpeedProfile, TypingRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Auto,
    Wayland,
    X11,
}

impl BackendArg {
    fn to_library(self) -> EmitterBackend {
        match self {
            BackendArg::Auto => EmitterBackend::Auto,
            BackendArg::Wayland => EmitterBackend::Wayland,
            BackendArg::X11 => EmitterBackend::X11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProfileArg {
    /// 120-250 ms per character.
    Slow,
    /// 60-140 ms per character.
    Normal,
    /// 30-80 ms per character.
    Fast,
    /// Requires --min-delay-ms and --max-delay-ms.
    Custom,
}

impl ProfileArg {
    fn to_library(self) -> SpeedProfile {
        match self {
            ProfileArg::Slow => SpeedProfile::Slow,
            ProfileArg::Normal => SpeedProfile::Normal,
            ProfileArg::Fast => SpeedProfile::Fast,
            ProfileArg::Custom => SpeedProfile::Custom,
        }
    }
}

#[derive(Debug, Args, Clone)]
struct SessionArgs {
    /// Input text file, or '-' for stdin
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Speed preset.
    #[arg(long, value_enum, default_value_t = ProfileArg::Normal)]
    profile: ProfileArg,

    /// Override the preset's minimum per-character delay.
    #[arg(long, value_name = "MS")]
    min_delay_ms: Option<f64>,

    /// Override the preset's maximum per-character delay.
    #[arg(long, value_name = "MS")]
    max_delay_ms: Option<f64>,

    /// Typo probability per character (0.0-1.0).
    ///
    /// Set to 0 for straight-through typing.
    #[arg(long, default_value_t = 0.02)]
    typo_rate: f64,

    /// Pause for the maximum delay every N characters (0 disables).
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pause_frequency: i64,

    /// Delayed corrections, hesitations and filler phrases that are typed then deleted.
    #[arg(long)]
    advanced: bool,

    /// Optional RNG seed (for debugging)
    #[arg(long)]
    seed: Option<u64>,

    /// JSON engine config (behavior tuning, filler endpoint, log path).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Append the session log line here instead of the default location.
    #[arg(long, value_name = "PATH")]
    session_log: Option<PathBuf>,

    /// Do not write a session log line.
    #[arg(long, conflicts_with = "session_log")]
    no_session_log: bool,

    /// Filler phrase endpoint (overrides config and GHOSTTYPE_FILLER_ENDPOINT).
    #[arg(long, value_name = "URL")]
    filler_endpoint: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "ghosttype")]
#[command(about = "Type text into the focused window like a person would", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Type the input into the currently focused window
    Type {
        /// Keystroke backend.
        ///
        /// - auto: choose a backend based on the runtime environment
        /// - wayland: force Wayland (virtual keyboard)
        /// - x11: force X11 (XTEST)
        #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
        backend: BackendArg,

        /// Wayland seat name to attach the virtual keyboard to (e.g. seat0, seat1).
        #[arg(long, value_name = "NAME")]
        seat: Option<String>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Run a session against an in-memory buffer and print the result
    Preview {
        /// Print the visible text after every keystroke.
        #[arg(long)]
        live: bool,

        #[command(flatten)]
        session: SessionArgs,
    },
}

fn read_input(path: &PathBuf) -> Result<String> {
    if is_stdin(path) {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }

    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn is_stdin(path: &PathBuf) -> bool {
    path.as_os_str() == std::ffi::OsStr::new("-")
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_config(args: &SessionArgs) -> Result<EngineConfig> {
    let mut cfg = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(path) = &args.session_log {
        cfg.session_log = Some(path.clone());
    }
    if let Some(endpoint) = &args.filler_endpoint {
        cfg.filler.endpoint = Some(endpoint.clone());
    }
    Ok(cfg)
}

fn build_request(
    args: &SessionArgs,
    text: String,
    cfg: &EngineConfig,
    preview_only: bool,
) -> Result<TypingRequest> {
    let speed = args.profile.to_library();
    let mut builder = TypingRequest::builder(text)
        .speed(speed)
        .typo_rate(args.typo_rate)
        .pause_frequency(args.pause_frequency)
        .preview_only(preview_only)
        .advanced_anti_detect(args.advanced)
        .seed(args.seed)
        .behavior(cfg.behavior.clone());

    if args.min_delay_ms.is_some() || args.max_delay_ms.is_some() {
        let (preset_min, preset_max) = speed
            .delay_range_ms()
            .map(|(lo, hi)| (lo as f64, hi as f64))
            .unwrap_or((f64::NAN, f64::NAN));
        let min = args.min_delay_ms.unwrap_or(preset_min);
        let max = args.max_delay_ms.unwrap_or(preset_max);
        if min.is_nan() || max.is_nan() {
            return Err(anyhow!(
                "--profile custom requires both --min-delay-ms and --max-delay-ms"
            ));
        }
        builder = builder.delay_range_ms(min, max);
    }

    Ok(builder.build()?)
}

fn ensure_typeable(text: &str) -> Result<()> {
    if let Some((idx, c)) = find_first_unsupported_char(text) {
        let (line, col) = byte_index_to_line_col(text, idx);
        return Err(anyhow!(
            "unsupported character {c:?} at line {line}, column {col} (only US-QWERTY ASCII can be typed)"
        ));
    }
    Ok(())
}

fn print_status_line(line: &str) {
    const RESET: &str = "\x1b[0m";
    const TYPING: &str = "\x1b[34m";
    const IDLE: &str = "\x1b[33m";
    const FAILED: &str = "\x1b[31m";

    let color = if line.starts_with("Typing") || line.starts_with("Done") {
        TYPING
    } else if line.starts_with("Failed") {
        FAILED
    } else if line.starts_with("Thinking")
        || line.starts_with("Taking a break")
        || line.starts_with("Paused")
    {
        IDLE
    } else {
        ""
    };

    if color.is_empty() {
        eprintln!("{line}");
    } else {
        eprintln!("{color}{line}{RESET}");
    }
}

struct ConsoleObserver {
    live_preview: bool,
}

impl SessionObserver for ConsoleObserver {
    fn on_status(&mut self, message: &str) {
        print_status_line(message);
    }

    fn on_preview(&mut self, visible_text: &str) {
        if self.live_preview {
            eprintln!("| {}", visible_text.replace('\n', "\u{23ce}"));
        }
    }

    fn on_complete(&mut self, stats: &SessionStats, profile: &str) {
        eprintln!(
            "Typed {} chars, {} words in {:.1}s ({} WPM, {} typos, profile {profile})",
            stats.chars_emitted, stats.words_typed, stats.duration, stats.wpm, stats.typos_injected
        );
    }
}

/// Each line on stdin toggles pause; `q` stops.
fn spawn_stdin_controls(token: ghosttype::CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("ghosttype-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    token.stop();
                    break;
                }
                token.toggle_pause();
            }
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "stdin controls unavailable");
    }
}

fn run_session(
    args: &SessionArgs,
    text: String,
    emitter: Box<dyn KeystrokeEmitter>,
    preview_only: bool,
    live_preview: bool,
) -> Result<String> {
    let cfg = load_config(args)?;
    let request = build_request(args, text, &cfg, preview_only)?;

    let mut options = EngineOptions::from_config(&cfg);
    if args.no_session_log {
        options.session_log = None;
    }
    let mut engine = Engine::new(options);

    let session = engine.start(request, emitter)?;
    {
        let token = session.handle.cancellation_token();
        ctrlc::set_handler(move || token.stop())
            .context("failed to install Ctrl+C handler")?;
    }
    if !is_stdin(&args.input) {
        eprintln!("Focus the target window. Press Enter to pause/resume, q+Enter or Ctrl+C to stop.");
        spawn_stdin_controls(session.handle.cancellation_token());
    }

    let mut observer = ConsoleObserver { live_preview };
    for event in session.events.iter() {
        event.dispatch(&mut observer);
    }

    let outcome = engine
        .join()
        .ok_or_else(|| anyhow!("session worker exited unexpectedly"))?;

    match outcome.state {
        SessionState::Failed => Err(outcome
            .error
            .map(anyhow::Error::from)
            .unwrap_or_else(|| anyhow!("session failed"))),
        _ => Ok(outcome.visible_text),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Type {
            backend,
            seat,
            session,
        } => {
            // Fail fast on unsupported environments/backends.
            emitter::preflight_backend(backend.to_library(), seat.as_deref())?;

            let text = read_input(&session.input)?;
            ensure_typeable(&text)?;

            let emitter = emitter::open_emitter(backend.to_library(), seat.as_deref())?;
            run_session(&session, text, emitter, false, false)?;
        }
        Command::Preview { live, session } => {
            let text = read_input(&session.input)?;
            let emitter = PreviewEmitter::new();
            let buffer = emitter.buffer();

            let visible = run_session(&session, text, Box::new(emitter), true, live)?;
            if visible != buffer.text() {
                tracing::warn!("preview buffer and session mirror disagree");
            }
            println!("{visible}");
        }
    }

    Ok(())
}
