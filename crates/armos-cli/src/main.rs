//! `armos-cli` – ArmOS Command Line Interface
//!
//! This binary is the ignition switch for the arm controller.  It:
//!
//! 1. Loads `~/.armos/config.toml`; runs a short **First-Run Wizard** and
//!    writes defaults when the file is absent.
//! 2. Composes the hardware: serial link (handshake must succeed), range
//!    poller (UDP range feed for fire-and-forget firmware, link requests for
//!    acknowledged firmware) and UDP detection feed, or their simulated
//!    stand-ins.
//! 3. Starts the **reflex unit** on its own thread and the **intent unit** on
//!    a Tokio runtime, connected by the task channel.
//! 4. Drops the operator into the **REPL**.
//! 5. On `/quit` or **Ctrl-C** raises the shutdown flag; the reflex unit
//!    drives the arm home and releases the link before the process exits.

mod config;
mod model_server;
mod repl;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use armos_hal::link::handshake;
use armos_hal::sim::{SimLink, SimPerception, SimRange};
use armos_hal::{
    AcknowledgedLink, ActuatorLink, FireAndForgetLink, LinkRangeSensor, PerceptionSource,
    RangeCell, RangePoller, RangeSensor, SerialTransport, SharedTransport, UdpDetectionFeed,
    UdpRangeFeed,
};
use armos_perception::IkSolver;
use armos_runtime::{
    ChannelUtterances, IntentUnit, LlmDriver, LlmIntentParser, ReflexUnit, StatusBoard,
    TaskExecutor, init_tracing, task_channel,
};
use armos_types::ArmError;
use config::{Config, LinkMode};

fn main() -> ExitCode {
    // Held for the whole process; dropping it flushes exported spans.
    let _telemetry = init_tracing("armos");

    print_banner();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "fatal:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), ArmError> {
    let cfg = load_config()?;
    cfg.validate().map_err(ArmError::InvalidConfig)?;
    print_summary(&cfg);

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – homing the arm and shutting down …".yellow().bold());
        shutdown_ctrlc.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to stop the arm safely");
    }

    // Built before any thread is spawned so a failure leaves nothing behind.
    let runtime = tokio::runtime::Runtime::new()?;

    // ── Hardware ──────────────────────────────────────────────────────────
    let hardware = if cfg.simulate {
        compose_sim(&cfg, shutdown.clone())?
    } else {
        compose_serial(&cfg, shutdown.clone())?
    };

    // ── Reflex unit ───────────────────────────────────────────────────────
    let (tasks_tx, tasks_rx) = task_channel::channel();
    let executor = TaskExecutor::new(
        cfg.geometry.clone(),
        hardware.link,
        hardware.perception,
        hardware.range,
        tasks_rx,
    )
    .inspect_err(|_| shutdown.store(true, Ordering::SeqCst))?
    .with_timings(cfg.timings());

    let status = StatusBoard::new();
    let reflex = ReflexUnit::spawn(executor, cfg.control_hz, shutdown.clone(), status.clone())
        .inspect_err(|_| shutdown.store(true, Ordering::SeqCst))?;

    // ── Intent unit ───────────────────────────────────────────────────────
    check_model_server(&cfg);
    let (utterance_tx, utterances) = ChannelUtterances::channel(16);
    let driver = LlmDriver::new(cfg.llm_url.clone(), cfg.model.clone()).with_api_key(cfg.api_key.clone());
    let intent = IntentUnit::new(
        Box::new(utterances),
        Box::new(LlmIntentParser::new(driver)),
        tasks_tx,
        shutdown.clone(),
    );
    runtime.spawn(intent.run());

    // ── REPL ──────────────────────────────────────────────────────────────
    println!(
        "  Type {} for a list of commands.\n",
        "/help".bold().cyan()
    );
    // On its own thread so Ctrl-C is honoured while stdin is blocked.
    let repl_shutdown = shutdown.clone();
    let repl_status = status.clone();
    let repl = std::thread::Builder::new()
        .name("repl".to_string())
        .spawn(move || repl::run(utterance_tx, repl_status, repl_shutdown));
    if let Err(e) = &repl {
        warn!(error = %e, "could not start the console; waiting for Ctrl-C");
    }

    while !shutdown.load(Ordering::SeqCst) {
        if repl.as_ref().is_ok_and(|h| h.is_finished()) || reflex.is_finished() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    shutdown.store(true, Ordering::SeqCst);

    // ── Shutdown ──────────────────────────────────────────────────────────
    reflex.join();
    if let Some(poller) = hardware.poller {
        poller.join();
    }
    // The intent unit may be parked on the console channel; drop it.
    runtime.shutdown_timeout(Duration::from_secs(1));

    let final_state = status.snapshot();
    info!(state = final_state.task.label(), ticks = final_state.ticks, "armos stopped");
    println!("{}", "  ✓ Arm homed and link released.".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> Result<Config, ArmError> {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            Ok(cfg)
        }
        Ok(None) => {
            let mut cfg = run_first_run_wizard();
            config::apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
        Err(e) => Err(ArmError::InvalidConfig(e)),
    }
}

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        ArmOS First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Press Enter to accept a default.\n");

    let mut cfg = Config::default();

    cfg.serial_port = prompt_line(
        &format!("  Serial port [{}]: ", cfg.serial_port),
        &cfg.serial_port,
    );

    println!("  Link mode:");
    println!("    1) Fire-and-forget packets  (default)");
    println!("    2) Acknowledged commands");
    if prompt_line("  Enter choice [1]: ", "1") == "2" {
        cfg.link_mode = LinkMode::Acknowledged;
    }

    cfg.llm_url = prompt_line(
        &format!("  Language model server [{}]: ", cfg.llm_url),
        &cfg.llm_url,
    );

    let simulate = prompt_line("  Run without hardware (simulation)? [y/N]: ", "n");
    cfg.simulate = simulate.eq_ignore_ascii_case("y") || simulate.eq_ignore_ascii_case("yes");

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Composition
// ─────────────────────────────────────────────────────────────────────────────

/// Collaborators handed to the executor, plus the threads feeding them.
struct Hardware {
    link: Box<dyn ActuatorLink>,
    perception: Box<dyn PerceptionSource>,
    range: Box<dyn RangeSensor>,
    poller: Option<RangePoller>,
}

fn compose_serial(cfg: &Config, shutdown: Arc<AtomicBool>) -> Result<Hardware, ArmError> {
    print!("  Opening {} at {} baud … ", cfg.serial_port.bold(), cfg.baud_rate);
    flush_stdout();
    let port = SerialTransport::open(&cfg.serial_port, cfg.baud_rate)?;
    let transport = SharedTransport::new(port);
    println!("{}", "OK".green());

    print!("  Waiting for controller ({} s max) … ", cfg.handshake_timeout().as_secs());
    flush_stdout();
    handshake(&transport, cfg.handshake_settle(), cfg.handshake_timeout())?;
    println!("{}", "Ready".green());

    let (link, range) = serial_collaborators(cfg, transport)?;

    let perception = UdpDetectionFeed::bind(
        &format!("0.0.0.0:{}", cfg.detection_port),
        cfg.detection_max_age(),
    )?;
    println!("  Detections on UDP {}", cfg.detection_port.to_string().bold());

    let cell = RangeCell::new();
    let poller = RangePoller::spawn(range, cell.clone(), cfg.range_poll_period(), shutdown)?;

    Ok(Hardware {
        link,
        perception: Box::new(perception),
        range: Box::new(cell),
        poller: Some(poller),
    })
}

/// Servo link and range source for the configured firmware.
///
/// Fire-and-forget firmware parses nothing but 4-byte servo packets, so its
/// range readings arrive over UDP and never share the servo wire.
fn serial_collaborators(
    cfg: &Config,
    transport: SharedTransport,
) -> Result<(Box<dyn ActuatorLink>, Box<dyn RangeSensor>), ArmError> {
    match cfg.link_mode {
        LinkMode::FireAndForget => {
            let range =
                UdpRangeFeed::bind(&format!("0.0.0.0:{}", cfg.range_port), cfg.range_max_age())?;
            println!("  Range readings on UDP {}", cfg.range_port.to_string().bold());
            Ok((Box::new(FireAndForgetLink::new(transport)), Box::new(range)))
        }
        LinkMode::Acknowledged => Ok((
            Box::new(AcknowledgedLink::new(transport.clone())),
            Box::new(LinkRangeSensor::new(transport)),
        )),
    }
}

fn compose_sim(cfg: &Config, shutdown: Arc<AtomicBool>) -> Result<Hardware, ArmError> {
    println!("  {} no serial or camera traffic", "Simulation:".yellow().bold());

    let perception = SimPerception::new();
    let [px, py] = cfg.sim.pixel;
    perception.push_object(&cfg.sim.object, px, py, 0.9);
    let range = SimRange::new();
    range.push(cfg.sim.range_cm);

    // Same polling path as the hardware sensor.
    let cell = RangeCell::new();
    let poller = RangePoller::spawn(Box::new(range), cell.clone(), cfg.range_poll_period(), shutdown)?;

    Ok(Hardware {
        link: Box::new(SimLink::new()),
        perception: Box::new(perception),
        range: Box::new(cell),
        poller: Some(poller),
    })
}

fn check_model_server(cfg: &Config) {
    print!("  Checking model server at {} … ", cfg.llm_url.dimmed());
    flush_stdout();
    match model_server::list_models(&cfg.llm_url, &cfg.api_key) {
        Ok(models) if model_server::has_model(&models, &cfg.model) => {
            println!("{} (model {} available)", "online".green(), cfg.model.bold());
        }
        Ok(models) => {
            println!("{}", "online".green());
            println!(
                "  {} model {} not among {} offered; spoken requests will fail.",
                "Warning:".yellow(),
                cfg.model.bold(),
                models.len()
            );
        }
        Err(e) => {
            println!("{}", "offline".yellow());
            println!("  {}", e.dimmed());
            println!("  Slash commands still work; spoken requests need a model server.");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ___                 ____  _____"#.bold().cyan());
    println!("{}", r#"   /   |  _________ ___/ __ \/ ___/"#.bold().cyan());
    println!("{}", r#"  / /| | / ___/ __ `__ \ / / /\__ \ "#.bold().cyan());
    println!("{}", r#" / ___ |/ /  / / / / / / /_/ /___/ /"#.bold().cyan());
    println!("{}", r#"/_/  |_/_/  /_/ /_/ /_/\____//____/ "#.bold().cyan());
    println!();
    println!("  {} {}",
        "ArmOS".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Voice-driven pick-and-place controller");
    println!();
}

fn print_summary(cfg: &Config) {
    let solver = IkSolver::from_geometry(&cfg.geometry);
    println!(
        "  Arm reach {:.1}–{:.1} cm, control loop {} Hz, link {}",
        solver.min_reach(),
        solver.max_reach(),
        cfg.control_hz,
        cfg.link_mode.to_string().bold()
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn flush_stdout() {
    use std::io::Write;
    std::io::stdout().flush().ok();
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::BufRead;
    print!("{}", msg);
    flush_stdout();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
