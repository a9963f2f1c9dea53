//! `duobot` – starts the robot.
//!
//! 1. Loads `~/.duobot/config.toml` (or the stock defaults when absent).
//! 2. Builds the configured pin backend, the controllers and the command
//!    dispatcher.
//! 3. Serves the arm and chassis endpoints until **Ctrl-C**, which forces the
//!    chassis to a stop before exiting.
//!
//! `duobot init` writes the stock configuration to the config path so it can
//! be edited.

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use duobot_cli::{config, hardware, telemetry};
use duobot_kernel::CommandDispatcher;
use duobot_server::CommandServer;
use duobot_types::RoverError;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    telemetry::init_tracing();
    print_banner();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let outcome = match args.first().map(String::as_str) {
        None | Some("run") => run().await,
        Some("init") => init_config(),
        Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            eprintln!("{} unknown command '{other}'", "error:".bold().red());
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "duobot exited with an error");
            eprintln!("{} {e}", "error:".bold().red());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), RoverError> {
    let cfg = config::load_or_default()?;
    info!(
        backend = %cfg.hardware.backend,
        path = %config::config_path().display(),
        "configuration loaded"
    );

    let pins = hardware::build(&cfg.hardware, &cfg.arm)?;
    let dispatcher = Arc::new(CommandDispatcher::from_hardware(
        pins,
        &cfg.arm,
        cfg.motion,
        cfg.hardware.drive.pwm_frequency_hz,
        cfg.avoidance,
    )?);

    let server = CommandServer::new(Arc::clone(&dispatcher))
        .with_bind(cfg.server.bind)
        .with_ports(cfg.server.arm_port, cfg.server.chassis_port);

    println!(
        "  {} arm on :{}, chassis on :{}  {}",
        "Serving".bold().green(),
        cfg.server.arm_port,
        cfg.server.chassis_port,
        "(Ctrl-C to stop)".dimmed()
    );

    tokio::select! {
        served = server.run() => {
            if let Err(e) = dispatcher.emergency_stop().await {
                warn!(error = %e, "could not stop the chassis after server exit");
            }
            served
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Ctrl-C listener failed");
            }
            println!();
            println!("{}", "Ctrl-C received – stopping the chassis.".yellow().bold());
            dispatcher.emergency_stop().await
        }
    }
}

fn init_config() -> Result<(), RoverError> {
    if let Some(existing) = config::load()? {
        let path = config::config_path();
        println!(
            "  {} {} already exists (backend {})",
            "Skipped:".yellow().bold(),
            path.display(),
            existing.hardware.backend
        );
        return Ok(());
    }
    let path = config::save(&config::Config::default())?;
    println!("  {} {}", "Wrote".green().bold(), path.display());
    Ok(())
}

fn print_usage() {
    println!("  {}", "Usage:".bold());
    println!("    duobot [run]   serve the arm and chassis endpoints");
    println!("    duobot init    write the stock configuration file");
    println!();
    println!("  {}", "Environment:".bold());
    println!("    DUOBOT_CONFIG, DUOBOT_BIND, DUOBOT_ARM_PORT, DUOBOT_CHASSIS_PORT,");
    println!("    DUOBOT_BACKEND, DUOBOT_LOG_FORMAT=json, RUST_LOG");
    println!();
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___            ___       _   "#.bold().cyan());
    println!("{}", r#"  / _ \__ _____  / _ )___  | |_ "#.bold().cyan());
    println!("{}", r#" / // / // / _ \/ _  / _ \ |  _|"#.bold().cyan());
    println!("{}", r#"/____/\_,_/\___/____/\___/  \__|"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "DuoBot".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Two-device robot controller");
    println!();
}
