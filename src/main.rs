//! ptyterm - run a command under a pseudo-terminal and print the screen
//!
//! A headless driver for the library: spawns the configured program,
//! feeds its output through the terminal model until it exits, then
//! prints the final screen contents and exits with the child's code.
//!
//! ```text
//! ptyterm                      # run the configured (or platform) shell
//! ptyterm ls -la               # run a specific command
//! ptyterm --config my.toml     # use an explicit config file
//! ```

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ptyterm::{TerminalConfig, TerminalSession};

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct CliArgs {
    config_path: Option<PathBuf>,
    command: Vec<String>,
}

fn print_help() {
    eprintln!("ptyterm {} - run a command under a pseudo-terminal", VERSION);
    eprintln!();
    eprintln!("Usage: ptyterm [OPTIONS] [PROGRAM [ARGS...]]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <FILE>   Read configuration from FILE");
    eprintln!("  -v, --version     Show version");
    eprintln!("  -h, --help        Show this help");
    eprintln!();
    eprintln!("Without a PROGRAM the configured shell is used.");
    eprintln!("Configuration: ~/.ptyterm/config.toml");
}

fn parse_args() -> Result<CliArgs, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut parsed = CliArgs {
        config_path: None,
        command: Vec::new(),
    };
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                eprintln!("ptyterm {}", VERSION);
                std::process::exit(0);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing config file argument".to_string());
                }
                parsed.config_path = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            _ => {
                // First non-flag argument starts the command.
                parsed.command.extend(args[i..].iter().cloned());
                break;
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(2);
        }
    };

    let mut config = match &args.config_path {
        Some(path) => TerminalConfig::load_or_default(path),
        None => TerminalConfig::load(),
    };
    if !args.command.is_empty() {
        config.program = args.command[0].clone();
        config.args = args.command[1..].to_vec();
    }

    info!(program = %config.program, rows = config.rows, cols = config.cols, "starting");

    let mut session = TerminalSession::new(
        config.rows,
        config.cols,
        config.theme,
        config.scrollback_limit,
    );
    let spec = config.spawn_spec();
    if !session.start(&spec) {
        anyhow::bail!("failed to start {}", config.program);
    }

    while session.is_running() {
        #[cfg(unix)]
        session.wait_readable(50);
        #[cfg(windows)]
        std::thread::sleep(std::time::Duration::from_millis(10));
        session.process_output();
    }

    let mut screen = String::new();
    for row in 0..session.term().rows() {
        screen.push_str(&session.term().row_text(row));
        screen.push('\n');
    }
    print!("{}", screen.trim_end_matches('\n'));
    println!();

    let code = session.exit_code().context("child exit code unavailable")?;
    info!(code, "child exited");
    std::process::exit(code);
}
