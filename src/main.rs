//! tsh: a tiny job-control shell.
//!
//! Runs programs in their own process groups, in the foreground or (with a
//! trailing `&`) in the background. Ctrl-C and Ctrl-Z go to the foreground
//! job; `jobs`, `fg`, `bg` and `quit` are builtin.
//!
//! Logging: `-v` turns on debug diagnostics; `RUST_LOG` overrides.

use std::io::{stdin, stdout, Write};

use clap::Parser;
use nix::unistd::dup2;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, ShellError};
use crate::shell::Shell;

mod builtins;
mod error;
mod executor;
mod job;
mod parser;
mod shell;
mod signals;

const PROMPT: &str = "tsh> ";

#[derive(Parser, Debug)]
#[command(name = "tsh", about = "A tiny shell with job control")]
struct Cli {
    /// Print additional diagnostic information
    #[arg(short, long)]
    verbose: bool,

    /// Do not emit a command prompt (handy for scripted input)
    #[arg(short = 'p', long = "no-prompt")]
    no_prompt: bool,
}

fn main() {
    let cli = Cli::parse();

    // One pipe carries everything, so a driver sees errors in order.
    if let Err(e) = dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) {
        println!("dup2 error: {}", e);
        std::process::exit(1);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "tsh=debug" } else { "tsh=warn" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = run(&cli) {
        println!("{}", e);
        let _ = stdout().flush();
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    signals::install()?;
    let mut shell = Shell::new();
    let mut input = String::new();

    loop {
        shell.drain()?;
        if !cli.no_prompt {
            create_prompt();
        }

        input.clear();
        if stdin().read_line(&mut input).map_err(ShellError::Input)? == 0 {
            // end of input
            let _ = stdout().flush();
            return Ok(());
        }

        // catch up on anything that happened while we sat in read
        shell.drain()?;
        match shell.eval(&input) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => println!("{}", e),
        }
        let _ = stdout().flush();
    }
}

fn create_prompt() {
    print!("{}", PROMPT);
    if stdout().flush().is_err() {
        tracing::warn!("error flushing prompt");
    }
}
