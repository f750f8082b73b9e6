use std::{env, process::ExitCode};

use stageload::{
    bootstrap::Options,
    cli::{Cli, log_filter},
    console::Console,
};
use tracing_subscriber::EnvFilter;

#[cfg(all(stage1_missing, not(debug_assertions), not(test)))]
compile_error!("no stage-1 loader to bundle, set STAGELOAD_STAGE1 or add firmware/loader.bin");

fn main() -> ExitCode {
    let console = Console::stdio();

    // Usage errors exit with 2, `--help` and `--version` with 0. All of them go to stderr.
    let cli = match Cli::try_from_args(env::args_os()) {
        Ok(cli) => cli,
        Err(err) => {
            console.diag(format_args!("{err}"));
            return ExitCode::from(err.exit_code());
        }
    };
    let options = cli.options();

    init_tracing(options.verbose);

    ExitCode::from(run(&options, console))
}

/// Diagnostics go to stderr, stdout carries only the UDI report.
fn init_tracing(verbose: bool) {
    let directives = env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(log_filter(verbose, &directives))
        .init();
}

#[cfg(all(feature = "serial", target_os = "linux"))]
fn run(options: &Options, console: Console) -> u8 {
    use stageload::{bootstrap::Bootstrap, interrupt::Signals, serial::SerialConnector};

    Bootstrap::new(SerialConnector::default(), Signals, console).run(options)
}

#[cfg(not(all(feature = "serial", target_os = "linux")))]
fn run(_options: &Options, console: Console) -> u8 {
    console.diag(format_args!("No serial port support in this build."));
    stageload::error::EXIT_FAILURE
}
