use std::{ffi::OsString, path::PathBuf};

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::{Result, bootstrap::Options};

/// Serial speed of the device's USB bridge.
pub const DEFAULT_SPEED: u32 = 62_500;

/// Load a raw application binary from FILE onto the device and start it.
///
/// An embedded loader is sent first, the application second. The exit status is 0 only if both
/// were loaded, and non-zero if anything went wrong, for example when the device is already
/// running an application.
#[derive(Parser, Debug)]
#[command(name = "stageload", version)]
pub struct Cli {
    /// Application binary to load.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Set serial port device PATH.
    #[arg(long, value_name = "PATH")]
    pub port: Option<String>,

    /// Set serial port speed in BPS (bits per second).
    #[arg(
        long,
        value_name = "BPS",
        default_value_t = DEFAULT_SPEED,
        value_parser = clap::value_parser!(u32).range(1..),
    )]
    pub speed: u32,

    /// Enable verbose output.
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    /// Parse `args`, program name first.
    ///
    /// Refused arguments as well as `--help` and `--version` come back as
    /// [`Error::Usage`](crate::Error::Usage), for the caller to print wherever diagnostics go.
    pub fn try_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::try_parse_from(args)?)
    }

    pub fn options(&self) -> Options {
        Options {
            file: self.file.clone(),
            port: self.port.clone(),
            speed: self.speed,
            verbose: self.verbose,
        }
    }
}

/// Diagnostics filter: `debug` when verbose, `warn` otherwise, refined by `directives` in
/// `RUST_LOG` syntax.
pub fn log_filter(verbose: bool, directives: &str) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::WARN };

    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives)
}
