//! Error types.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::session::State;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Exit status when both stages were loaded.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit status for any failure during the bootstrap, including a missing `--port`.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status for arguments the parser refused.
pub const EXIT_USAGE: u8 = 2;

/// Failure of a single exchange with the device, below the session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("timed out waiting for the device")]
    Timeout,

    /// A header byte that can not be a frame header.
    #[error("malformed frame header 0x{0:02x}")]
    Framing(u8),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The device flagged the response frame itself as not OK.
    #[error("device rejected the command")]
    NotOk,

    /// The response carried a non-zero status byte.
    #[error("device returned status 0x{0:02x}")]
    Status(u8),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failures of the bootstrap, one per step.
///
/// Every one of these ends the process, except [`Error::Close`] which is only reported.
#[derive(Debug, Error)]
pub enum Error {
    /// Unusable arguments, or a request for help or the version, already rendered for the
    /// operator.
    #[error("{}", .0.to_string().trim_end())]
    Usage(#[from] clap::Error),

    #[error("Failed to read file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The payload is evidently not a raw binary.
    #[error("{origin} {reason}, but a raw binary is expected.")]
    FormatMismatch { origin: String, reason: &'static str },

    #[error("No stage-1 loader was bundled with this build.")]
    NoLoader,

    #[error("Could not open {port}: {source}")]
    Connect {
        port: String,
        #[source]
        source: TransportError,
    },

    #[error("GetNameVersion failed: {0}")]
    Identify(#[source] TransportError),

    #[error("GetUDI failed: {0}")]
    Udi(#[source] TransportError),

    #[error("Loading {origin} failed: {source}")]
    Load {
        origin: String,
        #[source]
        source: TransportError,
    },

    #[error("Close: {0}")]
    Close(#[source] TransportError),

    /// Bad or missing options that the argument parser could not catch.
    #[error("{0}")]
    Invocation(String),

    #[error("Could not install interrupt handler: {0}")]
    Interrupt(#[from] ctrlc::Error),

    /// The connection was already released by the interrupt path.
    #[error("Connection closed by interrupt")]
    Interrupted,

    #[error("{operation} is not allowed in state {state:?}")]
    OutOfOrder {
        operation: &'static str,
        state: State,
    },
}

impl Error {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Usage(err) => u8::try_from(err.exit_code()).unwrap_or(EXIT_USAGE),
            _ => EXIT_FAILURE,
        }
    }

    /// Extra guidance for the operator, if this failure is usually fixed by hand.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Identify(_) => Some(
                "If the serial port is correct, then the device might not be in firmware\n\
                 mode, and have an app running already. Please unplug and plug it in again.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_identify_carries_a_hint() {
        assert!(Error::Identify(TransportError::Timeout).hint().is_some());
        assert!(Error::Udi(TransportError::Timeout).hint().is_none());
        assert!(Error::Interrupted.hint().is_none());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Error::Interrupted.exit_code(), EXIT_FAILURE);
        assert_eq!(
            Error::Invocation("Please provide a --port.".into()).exit_code(),
            EXIT_FAILURE
        );

        let usage = clap::Error::new(clap::error::ErrorKind::UnknownArgument);
        assert_eq!(Error::from(usage).exit_code(), EXIT_USAGE);

        let help = clap::Error::new(clap::error::ErrorKind::DisplayHelp);
        assert_eq!(Error::from(help).exit_code(), EXIT_SUCCESS);
    }

    #[test]
    fn handler_failure_keeps_its_cause() {
        let err = Error::from(ctrlc::Error::MultipleHandlers);

        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("Could not install interrupt handler: "));
    }

    #[test]
    fn messages_name_the_failing_step() {
        let err = Error::Load {
            origin: "app.bin".into(),
            source: TransportError::Status(1),
        };
        assert_eq!(err.to_string(), "Loading app.bin failed: device returned status 0x01");

        let err = Error::FormatMismatch {
            origin: "app.elf".into(),
            reason: "looks like an ELF executable",
        };
        assert_eq!(
            err.to_string(),
            "app.elf looks like an ELF executable, but a raw binary is expected."
        );
    }
}
