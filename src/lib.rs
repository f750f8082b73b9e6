//! Two-stage bootstrap for a serially attached security token.
//!
//! A freshly plugged token runs its firmware and accepts exactly one program. This crate first
//! verifies that the token is in that state, then sends an embedded loader (stage 1) followed by
//! the user application (stage 2), closing the connection on every exit path.

use core::fmt;

pub mod bootstrap;
pub mod cli;
pub mod console;
pub mod error;
pub mod interrupt;
pub mod payload;
pub mod proto;
#[cfg(all(feature = "serial", target_os = "linux"))]
pub mod serial;
pub mod session;

#[cfg(test)]
mod mock;

pub use error::{Error, Result, TransportError};

/// Means of establishing a connection with a device.
pub trait Connector {
    type Device: Device;

    /// Open the transport on `port` at `speed` bits per second.
    fn connect(&self, port: &str, speed: u32) -> Result<Self::Device, TransportError>;
}

/// An open connection to a device running its firmware.
///
/// Every call blocks until the device has answered or the transport gave up.
pub trait Device {
    /// Firmware names and version.
    fn identity(&mut self) -> Result<Identity, TransportError>;

    /// Unique identifier of the physical unit.
    fn udi(&mut self) -> Result<Udi, TransportError>;

    /// Largest piece of a program that [`Device::load_data`] accepts.
    const CHUNK_LEN: usize;

    /// Announce a program of `size` bytes, to be mixed with `secret` into its identity.
    fn load_start(&mut self, size: usize, secret: &Secret) -> Result<(), TransportError>;

    /// Transmit the next piece of the announced program.
    ///
    /// The device acknowledges every piece, and takes the program once all `size` bytes arrived.
    fn load_data(&mut self, chunk: &[u8]) -> Result<(), TransportError>;

    /// Release the transport.
    fn close(self) -> Result<(), TransportError>;
}

/// Firmware identity as reported right after connecting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name0: String,
    pub name1: String,
    pub version: u32,
}

/// Unique Device Identifier. Reported as-is, never interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Udi(Vec<u8>);

impl Udi {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Udi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

const USS_LEN: usize = 32;

/// User supplied secret for authenticated loading.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(Option<[u8; USS_LEN]>);

impl Secret {
    pub const LEN: usize = USS_LEN;

    /// Empty for no secret, otherwise exactly [`Secret::LEN`] bytes used as-is.
    pub fn new(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.is_empty() {
            return Ok(Self(None));
        }

        <[u8; Self::LEN]>::try_from(bytes)
            .map(|uss| Self(Some(uss)))
            .map_err(|_| {
                TransportError::InvalidArgument(format!(
                    "secret must be empty or {} bytes, got {}",
                    Self::LEN,
                    bytes.len()
                ))
            })
    }

    pub fn uss(&self) -> Option<&[u8; Self::LEN]> {
        self.0.as_ref()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Secret(..)"),
            None => f.write_str("Secret(none)"),
        }
    }
}
