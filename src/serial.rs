//! Serial port backend for Linux.
//!
//! The device's USB bridge runs at a rate that is not one of the classic `Bxxx` constants, so the
//! port is configured through `termios2` with `BOTHER`, which accepts any bit rate.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    os::{fd::AsRawFd, unix::fs::OpenOptionsExt},
    time::Duration,
};

use crate::{Connector, TransportError, proto::FramedDevice};

/// Time the device gets to start answering a single read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A raw 8N1 serial port.
pub struct SerialPort {
    file: File,
}

impl SerialPort {
    pub fn open(path: &str, speed: u32, timeout: Duration) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)?;

        configure(&file, speed, timeout)?;
        tracing::debug!(path, speed, ?timeout, "serial port configured");

        Ok(Self { file })
    }
}

fn configure(file: &File, speed: u32, timeout: Duration) -> io::Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: all-zero is a valid bit pattern for this plain C struct.
    let mut tio: libc::termios2 = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` stays open for the duration of the call and `tio` is a valid termios2.
    if unsafe { libc::ioctl(fd, libc::TCGETS2, &mut tio as *mut libc::termios2) } == -1 {
        return Err(io::Error::last_os_error());
    }

    tio.c_iflag = 0;
    tio.c_oflag = 0;
    tio.c_lflag = 0;
    tio.c_cflag &= !(libc::CBAUD | libc::CSIZE | libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
    tio.c_cflag |= libc::BOTHER | libc::CS8 | libc::CREAD | libc::CLOCAL;
    tio.c_ispeed = speed;
    tio.c_ospeed = speed;

    // Return whatever arrived, or nothing once VTIME (in tenths of a second) expired.
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = (timeout.as_millis() / 100).clamp(1, 255) as libc::cc_t;

    // SAFETY: as above.
    if unsafe { libc::ioctl(fd, libc::TCSETS2, &tio as *const libc::termios2) } == -1 {
        return Err(io::Error::last_os_error());
    }

    // Stale bytes from an earlier session would desync the framing.
    // SAFETY: `fd` is open.
    if unsafe { libc::tcflush(fd, libc::TCIFLUSH) } == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        // Wait until everything written actually left the port.
        // SAFETY: the descriptor is owned by `self.file`.
        if unsafe { libc::tcdrain(self.file.as_raw_fd()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Connects through [`SerialPort`].
#[derive(Clone, Copy, Debug)]
pub struct SerialConnector {
    pub timeout: Duration,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Connector for SerialConnector {
    type Device = FramedDevice<SerialPort>;

    fn connect(&self, port: &str, speed: u32) -> Result<Self::Device, TransportError> {
        let port = SerialPort::open(port, speed, self.timeout)?;
        Ok(FramedDevice::new(port))
    }
}
