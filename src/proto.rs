//! Framing protocol spoken by the device firmware.
//!
//! Every frame starts with a single header byte:
//!
//! | bits | field                                   |
//! |------|-----------------------------------------|
//! | 7    | reserved, always 0                      |
//! | 6..5 | frame id, echoed in the response        |
//! | 4..3 | endpoint                                |
//! | 2    | status, set in a response that failed   |
//! | 1..0 | length code for 1, 4, 32 or 128 bytes   |
//!
//! The first byte of the body is the command or response code.

use std::io::{self, Read, Write};

use crate::{Device, Identity, Secret, TransportError, Udi};

/// Endpoint of the firmware.
pub const ENDPOINT_FIRMWARE: u8 = 2;

const FRAME_ID: u8 = 2;

/// Length of a frame body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdLen {
    Len1,
    Len4,
    Len32,
    Len128,
}

impl CmdLen {
    pub const fn bytes(self) -> usize {
        match self {
            CmdLen::Len1 => 1,
            CmdLen::Len4 => 4,
            CmdLen::Len32 => 32,
            CmdLen::Len128 => 128,
        }
    }

    const fn code(self) -> u8 {
        self as u8
    }

    const fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => CmdLen::Len1,
            1 => CmdLen::Len4,
            2 => CmdLen::Len32,
            _ => CmdLen::Len128,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub id: u8,
    pub endpoint: u8,
    pub not_ok: bool,
    pub len: CmdLen,
}

impl Header {
    pub fn encode(self) -> u8 {
        (self.id & 0b11) << 5
            | (self.endpoint & 0b11) << 3
            | u8::from(self.not_ok) << 2
            | self.len.code()
    }

    pub fn decode(byte: u8) -> Result<Self, TransportError> {
        if byte & 0x80 != 0 {
            return Err(TransportError::Framing(byte));
        }

        Ok(Self {
            id: (byte >> 5) & 0b11,
            endpoint: (byte >> 3) & 0b11,
            not_ok: byte & 0b100 != 0,
            len: CmdLen::from_code(byte),
        })
    }
}

struct Command {
    code: u8,
    len: CmdLen,
}

struct Response {
    code: u8,
    len: CmdLen,
}

const NAME_VERSION: Command = Command { code: 0x01, len: CmdLen::Len1 };
const RSP_NAME_VERSION: Response = Response { code: 0x02, len: CmdLen::Len32 };
const LOAD_APP: Command = Command { code: 0x03, len: CmdLen::Len128 };
const RSP_LOAD_APP: Response = Response { code: 0x04, len: CmdLen::Len4 };
const LOAD_APP_DATA: Command = Command { code: 0x05, len: CmdLen::Len128 };
const RSP_LOAD_APP_DATA: Response = Response { code: 0x06, len: CmdLen::Len4 };
const RSP_LOAD_APP_DATA_READY: Response = Response { code: 0x07, len: CmdLen::Len128 };
const GET_UDI: Command = Command { code: 0x08, len: CmdLen::Len1 };
const RSP_GET_UDI: Response = Response { code: 0x09, len: CmdLen::Len32 };

const STATUS_OK: u8 = 0;

/// Program bytes carried by one `LOAD_APP_DATA` frame.
const DATA_LEN: usize = CmdLen::Len128.bytes() - 1;

/// A [`Device`] speaking the firmware protocol over any byte stream.
///
/// Reads are expected to time out on their own; a read returning no data is taken as a timeout.
pub struct FramedDevice<P> {
    port: P,
    /// Program bytes announced but not sent yet.
    left: usize,
}

impl<P: Read + Write> FramedDevice<P> {
    pub fn new(port: P) -> Self {
        Self { port, left: 0 }
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    fn request(&mut self, command: &Command, body: &[u8]) -> Result<(), TransportError> {
        let len = command.len.bytes();
        debug_assert!(body.len() < len);

        let mut frame = vec![0u8; 1 + len];
        frame[0] = Header {
            id: FRAME_ID,
            endpoint: ENDPOINT_FIRMWARE,
            not_ok: false,
            len: command.len,
        }
        .encode();
        frame[1] = command.code;
        frame[2..2 + body.len()].copy_from_slice(body);

        tracing::debug!(frame = %hex::encode(&frame), "tx");
        self.port.write_all(&frame)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one response frame, returning its body without the response code.
    fn response(&mut self, expected: &Response) -> Result<Vec<u8>, TransportError> {
        let mut header = [0u8; 1];
        self.read_exact(&mut header)?;
        let header = Header::decode(header[0])?;

        let mut body = vec![0u8; header.len.bytes()];
        self.read_exact(&mut body)?;
        tracing::debug!(header = ?header, body = %hex::encode(&body), "rx");

        if header.id != FRAME_ID || header.endpoint != ENDPOINT_FIRMWARE {
            return Err(TransportError::UnexpectedResponse(format!(
                "frame id {} for endpoint {}",
                header.id, header.endpoint
            )));
        }
        if header.not_ok {
            return Err(TransportError::NotOk);
        }
        if header.len != expected.len || body[0] != expected.code {
            return Err(TransportError::UnexpectedResponse(format!(
                "code 0x{:02x} with {} bytes, expected 0x{:02x} with {} bytes",
                body[0],
                header.len.bytes(),
                expected.code,
                expected.len.bytes()
            )));
        }

        body.remove(0);
        Ok(body)
    }

    /// Read a response whose first byte is a status.
    fn status_response(&mut self, expected: &Response) -> Result<Vec<u8>, TransportError> {
        let body = self.response(expected)?;
        match body[0] {
            STATUS_OK => Ok(body),
            status => Err(TransportError::Status(status)),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.port.read_exact(buf).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                TransportError::Timeout
            }
            _ => TransportError::Io(err),
        })
    }
}

impl<P: Read + Write> Device for FramedDevice<P> {
    fn identity(&mut self) -> Result<Identity, TransportError> {
        self.request(&NAME_VERSION, &[])?;
        let body = self.response(&RSP_NAME_VERSION)?;

        let name = |bytes: &[u8]| {
            String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .to_owned()
        };

        Ok(Identity {
            name0: name(&body[0..4]),
            name1: name(&body[4..8]),
            version: u32::from_le_bytes([body[8], body[9], body[10], body[11]]),
        })
    }

    fn udi(&mut self) -> Result<Udi, TransportError> {
        self.request(&GET_UDI, &[])?;
        let body = self.status_response(&RSP_GET_UDI)?;

        Ok(Udi::new(&body[1..9]))
    }

    const CHUNK_LEN: usize = DATA_LEN;

    fn load_start(&mut self, size: usize, secret: &Secret) -> Result<(), TransportError> {
        if size == 0 {
            return Err(TransportError::InvalidArgument("empty program".into()));
        }
        let announced = u32::try_from(size)
            .map_err(|_| TransportError::InvalidArgument("program too large".into()))?;

        let mut body = [0u8; DATA_LEN];
        body[0..4].copy_from_slice(&announced.to_le_bytes());
        if let Some(uss) = secret.uss() {
            body[4] = 1;
            body[5..5 + Secret::LEN].copy_from_slice(uss);
        }

        self.left = 0;
        self.request(&LOAD_APP, &body)?;
        self.status_response(&RSP_LOAD_APP)?;
        self.left = size;
        Ok(())
    }

    fn load_data(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        if chunk.is_empty() || chunk.len() > DATA_LEN.min(self.left) {
            return Err(TransportError::InvalidArgument(format!(
                "{} program bytes, {} expected",
                chunk.len(),
                self.left
            )));
        }

        self.request(&LOAD_APP_DATA, chunk)?;
        self.left -= chunk.len();

        if self.left > 0 {
            self.status_response(&RSP_LOAD_APP_DATA)?;
        } else {
            let body = self.status_response(&RSP_LOAD_APP_DATA_READY)?;
            tracing::debug!(digest = %hex::encode(&body[1..33]), "program accepted");
        }
        Ok(())
    }

    fn close(mut self) -> Result<(), TransportError> {
        self.port.flush()?;
        Ok(())
    }
}
