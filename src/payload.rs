//! Program images sent to the device.
//!
//! Only a superficial check is done on the content: raw binaries are expected, and the most
//! common mistake is passing the ELF executable produced by the linker instead.

use std::{borrow::Cow, fmt, fs, path::PathBuf};

use crate::{Error, Result};

/// Stage-1 loader image, bound at build time.
#[cfg(not(stage1_missing))]
pub static STAGE1_IMAGE: Option<&[u8]> =
    Some(include_bytes!(concat!(env!("OUT_DIR"), "/stage1.bin")));

/// Stage-1 loader image, bound at build time.
#[cfg(stage1_missing)]
pub static STAGE1_IMAGE: Option<&[u8]> = None;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// Where a payload came from, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// The loader image built into this program.
    Embedded,
    File(PathBuf),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Embedded => f.write_str("embedded loader"),
            Origin::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// An immutable program image.
#[derive(Clone, Debug)]
pub struct Payload {
    origin: Origin,
    bytes: Cow<'static, [u8]>,
}

impl Payload {
    /// The embedded stage-1 loader.
    pub fn stage1() -> Result<Self> {
        let image = STAGE1_IMAGE.ok_or(Error::NoLoader)?;
        Self::new(Origin::Embedded, image)
    }

    /// Read a payload from disk in a single attempt.
    pub fn read(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = fs::read(&path).map_err(|source| Error::Read {
            path: path.clone(),
            source,
        })?;

        Self::new(Origin::File(path), bytes)
    }

    pub fn new(origin: Origin, bytes: impl Into<Cow<'static, [u8]>>) -> Result<Self> {
        let bytes = bytes.into();

        let reason = if bytes.is_empty() {
            Some("is empty")
        } else if bytes.starts_with(ELF_MAGIC) {
            Some("looks like an ELF executable")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(Error::FormatMismatch {
                origin: origin.to_string(),
                reason,
            });
        }

        Ok(Self { origin, bytes })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn file_with(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn reads_raw_binary() {
        let file = file_with(&[0x01, 0x02, 0x03, 0x04, 0x05]);

        let payload = Payload::read(file.path()).unwrap();

        assert_eq!(payload.bytes(), &[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(payload.origin(), &Origin::File(file.path().to_path_buf()));
    }

    #[test]
    fn rejects_elf() {
        let file = file_with(b"\x7fELF\x01\x01\x01\x00");

        let err = Payload::read(file.path()).unwrap_err();

        assert!(matches!(
            err,
            Error::FormatMismatch {
                reason: "looks like an ELF executable",
                ..
            }
        ));
    }

    #[test]
    fn elf_magic_only_counts_as_prefix() {
        let payload = Payload::new(Origin::Embedded, b"ab\x7fELF".as_slice()).unwrap();
        assert_eq!(payload.bytes().len(), 6);

        // Shorter than the magic, so it can not match.
        assert!(Payload::new(Origin::Embedded, b"\x7fEL".as_slice()).is_ok());
    }

    #[test]
    fn rejects_empty() {
        let file = file_with(&[]);

        let err = Payload::read(file.path()).unwrap_err();

        assert!(matches!(err, Error::FormatMismatch { reason: "is empty", .. }));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.bin");

        let err = Payload::read(&path).unwrap_err();

        match err {
            Error::Read { path: reported, source } => {
                assert_eq!(reported, path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(not(stage1_missing))]
    #[test]
    fn bundled_loader() {
        let loader = Payload::stage1().unwrap();

        assert!(!loader.bytes().is_empty());
        assert_eq!(loader.origin(), &Origin::Embedded);
    }

    #[cfg(stage1_missing)]
    #[test]
    fn no_bundled_loader() {
        assert!(matches!(Payload::stage1(), Err(Error::NoLoader)));
    }

    #[test]
    fn origin_labels() {
        assert_eq!(Origin::Embedded.to_string(), "embedded loader");
        assert_eq!(Origin::File("app.bin".into()).to_string(), "app.bin");
    }
}
