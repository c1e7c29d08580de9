//! Bytecode images
//!
//! Compiled mruby bytecode starts with the `RITE` marker. Only the marker is
//! checked; the rest of the format is the compiler's and firmware's business.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Marker every bytecode image starts with
pub const MAGIC: &[u8; 4] = b"RITE";

/// Errors while loading or validating bytecode
#[derive(Error, Debug)]
pub enum BytecodeError {
    /// Fewer bytes than the marker
    #[error("Image is {0} bytes, too short to hold the RITE marker")]
    TooShort(usize),

    #[error("Not a bytecode image: expected RITE marker, found {found:02x?}")]
    /// First four bytes are not `RITE`
    MissingMagic {
        /// The bytes found instead
        found: [u8; 4],
    },

    /// Nothing to combine
    #[error("No bytecode images to combine")]
    Empty,

    /// The file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// A validated, immutable bytecode image
#[derive(Clone, PartialEq, Eq)]
pub struct BytecodeImage {
    bytes: Vec<u8>,
}

impl fmt::Debug for BytecodeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytecodeImage")
            .field("len", &self.bytes.len())
            .field("crc32", &format_args!("{:#010x}", self.checksum()))
            .finish()
    }
}

impl BytecodeImage {
    /// Validate `bytes` and wrap them as an image
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BytecodeError> {
        if bytes.len() < MAGIC.len() {
            return Err(BytecodeError::TooShort(bytes.len()));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&bytes[..4]);
            return Err(BytecodeError::MissingMagic { found });
        }
        Ok(Self { bytes })
    }

    /// Load and validate an image from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BytecodeError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| BytecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(bytes)
    }

    /// Join images byte-for-byte, in order
    pub fn concat<I>(images: I) -> Result<Self, BytecodeError>
    where
        I: IntoIterator<Item = BytecodeImage>,
    {
        let mut iter = images.into_iter();
        let mut combined = iter.next().ok_or(BytecodeError::Empty)?.bytes;
        for image in iter {
            combined.extend_from_slice(&image.bytes);
        }
        Ok(Self { bytes: combined })
    }

    /// Raw image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; a valid image holds at least the marker
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// CRC-32 of the image, for logging what was flashed
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.bytes)
    }
}

impl AsRef<[u8]> for BytecodeImage {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl TryFrom<Vec<u8>> for BytecodeImage {
    type Error = BytecodeError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}
