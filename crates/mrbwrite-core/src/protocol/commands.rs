//! Console commands
//!
//! Defines the text commands understood by the mruby/c console.

use serde::{Deserialize, Serialize};

/// Line terminator appended to a console command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
    /// Bare line feed, used for the banner probe
    Lf,
    /// Carriage return + line feed, used for every other command
    CrLf,
}

impl Terminator {
    /// Bytes of the terminator
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Terminator::Lf => b"\n",
            Terminator::CrLf => b"\r\n",
        }
    }
}

/// A single outbound console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The text to send, without terminator (e.g. "version", "write 54")
    pub text: String,
    /// Terminator appended on the wire
    pub terminator: Terminator,
}

impl Command {
    /// Create a command terminated with CR LF
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            terminator: Terminator::CrLf,
        }
    }

    /// The empty probe line sent while waiting for the banner
    pub fn probe() -> Self {
        Self {
            text: String::new(),
            terminator: Terminator::Lf,
        }
    }

    /// Firmware version query
    pub fn version() -> Self {
        Self::new("version")
    }

    /// Announce an upcoming payload of `len` bytes
    pub fn write(len: usize) -> Self {
        Self::new(format!("write {}", len))
    }

    /// Run the uploaded bytecode
    pub fn execute() -> Self {
        Self::new("execute")
    }

    /// Whether this is the banner probe
    pub fn is_probe(&self) -> bool {
        self.text.is_empty()
    }

    /// Convert command to bytes, appending the terminator for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.text.as_bytes().to_vec();
        bytes.extend_from_slice(self.terminator.as_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_is_bare_line_feed() {
        let cmd = Command::probe();
        assert!(cmd.is_probe());
        assert_eq!(cmd.to_bytes(), b"\n".to_vec());
    }

    #[test]
    fn test_console_commands_use_crlf() {
        assert_eq!(Command::version().to_bytes(), b"version\r\n".to_vec());
        assert_eq!(Command::execute().to_bytes(), b"execute\r\n".to_vec());
        assert!(!Command::execute().is_probe());
    }

    #[test]
    fn test_write_length_is_plain_decimal() {
        assert_eq!(Command::write(54).to_bytes(), b"write 54\r\n".to_vec());
        assert_eq!(Command::write(0).text, "write 0");
        assert_eq!(Command::write(100000).text, "write 100000");
    }
}
