//! Execution settings

use std::time::Duration;

use russh::Pty;
use serde::{Deserialize, Serialize};

/// Interrupt control byte (ETX, Ctrl-C)
pub const CTRL_C_CODE: u8 = 0x03;

/// End-of-input marker byte (EOT, Ctrl-D)
pub const EOF_CODE: u8 = 0x04;

/// Marker appended to output cut short by `max_output_bytes`
pub const TRUNCATION_MARKER: &[u8] = b"\n[output truncated]\n";

/// Pseudo-terminal request parameters
///
/// Echo is always disabled. The terminal type is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyConfig {
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
    /// Input and output speed
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_term() -> String {
    "xterm".to_string()
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    40
}

fn default_baud() -> u32 {
    14_400
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
            baud: default_baud(),
        }
    }
}

impl PtyConfig {
    /// Terminal modes sent with the request
    #[must_use]
    pub fn modes(&self) -> Vec<(Pty, u32)> {
        vec![
            (Pty::ECHO, 0),
            (Pty::TTY_OP_ISPEED, self.baud),
            (Pty::TTY_OP_OSPEED, self.baud),
        ]
    }
}

/// Per-run settings shared by every session
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Pseudo-terminal parameters
    pub pty: PtyConfig,
    /// Cap on captured output per host; `None` is unbounded
    pub max_output_bytes: Option<usize>,
    /// Bound on opening the transport connection; `None` waits indefinitely
    pub connect_timeout: Option<Duration>,
}

impl ExecOptions {
    #[must_use]
    pub fn with_pty(mut self, pty: PtyConfig) -> Self {
        self.pty = pty;
        self
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = Some(limit);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}
