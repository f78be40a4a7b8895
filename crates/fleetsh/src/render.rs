//! Result rendering

use std::io::{self, Write};

use fleetsh_exec::{HostResult, ResultSink};
use tracing::warn;

/// Writes each result to `out` as it arrives and interrupt notices to stderr
pub struct Renderer<W: Write> {
    out: W,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Render one result block
    ///
    /// # Errors
    /// Returns error if writing to the output fails
    pub fn write_result(&mut self, result: &HostResult) -> io::Result<()> {
        writeln!(self.out, "=== {} ===", result.host)?;
        self.out.write_all(&result.output)?;
        if !result.output.is_empty() && !result.output.ends_with(b"\n") {
            writeln!(self.out)?;
        }
        if let Some(err) = &result.error {
            writeln!(self.out, "error: {err}")?;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ResultSink for Renderer<W> {
    fn on_result(&mut self, result: HostResult) {
        if let Err(e) = self.write_result(&result) {
            warn!(host = %result.host, error = %e, "failed to write result");
        }
    }

    fn on_interrupt(&mut self) {
        eprintln!("terminating...");
    }
}
