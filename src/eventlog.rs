//! Line-oriented textual emitter for status messages and errors.
//!
//! Mirrors `message()`/`error()`/`warning()` from the original C source:
//! informational lines look like `[runlim] <type>:<tabs><message>`, fatal
//! errors are `runlim error: <message>` (and terminate the process),
//! warnings are `runlim warning: <message>`.

use std::io::{self, Write};

/// Column the `<type>:` prefix is padded to before the message, in steps of
/// a tab stop (8 columns), matching the original's `for (...; len < 22; ...)`.
const PAD_COLUMN: usize = 22;
const TAB_WIDTH: usize = 8;

/// Emits event-log lines to a sink, by default process stderr.
pub struct EventLog<W: Write> {
    sink: W,
}

impl EventLog<io::Stderr> {
    pub fn stderr() -> Self {
        EventLog { sink: io::stderr() }
    }
}

impl<W: Write> EventLog<W> {
    pub fn new(sink: W) -> Self {
        EventLog { sink }
    }

    /// `[runlim] <type>:<tabs><message>`
    pub fn message(&mut self, kind: &str, message: impl AsRef<str>) {
        let mut line = String::from("[runlim] ");
        line.push_str(kind);
        line.push(':');
        let mut len = kind.len();
        while len < PAD_COLUMN {
            line.push('\t');
            len += TAB_WIDTH;
        }
        line.push('\t');
        line.push_str(message.as_ref());
        let _ = writeln!(self.sink, "{line}");
        let _ = self.sink.flush();
    }

    /// `runlim warning: <message>`
    pub fn warning(&mut self, message: impl AsRef<str>) {
        let _ = writeln!(self.sink, "runlim warning: {}", message.as_ref());
        let _ = self.sink.flush();
    }

    /// `runlim error: <message>`. Fatal: the caller is expected to exit
    /// immediately afterwards (configuration errors exit 1 per spec.md §7).
    pub fn error(&mut self, message: impl AsRef<str>) {
        let _ = writeln!(self.sink, "runlim error: {}", message.as_ref());
        let _ = self.sink.flush();
    }
}
