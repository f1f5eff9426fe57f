use std::{
    borrow::Cow,
    io::{self, Write as _},
};

/// Trait for the interpreter's output boundary.
///
/// Implement this to capture or redirect output from interpreted code. The
/// `stdout` channel receives `print()` output; the `stderr` channel receives
/// unhandled-exception tracebacks and fatal-error diagnostics.
///
/// Writes are infallible at this boundary: implementations that hit a host
/// I/O error are expected to swallow it (matching `print` semantics on a
/// closed pipe) rather than feed it back into the interpreted program.
pub trait PrintWriter {
    /// Writes a chunk of standard-output text.
    ///
    /// Called once per formatted `print()` argument and once per separator or
    /// terminator, so implementations must not add any text of their own.
    fn stdout_write(&mut self, output: Cow<'_, str>);

    /// Writes a chunk of standard-error text (tracebacks, diagnostics).
    fn stderr_write(&mut self, output: Cow<'_, str>);
}

/// Default `PrintWriter` that writes to the process stdout/stderr.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(output.as_bytes());
        let _ = stdout.flush();
    }

    fn stderr_write(&mut self, output: Cow<'_, str>) {
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(output.as_bytes());
        let _ = stderr.flush();
    }
}

/// A `PrintWriter` that collects both channels into strings.
///
/// Useful for testing or capturing program output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    stdout: String,
    stderr: String,
}

impl CollectStringPrint {
    /// Creates a new empty `CollectStringPrint`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected standard output.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.stdout
    }

    /// Returns the collected standard error.
    #[must_use]
    pub fn error_output(&self) -> &str {
        &self.stderr
    }

    /// Consumes the writer, returning `(stdout, stderr)`.
    #[must_use]
    pub fn into_outputs(self) -> (String, String) {
        (self.stdout, self.stderr)
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        self.stdout.push_str(&output);
    }

    fn stderr_write(&mut self, output: Cow<'_, str>) {
        self.stderr.push_str(&output);
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) {}

    fn stderr_write(&mut self, _output: Cow<'_, str>) {}
}
