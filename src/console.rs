//! Operator-facing output.
//!
//! Reports go to the output stream and diagnostics to the error stream. The console is handed to
//! whoever needs to talk to the operator, including the interrupt action, instead of being a
//! process-wide logger.

use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Clone)]
pub struct Console {
    out: Sink,
    err: Sink,
}

impl Console {
    pub fn new(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
            err: Arc::new(Mutex::new(Box::new(err))),
        }
    }

    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Write a line of results to the output stream.
    pub fn report(&self, args: fmt::Arguments<'_>) {
        write_line(&self.out, args);
    }

    /// Write a line of diagnostics to the error stream.
    pub fn diag(&self, args: fmt::Arguments<'_>) {
        write_line(&self.err, args);
    }
}

fn write_line(sink: &Sink, args: fmt::Arguments<'_>) {
    let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
    // Nowhere left to report a broken stdio to.
    let _ = writeln!(sink, "{args}").and_then(|()| sink.flush());
}

/// In-memory stream, shareable between a [`Console`] and whoever inspects it.
#[derive(Clone, Default)]
pub struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_streams() {
        let (out, err) = (Buffer::default(), Buffer::default());
        let console = Console::new(out.clone(), err.clone());

        console.report(format_args!("UDI: {}", 42));
        console.diag(format_args!("Connecting to {}", "/dev/ttyACM0"));
        console.clone().diag(format_args!("second"));

        assert_eq!(out.contents(), "UDI: 42\n");
        assert_eq!(err.contents(), "Connecting to /dev/ttyACM0\nsecond\n");
    }
}
