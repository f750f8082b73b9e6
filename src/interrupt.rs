//! Reaction to the operator interrupting or terminating the process.

use std::sync::Arc;

use crate::Result;

/// Runs on every delivered signal, on a thread of its own.
pub type Action = Box<dyn Fn() + Send + 'static>;

/// Ends the process with the given status.
pub type Terminate = Arc<dyn Fn(u8) + Send + Sync>;

/// Source of asynchronous termination requests.
pub trait Interrupts {
    /// Install `action` for the remaining lifetime of the process.
    fn arm(&self, action: Action) -> Result<()>;
}

/// `SIGINT` and `SIGTERM` (or their platform equivalents).
#[derive(Clone, Copy, Debug, Default)]
pub struct Signals;

impl Interrupts for Signals {
    fn arm(&self, action: Action) -> Result<()> {
        ctrlc::set_handler(move || {
            tracing::debug!("termination signal received");
            action()
        })?;
        Ok(())
    }
}

pub fn terminate_process() -> Terminate {
    Arc::new(|code| std::process::exit(i32::from(code)))
}
