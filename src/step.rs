//! The step contract: the only thing the runtime requires from user code.

use std::error::Error as StdError;

/// A unit of work scheduled by the runtime.
///
/// `execute` carries no arguments: any input a step needs comes from
/// `Data` objects it was wired to `Read` at build time, and any output it
/// produces is written back through a `Data` object it was wired to
/// `Create`. A step may panic; the executor captures it and reports the
/// step as failed rather than letting the panic cross a worker thread
/// boundary.
pub trait Step: Send + Sync {
    fn execute(&self) -> Result<(), Box<dyn StdError + Send + Sync>>;

    /// Name of the concrete step type, for diagnostics and logging.
    fn class_name(&self) -> &str {
        "step"
    }

    /// Human-readable name, not required to be unique.
    fn friendly_name(&self) -> &str {
        self.class_name()
    }

    /// Name unique within one graph, used to correlate log lines with a
    /// specific step instance.
    fn unique_name(&self) -> &str {
        self.friendly_name()
    }
}
