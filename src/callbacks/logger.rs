/// Receiver of the user facing messages of a run: progress lines, warnings
/// about the adaptation schedule and the timing report.
pub trait Logger {
    fn info(&mut self, message: &str);
    fn warn(&mut self, message: &str);
}

/// Forwards messages as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&mut self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&mut self, message: &str) {
        tracing::warn!("{}", message);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn info(&mut self, _message: &str) {}
    fn warn(&mut self, _message: &str) {}
}
