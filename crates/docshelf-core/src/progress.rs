//! Progress reporting collaborator.

/// Receives progress as a single fraction in `[0, 1]` plus an optional message.
///
/// May be called zero or more times from any task. Implementations must not
/// block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64, message: Option<&str>);
}

impl<F> ProgressSink for F
where
    F: Fn(f64, Option<&str>) + Send + Sync,
{
    fn report(&self, fraction: f64, message: Option<&str>) {
        self(fraction, message)
    }
}

/// A sink that discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f64, _message: Option<&str>) {}
}
