//! Progress hooks for the crime export download and file rewrites.
//!
//! Library code only talks to [`ProgressCallback`]; the terminal bar lives
//! in `crime_fr_cli_utils`.

/// Sink for download and rewrite progress. Shared across the async
/// download task, hence `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Expected byte count of the download, once the server reports it.
    fn set_total(&self, total: u64);

    /// Bytes received since the last call.
    fn inc(&self, delta: u64);

    /// Current step, e.g. "Normalizing".
    fn set_message(&self, msg: String);

    /// Ends the run, leaving `msg` on screen.
    fn finish(&self, msg: String);

    /// Ends the run without a trailing message.
    fn finish_and_clear(&self);
}
