//! Progress reporting for long-running pipeline work.

/// Progress callback for extraction and generation.
pub trait PipelineProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Item-level progress within the current phase.
    fn task_progress(&self, current: usize, total: usize, detail: &str);
}

/// No-op progress.
pub struct SilentProgress;

impl PipelineProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn task_progress(&self, _current: usize, _total: usize, _detail: &str) {}
}
