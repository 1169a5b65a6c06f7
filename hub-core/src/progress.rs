//! Orchestrator-level progress reporting: the download and verify callbacks
//! of individual files are rewritten into a single `ProgressEvent` stream
//! covering a whole pull.
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Download,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub current: u64,
    pub total: u64,
}

pub type PullProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Accumulates per-file `(done, file_total)` pairs into a single
/// whole-pull `ProgressEvent`, given the sizes of every file planned for the
/// current phase and the index of the file currently in flight.
pub struct PhaseAccumulator {
    phase: Phase,
    file_sizes: Vec<u64>,
    current_index: usize,
    callback: Option<PullProgressCallback>,
}

impl PhaseAccumulator {
    pub fn new(phase: Phase, file_sizes: Vec<u64>, callback: Option<PullProgressCallback>) -> Self {
        Self { phase, file_sizes, current_index: 0, callback }
    }

    fn total(&self) -> u64 {
        self.file_sizes.iter().sum()
    }

    fn completed_before_current(&self) -> u64 {
        self.file_sizes[..self.current_index].iter().sum()
    }

    /// Called as the file at `current_index` reports `(done, _file_total)`.
    pub fn report(&self, done: u64) {
        if let Some(cb) = &self.callback {
            cb(ProgressEvent {
                phase: self.phase,
                current: self.completed_before_current() + done,
                total: self.total(),
            });
        }
    }

    pub fn advance(&mut self) {
        self.current_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn reports_cumulative_progress_across_files() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cb: PullProgressCallback = Arc::new(move |e| seen2.lock().unwrap().push(e));
        let mut acc = PhaseAccumulator::new(Phase::Download, vec![100, 50], Some(cb));
        acc.report(50);
        acc.advance();
        acc.report(25);
        let events = seen.lock().unwrap();
        assert_eq!(events[0].current, 50);
        assert_eq!(events[0].total, 150);
        assert_eq!(events[1].current, 125);
    }
}
