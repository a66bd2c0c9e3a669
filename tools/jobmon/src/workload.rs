//! Simulated batch used by the `jobmon` binary: one coordinator feeding a
//! pool of job workers through the monitor's worker API.

use crate::config::WorkloadConfig;
use crate::errors::MonitorError;
use crate::monitor::Worker;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

const RESULT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Done,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub total: u32,
    pub done: u32,
    pub failed: u32,
}

impl JobStats {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> u32 {
        self.done + self.failed
    }

    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Done => self.done += 1,
            JobOutcome::Failed => self.failed += 1,
        }
    }

    pub fn progress(&self) -> String {
        if self.processed() == 0 {
            return format!("Processing {} jobs...", self.total);
        }
        let width = self.total.to_string().len();
        format!(
            "Processed {:>width$} of {}: {} done, {} failed",
            self.processed(),
            self.total,
            self.done,
            self.failed
        )
    }

    pub fn summary(&self) -> String {
        format!(
            "Processed {} of {} jobs: {} done, {} failed",
            self.processed(),
            self.total,
            self.done,
            self.failed
        )
    }
}

/// Previous message in a fixed left column, the new one after it.
pub fn two_columns(column: usize, previous: &str, current: &str) -> String {
    let left = previous.chars().take(column).collect::<String>();
    format!("{left:<column$} {current}")
}

/// Entry point for the coordinator worker. Statistics are kept in `stats`
/// so the caller can report them once the monitor has shut down.
pub fn coordinate(
    worker: &Worker,
    cfg: &WorkloadConfig,
    stats: &Mutex<JobStats>,
) -> Result<(), MonitorError> {
    worker.report_status("Loading jobs...");
    let queue = Arc::new(Mutex::new((1..=cfg.jobs).collect::<VecDeque<u32>>()));
    let (results_tx, results_rx) = mpsc::channel();

    for _ in 0..cfg.parallel.min(cfg.jobs) {
        worker.checkpoint()?;
        let queue = Arc::clone(&queue);
        let results = results_tx.clone();
        let job_cfg = cfg.clone();
        worker.spawn_worker(move |job_worker| run_jobs(job_worker, &queue, &results, &job_cfg))?;
    }
    // Job workers now hold the only senders; the channel closes when the
    // last of them exits, however it exits.
    drop(results_tx);

    report_progress(worker, stats);
    loop {
        match results_rx.recv_timeout(RESULT_POLL) {
            Ok(outcome) => {
                lock_stats(stats).record(outcome);
                report_progress(worker, stats);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if worker.is_sole_active_worker() {
            // Nobody else is producing: drain, then it is safe to park.
            drain_results(&results_rx, stats);
            report_progress(worker, stats);
            worker.checkpoint()?;
        }
    }
    report_progress(worker, stats);
    Ok(())
}

fn lock_stats(stats: &Mutex<JobStats>) -> std::sync::MutexGuard<'_, JobStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report_progress(worker: &Worker, stats: &Mutex<JobStats>) {
    let line = lock_stats(stats).progress();
    worker.report_status(line);
}

fn drain_results(results: &Receiver<JobOutcome>, stats: &Mutex<JobStats>) {
    let mut guard = lock_stats(stats);
    for outcome in results.try_iter() {
        guard.record(outcome);
    }
}

fn run_jobs(
    worker: &Worker,
    queue: &Mutex<VecDeque<u32>>,
    results: &Sender<JobOutcome>,
    cfg: &WorkloadConfig,
) -> Result<(), MonitorError> {
    let mut previous = String::new();
    loop {
        worker.checkpoint()?;
        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let Some(job) = next else {
            return Ok(());
        };

        let column = worker.screen_width() / 2;
        let started = format!("job {job} ...");
        worker.report_status(two_columns(column, &previous, &started));
        thread::sleep(Duration::from_millis(cfg.job_millis));

        if cfg.fail_job == Some(job) {
            let _ = results.send(JobOutcome::Failed);
            return Err(MonitorError::worker(format!("job {job} failed")));
        }
        let _ = results.send(JobOutcome::Done);
        let finished = format!("job {job} => done");
        worker.report_status(two_columns(column, &started, &finished));
        previous = finished;
    }
}

#[cfg(test)]
mod tests {
    use super::{two_columns, JobOutcome, JobStats};

    #[test]
    fn two_columns_pads_and_truncates_previous_message() {
        assert_eq!(two_columns(6, "abc", "next"), "abc    next");
        assert_eq!(two_columns(4, "abcdefgh", "next"), "abcd next");
        assert_eq!(two_columns(0, "abc", "next"), " next");
    }

    #[test]
    fn progress_and_summary_lines() {
        let mut stats = JobStats::new(120);
        assert_eq!(stats.progress(), "Processing 120 jobs...");
        stats.record(JobOutcome::Done);
        stats.record(JobOutcome::Done);
        stats.record(JobOutcome::Failed);
        assert_eq!(stats.progress(), "Processed   3 of 120: 2 done, 1 failed");
        assert_eq!(stats.summary(), "Processed 3 of 120 jobs: 2 done, 1 failed");
    }
}
