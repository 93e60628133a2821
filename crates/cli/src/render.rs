//! Terminal rendering of a running job.

use tokio::sync::watch;
use xlproc_core::job::{Job, JobState};

const BAR_WIDTH: usize = 24;

/// Fixed-width progress bar, e.g. `[######------]`.
pub fn progress_bar(progress: u8, width: usize) -> String {
    let filled = usize::from(progress.min(100)) * width / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

/// One status line for the job, or `None` while nothing has happened yet.
pub fn status_line(job: &Job) -> Option<String> {
    let bar = progress_bar(job.progress, BAR_WIDTH);
    match job.state {
        JobState::Idle => None,
        JobState::Submitting => Some(format!("{bar}   0% submitting")),
        JobState::Streaming => Some(format!("{bar} {:>3}% {}", job.progress, job.message)),
        JobState::Succeeded => Some(format!("{bar} 100% done")),
        JobState::Failed => Some(format!(
            "{bar} {:>3}% failed: {}",
            job.progress,
            job.error.as_deref().unwrap_or("unknown error")
        )),
    }
}

/// Print status lines to stderr until the job is terminal or the
/// orchestrator goes away. Unchanged lines are not repeated.
pub async fn follow(mut rx: watch::Receiver<Job>) {
    let mut last_line: Option<String> = None;
    let mut notice_shown = false;

    loop {
        let job = rx.borrow_and_update().clone();

        if let Some(line) = status_line(&job) {
            if last_line.as_deref() != Some(line.as_str()) {
                eprintln!("{line}");
                last_line = Some(line);
            }
        }
        if let (Some(notice), false) = (&job.notice, notice_shown) {
            eprintln!("note: {notice}");
            notice_shown = true;
        }

        if job.state.is_terminal() || rx.changed().await.is_err() {
            break;
        }
    }
}
