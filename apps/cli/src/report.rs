//! Terminal progress lines for queue updates.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use filmup_protocol::TaskState;
use filmup_transfer::{SpeedCalculator, format_bytes};
use filmup_upload_queue::UploadTask;

#[derive(Default)]
struct Seen {
    state: Option<TaskState>,
    percent: u8,
    bytes_sent: u64,
}

/// Prints one line per task whenever its state or percent changes.
#[derive(Default)]
pub struct ProgressReporter {
    seen: Mutex<HashMap<String, Seen>>,
    speed: Mutex<HashMap<String, SpeedCalculator>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, tasks: &[UploadTask]) {
        for line in self.lines(tasks) {
            println!("{line}");
        }
    }

    /// Lines for tasks that changed since the previous update.
    pub fn lines(&self, tasks: &[UploadTask]) -> Vec<String> {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let mut speed = self.speed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut lines = Vec::new();

        for task in tasks {
            let entry = seen.entry(task.task_id.clone()).or_default();
            let calc = speed.entry(task.task_id.clone()).or_default();
            if task.bytes_sent > entry.bytes_sent {
                calc.add_sample(task.bytes_sent - entry.bytes_sent);
            } else if task.bytes_sent < entry.bytes_sent {
                calc.reset();
            }
            entry.bytes_sent = task.bytes_sent;

            if entry.state == Some(task.state) && entry.percent == task.progress {
                continue;
            }
            entry.state = Some(task.state);
            entry.percent = task.progress;
            lines.push(format_line(task, calc));
        }

        seen.retain(|id, _| tasks.iter().any(|t| &t.task_id == id));
        speed.retain(|id, _| tasks.iter().any(|t| &t.task_id == id));
        lines
    }
}

fn format_line(task: &UploadTask, speed: &SpeedCalculator) -> String {
    let mut line = format!(
        "{:<24} {:>9} {:>3}%  {}",
        task.file.name,
        task.status_text(),
        task.progress,
        task.progress_note()
    );
    if task.state == TaskState::Uploading {
        let bps = speed.bytes_per_second();
        if bps > 0.0 {
            line.push_str(&format!("  {}/s", format_bytes(bps as u64)));
        }
        if let Some(eta) = speed.eta(task.bytes_total.saturating_sub(task.bytes_sent)) {
            line.push_str(&format!("  ~{}s left", eta.as_secs()));
        }
    }
    if let Some(error) = &task.last_error {
        line.push_str(&format!("  ({error})"));
    }
    line
}
