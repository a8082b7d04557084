use std::io::Write as _;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Something that wants to know a live capture is underway. It only ever
/// observes; dropping the guard stops it.
pub trait ProgressObserver: Send + Sync {
    fn begin(&self, duration: Duration) -> ProgressGuard;
}

pub struct ProgressGuard {
    task: Option<JoinHandle<()>>,
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            eprintln!();
        }
    }
}

/// A `[=====     ] 40%   36s left` bar on stderr.
pub struct ConsoleCountdown;

impl ProgressObserver for ConsoleCountdown {
    fn begin(&self, duration: Duration) -> ProgressGuard {
        let total_ticks = (duration.as_millis() / 100).max(1) as u64;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            for tick in 0..=total_ticks {
                interval.tick().await;
                let mut stderr = std::io::stderr().lock();
                let _ = write!(stderr, "\r{}", render(tick, total_ticks));
                let _ = stderr.flush();
            }
        });
        ProgressGuard { task: Some(task) }
    }
}

fn render(tick: u64, total_ticks: u64) -> String {
    let tick = tick.min(total_ticks);
    let percent = tick * 100 / total_ticks;
    let filled = (tick * 50 / total_ticks) as usize;
    let remaining = (total_ticks - tick).div_ceil(10);
    let left = if remaining >= 60 {
        format!("{}min {}s left", remaining / 60, remaining % 60)
    } else {
        format!("{remaining}s left")
    };
    format!("[{:<50}] {:>3}% {:>15}", "=".repeat(filled), percent, left)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_start_and_end() {
        let start = render(0, 600);
        assert!(start.starts_with("[ "));
        assert!(start.contains("  0%"));
        assert!(start.ends_with("1min 0s left"));

        let end = render(600, 600);
        assert!(end.starts_with(&format!("[{}]", "=".repeat(50))));
        assert!(end.contains("100%"));
        assert!(end.ends_with("0s left"));
    }

    #[test]
    fn test_render_minutes() {
        assert!(render(0, 1250).ends_with("2min 5s left"));
    }
}
