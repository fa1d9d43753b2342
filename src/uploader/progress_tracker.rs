use super::task::UploadTask;

/// Mean of each task's sent fraction, as a whole percentage in [0, 100].
pub fn aggregate_progress<'a>(tasks: impl IntoIterator<Item = &'a UploadTask>) -> u8 {
    let (sum, count) = tasks
        .into_iter()
        .fold((0.0f64, 0usize), |(sum, count), task| {
            (sum + task.fraction(), count + 1)
        });

    if count == 0 {
        return 0;
    }

    let percent = (sum / count as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Last computed aggregate; reports whether a recomputation changed it.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    current: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Returns the new aggregate when it differs from the previous one.
    pub fn recompute<'a>(
        &mut self,
        tasks: impl IntoIterator<Item = &'a UploadTask>,
    ) -> Option<u8> {
        let next = aggregate_progress(tasks);
        if next == self.current {
            return None;
        }

        log::debug!("Aggregate progress: {}% -> {}%", self.current, next);
        self.current = next;
        Some(next)
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}
