use std::time::{Duration, Instant};

const SLOW_STAGE: Duration = Duration::from_millis(1000);

/// Wall-clock timer for a single stage invocation.
pub struct StepTimer {
    name: &'static str,
    start: Instant,
}

impl StepTimer {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Log the elapsed time; slow stages are reported at warn level.
    pub fn finish(&self, run_id: &str) -> u64 {
        let elapsed = self.elapsed_ms();
        if self.elapsed() > SLOW_STAGE {
            log::warn!("[{}] {} took {}ms", run_id, self.name, elapsed);
        } else {
            log::debug!("[{}] {} completed in {}ms", run_id, self.name, elapsed);
        }
        elapsed
    }
}
