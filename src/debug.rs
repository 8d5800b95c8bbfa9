use std::time::Instant;

/// Logs how long the enclosing scope took once it is dropped.
pub(crate) struct ScopeTimer {
    label: &'static str,
    level: log::Level,
    started_at: Instant,
}

impl ScopeTimer {
    pub fn start(level: log::Level, label: &'static str) -> Self {
        Self {
            label,
            level,
            started_at: Instant::now(),
        }
    }
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        log::log!(
            self.level,
            "{} took {}ms",
            self.label,
            self.started_at.elapsed().as_millis()
        );
    }
}
