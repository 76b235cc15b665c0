//! Terminal progress display for dumps.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use partdump_core::{DumpEvent, DumpObserver, TracingObserver};

/// Draws a progress bar for streamed bytes and logs everything else.
pub struct ProgressObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn start(&self, partition: &str, size: u64) {
        let bar = if size > 0 {
            let bar = ProgressBar::new(size);
            if let Ok(style) = ProgressStyle::with_template(
                "{msg} [{wide_bar}] {bytes}/{total_bytes} {bytes_per_sec} ({eta})",
            ) {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        } else {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} {bytes} {bytes_per_sec}") {
                bar.set_style(style);
            }
            bar
        };
        bar.set_message(format!("Dumping {}", partition));

        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(slot) = self.bar.lock()
            && let Some(bar) = slot.as_ref()
        {
            f(bar);
        }
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpObserver for ProgressObserver {
    fn on_event(&self, event: &DumpEvent) {
        match event {
            DumpEvent::SizeQueried { partition, size } => self.start(partition, *size),
            DumpEvent::Progress { total, .. } => self.with_bar(|bar| bar.set_position(*total)),
            DumpEvent::Stall { .. } => self.with_bar(|bar| bar.tick()),
            DumpEvent::Complete { .. } => self.with_bar(|bar| bar.finish()),
            DumpEvent::Error { .. } => self.with_bar(|bar| bar.abandon()),
            _ => {}
        }
        if is_logged(event) {
            TracingObserver.on_event(event);
        }
    }
}

/// Events passed on to the log. Errors are reported once, by `main`.
fn is_logged(event: &DumpEvent) -> bool {
    !matches!(
        event,
        DumpEvent::SizeQueried { .. }
            | DumpEvent::Progress { .. }
            | DumpEvent::Stall { .. }
            | DumpEvent::Complete { .. }
            | DumpEvent::Error { .. }
    )
}

#[cfg(test)]
mod tests {
    use partdump_core::DumpPhase;

    use super::*;

    #[test]
    fn test_errors_are_not_logged_twice() {
        assert!(!is_logged(&DumpEvent::Error {
            message: "Operation cancelled".into(),
        }));
        assert!(!is_logged(&DumpEvent::Progress {
            written: 512,
            total: 512,
            expected: 0,
        }));
        assert!(is_logged(&DumpEvent::WaitingForDevice));
        assert!(is_logged(&DumpEvent::PhaseChanged {
            from: DumpPhase::Idle,
            to: DumpPhase::SizeQuery,
        }));
    }

    #[test]
    fn test_error_abandons_bar() {
        let observer = ProgressObserver::new();
        observer.on_event(&DumpEvent::SizeQueried {
            partition: "boot".into(),
            size: 1024,
        });
        observer.on_event(&DumpEvent::Error {
            message: "stalled".into(),
        });

        let slot = observer.bar.lock().unwrap();
        assert!(slot.as_ref().is_some_and(|bar| bar.is_finished()));
    }
}
