use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{Percent, ProgressIndicator, ProgressSample};

/// Turns raw progress samples into a non-decreasing percentage for the loading bar.
///
/// When auto-fetch is disabled the whole file may never arrive, so the bar is hidden
/// after `hide_timeout` without new data instead of sitting half-filled forever.
pub struct ProgressTracker {
    indicator: Arc<dyn ProgressIndicator>,
    hide_timeout: Duration,
    state: Arc<Mutex<TrackerState>>,
}

#[derive(Default)]
struct TrackerState {
    last: Option<u32>,
    auto_fetch_disabled: bool,
    complete: bool,
    timer: Option<JoinHandle<()>>,
    timer_epoch: u64,
}

impl TrackerState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_epoch += 1;
    }
}

impl ProgressTracker {
    pub fn new(indicator: Arc<dyn ProgressIndicator>, hide_timeout: Duration) -> Self {
        Self {
            indicator,
            hide_timeout,
            state: Arc::new(Mutex::new(TrackerState::default())),
        }
    }

    /// Starts a fresh session.
    pub fn reset(&self, auto_fetch_disabled: bool) {
        let mut state = self.state.lock();
        state.cancel_timer();
        state.last = None;
        state.complete = false;
        state.auto_fetch_disabled = auto_fetch_disabled;
    }

    /// Returns whether the sample was shown.
    ///
    /// Must be called from within a tokio runtime; the decay timer is a spawned task.
    pub fn on_sample(&self, sample: ProgressSample) -> bool {
        let percent = sample.percent();
        let show = {
            let mut state = self.state.lock();
            if state.complete {
                return false;
            }
            if let Percent::Determinate(value) = percent {
                // A switch to range requests can discard bytes already counted.
                if state.last.is_some_and(|last| value <= last) {
                    return false;
                }
                state.last = Some(value);
            }

            let decays = state.auto_fetch_disabled && percent.value().is_some_and(|v| v > 0);
            if decays {
                self.restart_timer(&mut state);
            }
            decays
        };

        self.indicator.set_percent(percent);
        if show {
            self.indicator.show();
        }
        true
    }

    /// The whole resource has arrived: hide the bar for good.
    pub fn mark_complete(&self) {
        {
            let mut state = self.state.lock();
            state.complete = true;
            state.cancel_timer();
        }
        self.indicator.hide();
    }

    pub fn last_percent(&self) -> Option<u32> {
        self.state.lock().last
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    pub fn has_pending_timer(&self) -> bool {
        self.state.lock().timer.is_some()
    }

    fn restart_timer(&self, state: &mut TrackerState) {
        state.cancel_timer();
        let epoch = state.timer_epoch;
        let shared = Arc::clone(&self.state);
        let indicator = Arc::clone(&self.indicator);
        let timeout = self.hide_timeout;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            {
                let mut state = shared.lock();
                if state.timer_epoch != epoch {
                    return;
                }
                state.timer = None;
            }
            debug!(?timeout, "no progress data received, hiding loading bar");
            indicator.hide();
        }));
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.state.lock().cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingBar {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingBar {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl ProgressIndicator for RecordingBar {
        fn set_percent(&self, percent: Percent) {
            let label = match percent {
                Percent::Indeterminate => "percent:?".to_owned(),
                Percent::Determinate(value) => format!("percent:{value}"),
            };
            self.calls.lock().push(label);
        }

        fn show(&self) {
            self.calls.lock().push("show".to_owned());
        }

        fn hide(&self) {
            self.calls.lock().push("hide".to_owned());
        }
    }

    fn tracker(auto_fetch_disabled: bool) -> (ProgressTracker, Arc<RecordingBar>) {
        let bar = Arc::new(RecordingBar::default());
        let tracker = ProgressTracker::new(bar.clone(), Duration::from_millis(5000));
        tracker.reset(auto_fetch_disabled);
        (tracker, bar)
    }

    #[tokio::test]
    async fn percent_never_goes_backwards() {
        let (tracker, bar) = tracker(false);

        assert!(tracker.on_sample(ProgressSample::new(10, Some(100))));
        assert!(!tracker.on_sample(ProgressSample::new(5, Some(100))));
        assert!(!tracker.on_sample(ProgressSample::new(10, Some(100))));
        assert!(tracker.on_sample(ProgressSample::new(50, Some(100))));

        assert_eq!(bar.calls(), vec!["percent:10", "percent:50"]);
        assert_eq!(tracker.last_percent(), Some(50));
        assert!(!tracker.has_pending_timer());
    }

    #[tokio::test]
    async fn indeterminate_samples_are_always_shown() {
        let (tracker, bar) = tracker(false);
        tracker.on_sample(ProgressSample::new(40, Some(100)));
        assert!(tracker.on_sample(ProgressSample::new(10, None)));
        assert_eq!(tracker.last_percent(), Some(40));
        assert_eq!(bar.calls(), vec!["percent:40", "percent:?"]);
    }

    #[tokio::test(start_paused = true)]
    async fn bar_hides_after_inactivity_when_auto_fetch_disabled() {
        let (tracker, bar) = tracker(true);
        tracker.on_sample(ProgressSample::new(20, Some(100)));
        assert!(tracker.has_pending_timer());

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert!(!bar.calls().contains(&"hide".to_owned()));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(bar.calls(), vec!["percent:20", "show", "hide"]);
        assert!(!tracker.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn new_sample_postpones_the_hide() {
        let (tracker, bar) = tracker(true);
        tracker.on_sample(ProgressSample::new(20, Some(100)));
        tokio::time::sleep(Duration::from_millis(4000)).await;
        tracker.on_sample(ProgressSample::new(30, Some(100)));

        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert!(!bar.calls().contains(&"hide".to_owned()));

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(bar.calls().last().map(String::as_str), Some("hide"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_percent_does_not_arm_the_timer() {
        let (tracker, _bar) = tracker(true);
        tracker.on_sample(ProgressSample::new(0, Some(100)));
        assert!(!tracker.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_hides_and_ignores_later_samples() {
        let (tracker, bar) = tracker(true);
        tracker.on_sample(ProgressSample::new(20, Some(100)));
        tracker.mark_complete();
        assert!(!tracker.on_sample(ProgressSample::new(90, Some(100))));
        assert!(!tracker.has_pending_timer());

        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert_eq!(bar.calls(), vec!["percent:20", "show", "hide"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_timer_and_forgets_last_percent() {
        let (tracker, bar) = tracker(true);
        tracker.on_sample(ProgressSample::new(60, Some(100)));
        tracker.reset(true);
        assert_eq!(tracker.last_percent(), None);
        assert!(!tracker.has_pending_timer());

        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert!(!bar.calls().contains(&"hide".to_owned()));
        assert!(tracker.on_sample(ProgressSample::new(10, Some(100))));
    }
}
