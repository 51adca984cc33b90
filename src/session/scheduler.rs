use super::monitor::{lock, with_monitor, Check, SharedMonitor};
use super::{SessionPolicy, SessionState};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receives the outcome of every expiry check, on the timer thread
pub trait SessionNotifier: Send {
    fn on_check(&mut self, check: &Check);
}

/// Background expiry timer for one session.
///
/// While the session is active the timer wakes every poll interval, or
/// earlier if the warning window opens first. Inside the warning window it
/// wakes every countdown tick so the displayed time stays current. Each
/// wake-up re-reads the shared activity clock through the monitor.
pub struct Scheduler {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// A scheduler with no timer running
    pub fn idle() -> Self {
        Self {
            shutdown: None,
            handle: None,
        }
    }

    /// Start timing the monitor's current session
    pub fn start(monitor: SharedMonitor, notifier: Box<dyn SessionNotifier>) -> Self {
        let (epoch, policy) = {
            let m = lock(&monitor);
            (m.epoch(), *m.policy())
        };
        let (tx, rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut notifier = notifier;
            loop {
                let check = with_monitor(&monitor, |m| {
                    if m.epoch() != epoch {
                        return None;
                    }
                    m.check()
                });
                let Some(check) = check else {
                    break;
                };
                if check.state != check.previous {
                    tracing::debug!(
                        from = check.previous.as_str(),
                        to = check.state.as_str(),
                        "session state changed"
                    );
                }
                notifier.on_check(&check);
                if check.state == SessionState::Expired {
                    break;
                }

                match rx.recv_timeout(next_wait(&policy, &check)) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    // Cancelled, or the scheduler was dropped
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::debug!(epoch, "session timer stopped");
        });

        Self {
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the timer and wait for its thread to exit.
    /// Must not be called while holding the monitor lock.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// How long to sleep before the next check
pub fn next_wait(policy: &SessionPolicy, check: &Check) -> Duration {
    match check.state {
        SessionState::Warning => policy.countdown_tick,
        _ => {
            // The warning opens once remaining drops below the threshold
            let until_warning = check.remaining_ms - policy.warning.as_millis() as i64 + 1;
            let until_warning = Duration::from_millis(until_warning.max(1) as u64);
            policy.poll_interval.min(until_warning)
        }
    }
}
