use std::time::Duration;

/// Input signals that count as evidence the user is present
#[allow(dead_code)] // Pointer and touch signals only come from graphical front ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    PointerDown,
    PointerMove,
    KeyPress,
    KeyDown,
    Scroll,
    TouchStart,
    Click,
}

impl ActivityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointerDown => "pointerdown",
            Self::PointerMove => "pointermove",
            Self::KeyPress => "keypress",
            Self::KeyDown => "keydown",
            Self::Scroll => "scroll",
            Self::TouchStart => "touchstart",
            Self::Click => "click",
        }
    }
}

/// Throttles activity signals into timestamp refreshes.
///
/// Detached trackers ignore every signal; the monitor attaches one when a
/// session begins and detaches it when the session ends.
#[derive(Debug)]
pub struct ActivityTracker {
    throttle_ms: i64,
    last_refresh_ms: Option<i64>,
    attached: bool,
}

impl ActivityTracker {
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle_ms: throttle.as_millis() as i64,
            last_refresh_ms: None,
            attached: false,
        }
    }

    pub fn attach(&mut self) {
        self.attached = true;
        self.last_refresh_ms = None;
    }

    pub fn detach(&mut self) {
        self.attached = false;
        self.last_refresh_ms = None;
    }

    /// Note a refresh that happened outside the throttle (login, extend)
    pub fn mark_refreshed(&mut self, now_ms: i64) {
        self.last_refresh_ms = Some(now_ms);
    }

    /// Returns true when this signal should refresh the activity timestamp
    pub fn observe(&mut self, _event: ActivityEvent, now_ms: i64) -> bool {
        if !self.attached {
            return false;
        }
        match self.last_refresh_ms {
            Some(last) if now_ms - last <= self.throttle_ms => false,
            _ => {
                self.last_refresh_ms = Some(now_ms);
                true
            }
        }
    }
}
