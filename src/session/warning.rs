use super::monitor::{Check, LogoutReason};
use super::SessionState;

/// Format milliseconds as `mm:ss`
pub fn format_remaining(ms: i64) -> String {
    let ms = ms.max(0);
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{:02}:{:02}", minutes, seconds)
}

/// Presentation state of the expiry warning.
///
/// Fed every check result; decides which lines a terminal should print.
/// The full banner is printed when the warning opens, a short countdown line
/// on each whole minute and during the last ten seconds, and nothing once
/// the session becomes active again.
#[derive(Debug, Default)]
pub struct WarningBanner {
    visible: bool,
    last_announced_secs: Option<i64>,
}

impl WarningBanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn update(&mut self, check: &Check) -> Option<String> {
        match check.state {
            SessionState::Warning => {
                let secs = (check.remaining_ms + 999) / 1000;
                if !self.visible {
                    self.visible = true;
                    self.last_announced_secs = Some(secs);
                    return Some(banner_text(secs * 1000));
                }
                let announce = secs <= 10 || secs % 60 == 0;
                if announce && self.last_announced_secs != Some(secs) {
                    self.last_announced_secs = Some(secs);
                    return Some(format!(
                        "Session expires in {}",
                        format_remaining(secs * 1000)
                    ));
                }
                None
            }
            SessionState::Active => {
                self.visible = false;
                self.last_announced_secs = None;
                None
            }
            SessionState::Expired => {
                self.visible = false;
                self.last_announced_secs = None;
                check.ended.map(|reason| ended_text(reason).to_string())
            }
        }
    }
}

fn banner_text(remaining_ms: i64) -> String {
    format!(
        "Session expiring soon: your session will expire in {} due to inactivity.\n\
         Type 'extend' to stay signed in or 'logout' to sign out now.",
        format_remaining(remaining_ms)
    )
}

/// Message shown when a session ends without the user asking
pub fn ended_text(reason: LogoutReason) -> &'static str {
    match reason {
        LogoutReason::Expired => "Session expired due to inactivity. Please log in again.",
        LogoutReason::SignedOutElsewhere => "Signed out from another console.",
        LogoutReason::Unauthorized => "The server rejected your session. Please log in again.",
        LogoutReason::MalformedState => "Stored session was unreadable. Please log in again.",
        LogoutReason::User => "Logged out.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(state: SessionState, remaining_ms: i64) -> Check {
        Check {
            previous: SessionState::Active,
            state,
            remaining_ms,
            ended: None,
        }
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(5 * 60_000), "05:00");
        assert_eq!(format_remaining(4 * 60_000 + 59_999), "04:59");
        assert_eq!(format_remaining(9_000), "00:09");
        assert_eq!(format_remaining(-10), "00:00");
    }

    #[test]
    fn test_banner_shows_once_then_countdown() {
        let mut banner = WarningBanner::new();
        assert!(banner.update(&check(SessionState::Active, 400_000)).is_none());

        let first = banner.update(&check(SessionState::Warning, 299_000)).unwrap();
        assert!(first.contains("04:59"));
        assert!(first.contains("extend"));
        assert!(banner.is_visible());

        // Mid-minute ticks stay quiet
        assert!(banner.update(&check(SessionState::Warning, 250_000)).is_none());
        let minute = banner.update(&check(SessionState::Warning, 240_000)).unwrap();
        assert_eq!(minute, "Session expires in 04:00");
        // Same second again is not repeated
        assert!(banner.update(&check(SessionState::Warning, 239_500)).is_none());
        assert!(banner.update(&check(SessionState::Warning, 9_000)).is_some());
    }

    #[test]
    fn test_countdown_text_matches_announced_second() {
        let mut banner = WarningBanner::new();
        banner.update(&check(SessionState::Warning, 250_000));
        let minute = banner.update(&check(SessionState::Warning, 239_500)).unwrap();
        assert_eq!(minute, "Session expires in 04:00");
        let last = banner.update(&check(SessionState::Warning, 500)).unwrap();
        assert_eq!(last, "Session expires in 00:01");
    }

    #[test]
    fn test_banner_dismissed_on_extend() {
        let mut banner = WarningBanner::new();
        banner.update(&check(SessionState::Warning, 100_000));
        assert!(banner.update(&check(SessionState::Active, 1_800_000)).is_none());
        assert!(!banner.is_visible());
        // Re-entering the warning shows the full banner again
        let again = banner.update(&check(SessionState::Warning, 200_000)).unwrap();
        assert!(again.starts_with("Session expiring soon"));
    }

    #[test]
    fn test_banner_on_expiry() {
        let mut banner = WarningBanner::new();
        banner.update(&check(SessionState::Warning, 1_000));
        let expired = Check {
            ended: Some(LogoutReason::Expired),
            ..check(SessionState::Expired, 0)
        };
        let text = banner.update(&expired).unwrap();
        assert!(text.contains("expired due to inactivity"));
        assert!(!banner.is_visible());
    }
}
