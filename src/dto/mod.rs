use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod health;
pub mod session;
pub mod sse;
pub mod validation;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

impl sse::SessionErrorEvent {
    /// Failure of session `code` stamped with the current time.
    pub fn now(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
            occurred_at: format_system_time(SystemTime::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn formats_rfc3339() {
        let time = UNIX_EPOCH + Duration::from_secs(86_400);
        assert_eq!(format_system_time(time), "1970-01-02T00:00:00Z");
    }
}
