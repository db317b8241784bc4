//! `/health` endpoint body.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use pairline_core::{SessionIdentity, SessionSnapshot};

#[derive(Debug, Clone, Serialize)]
pub struct SessionHealth {
    /// Identity of the active session, `null` when none is active.
    pub identity: Option<String>,
    /// Rendered status, as observers see it.
    pub status: String,
    pub challenge_pending: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    /// Currently attached stream observers.
    pub subscribers: usize,
    pub session: SessionHealth,
}

pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    subscribers: usize,
    identity: Option<&SessionIdentity>,
    snapshot: &SessionSnapshot,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        started_at,
        uptime_secs: start_time.elapsed().as_secs(),
        subscribers,
        session: SessionHealth {
            identity: identity.map(|i| i.as_str().to_string()),
            status: snapshot.status.to_string(),
            challenge_pending: snapshot.challenge.is_some(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairline_core::{ChallengeArtifact, SessionStatus};

    #[test]
    fn idle_server() {
        let resp = health_check(
            Instant::now(),
            Utc::now(),
            0,
            None,
            &SessionSnapshot::initializing(),
        );
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
        assert_eq!(resp.session.identity, None);
        assert_eq!(resp.session.status, "INITIALIZING");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, Utc::now(), 0, None, &SessionSnapshot::default());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn reports_session_state() {
        let snapshot = SessionSnapshot::initializing().transition(SessionStatus::ChallengePending {
            challenge: ChallengeArtifact::new("ABC123"),
        });
        let identity = SessionIdentity::from_raw("default");
        let resp = health_check(Instant::now(), Utc::now(), 3, Some(&identity), &snapshot);

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["subscribers"], 3);
        assert_eq!(json["session"]["identity"], "default");
        assert_eq!(json["session"]["status"], "QR_RECEIVED");
        assert_eq!(json["session"]["challenge_pending"], true);
        assert!(json["started_at"].is_string());
    }
}
