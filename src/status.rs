//! Serializable status reports for the control plane

use std::net::SocketAddr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::ClockQuality;
use crate::session::SessionState;

/// Read-only view of one speaker session, published by its task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub endpoint_id: Uuid,
    pub address: SocketAddr,
    pub state: SessionState,
    /// Admitted to the stream (streams whenever it is synchronised)
    pub admitted: bool,
    pub clock_quality: ClockQuality,
    pub clock_offset_us: f64,
    pub clock_drift_ppm: f64,
    pub srtt_us: Option<f64>,
    pub rttvar_us: f64,
    /// Delay bound used for the fleet lookahead
    pub network_delay_us: Option<u64>,
    pub loss_rate: f32,
    pub redundancy: u8,
    pub outstanding_groups: usize,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub units_sent: u64,
    pub groups_acked: u64,
    pub groups_expired: u64,
    pub groups_unrecoverable: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Stream-level metrics plus every session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub generated_at: DateTime<Utc>,
    /// Sessions in `Streaming` or `Degraded`
    pub active_speakers: usize,
    pub registered_speakers: usize,
    /// Last presentation timestamp handed out
    pub current_pts: Option<u64>,
    pub lookahead_us: u64,
    pub frames_submitted: u64,
    pub sessions: Vec<SessionStatus>,
}

/// Wall-clock time of an event `age_us` microseconds ago
pub fn wall_clock_ago(age_us: u64) -> DateTime<Utc> {
    Utc::now() - Duration::microseconds(age_us.min(i64::MAX as u64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_status_json() {
        let status = StreamStatus {
            generated_at: Utc::now(),
            active_speakers: 0,
            registered_speakers: 0,
            current_pts: Some(42),
            lookahead_us: 30_000,
            frames_submitted: 1,
            sessions: Vec::new(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"lookahead_us\":30000"));

        let back: StreamStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_wall_clock_ago() {
        let then = wall_clock_ago(2_000_000);
        let age = Utc::now() - then;
        assert!(age >= Duration::seconds(2));
        assert!(age < Duration::seconds(3));
    }
}
