//! Outbound hooks for public announcements

use crate::common::types::RoundId;
use crate::games::patterns::Shape;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// Receives round open/close notifications, e.g. a chat channel or admin feed
#[async_trait]
pub trait RoundAnnouncer: Send + Sync {
    async fn round_opened(&self, round_id: RoundId, display_id: u32, pool: u64, shape: Shape);

    async fn round_ended(&self, round_id: RoundId, winner_description: &str, display_id: u32);
}

/// Writes announcements to the log
pub struct LogAnnouncer;

#[async_trait]
impl RoundAnnouncer for LogAnnouncer {
    async fn round_opened(&self, round_id: RoundId, display_id: u32, pool: u64, shape: Shape) {
        info!(round_id, display_id, pool, %shape, "📣 round #{} is live", display_id);
    }

    async fn round_ended(&self, round_id: RoundId, winner_description: &str, display_id: u32) {
        info!(round_id, display_id, winners = winner_description, "📣 round #{} ended", display_id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Opened { round_id: RoundId, display_id: u32, pool: u64, shape: Shape },
    Ended { round_id: RoundId, description: String, display_id: u32 },
}

/// Keeps every announcement in memory; handy in tests
#[derive(Default)]
pub struct RecordingAnnouncer {
    announcements: Mutex<Vec<Announcement>>,
}

impl RecordingAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announcements(&self) -> Vec<Announcement> {
        self.announcements.lock().map(|list| list.clone()).unwrap_or_default()
    }

    fn push(&self, announcement: Announcement) {
        if let Ok(mut list) = self.announcements.lock() {
            list.push(announcement);
        }
    }
}

#[async_trait]
impl RoundAnnouncer for RecordingAnnouncer {
    async fn round_opened(&self, round_id: RoundId, display_id: u32, pool: u64, shape: Shape) {
        self.push(Announcement::Opened { round_id, display_id, pool, shape });
    }

    async fn round_ended(&self, round_id: RoundId, winner_description: &str, display_id: u32) {
        self.push(Announcement::Ended {
            round_id,
            description: winner_description.to_string(),
            display_id,
        });
    }
}
