use chrono::{DateTime, Duration, Utc};

use crate::db::SeatmapRecord;
use crate::settings::PipelineSettings;

/// Whether a stored record's image should be fetched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    Fresh,
    Stale,
    /// Below the integrity floor; suspected thumbnail or placeholder.
    Undersized,
    /// Record exists but the cached file is gone.
    Missing,
}

impl Assessment {
    pub fn needs_refetch(self) -> bool {
        !matches!(self, Assessment::Fresh)
    }

    pub fn label(self) -> &'static str {
        match self {
            Assessment::Fresh => "fresh",
            Assessment::Stale => "stale",
            Assessment::Undersized => "undersized",
            Assessment::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    pub max_age: Duration,
    pub min_bytes: u64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

impl FreshnessPolicy {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_age: Duration::try_hours(settings.freshness_hours).unwrap_or(Duration::MAX),
            min_bytes: settings.min_image_bytes,
        }
    }

    /// Judge the record alone, trusting its recorded size.
    pub fn assess_record(&self, record: &SeatmapRecord, now: DateTime<Utc>) -> Assessment {
        self.assess(record, Some(record.file_size_bytes), now)
    }

    /// Undersized wins over freshness, then a missing file, then age.
    pub fn assess(
        &self,
        record: &SeatmapRecord,
        cached_size: Option<u64>,
        now: DateTime<Utc>,
    ) -> Assessment {
        let size = cached_size.map(|s| s.min(record.file_size_bytes));
        if record.file_size_bytes < self.min_bytes || size.is_some_and(|s| s < self.min_bytes) {
            return Assessment::Undersized;
        }
        if cached_size.is_none() {
            return Assessment::Missing;
        }
        if now - record.downloaded_at > self.max_age {
            return Assessment::Stale;
        }
        Assessment::Fresh
    }
}
