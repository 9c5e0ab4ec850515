use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::engine::Engine;
use crate::observability::WAL_COMPACTIONS_TOTAL;

/// One pass of the rolling window: materialize every active fixed booking.
pub async fn sweep_once(coordinator: &Coordinator) -> usize {
    match coordinator.materialize_all().await {
        Ok(0) => {
            debug!("sweep: nothing to materialize");
            0
        }
        Ok(created) => {
            info!(created, "sweep: occurrences materialized");
            created
        }
        Err(e) => {
            warn!("sweep failed: {e}");
            0
        }
    }
}

/// Background task that keeps fixed bookings materialized as time moves on.
pub async fn run_materializer(coordinator: Arc<Coordinator>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&coordinator).await;
    }
}

/// Compact the journal if at least `threshold` records were appended since
/// the last compaction. Returns whether it compacted.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold.max(1) {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
            info!(appended, "journal compacted");
            true
        }
        Err(e) => {
            warn!("journal compaction failed: {e}");
            false
        }
    }
}

/// Background task that checks the journal for compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{offset_from_hours, FixedClock};
    use crate::coordinator::Settings;
    use crate::model::*;
    use crate::profile::{InMemoryProfiles, Profile};
    use crate::schedule::{InMemorySchedule, WeeklySchedule};
    use chrono::{NaiveDate, TimeDelta};
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotkeeper_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn sweep_rolls_the_window_forward() {
        let path = test_wal_path("sweep_rolls.wal");
        let clock = Arc::new(FixedClock::at_local(date(2024, 3, 4), 10, 0, offset_from_hours(-3)));
        let engine = Arc::new(Engine::new(path, clock.clone()).unwrap());

        let profiles = Arc::new(InMemoryProfiles::new());
        profiles.insert(
            "u1",
            Profile {
                first_name: "Ana".into(),
                last_name: "Paz".into(),
                phone: "1".into(),
                ..Profile::default()
            },
        );
        let schedule = Arc::new(InMemorySchedule::new().with_resource("B", WeeklySchedule::default()));
        let coordinator = Coordinator::new(engine.clone(), profiles, schedule, Settings::default());

        let booked = coordinator.book("u1", date(2024, 3, 5), "B", 20).await.unwrap();
        let promotion = coordinator.promote_to_fixed("u1", &booked.key).await.unwrap();
        assert_eq!(promotion.materialized.len(), 3);

        assert_eq!(sweep_once(&coordinator).await, 0);
        clock.advance(TimeDelta::weeks(2));
        assert_eq!(sweep_once(&coordinator).await, 2);
        assert!(
            engine
                .get_booking(&SlotKey::new(date(2024, 4, 9), "B", 20))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("compact_threshold.wal");
        let clock = Arc::new(FixedClock::at_local(date(2024, 3, 4), 10, 0, offset_from_hours(-3)));
        let engine = Engine::new(path, clock).unwrap();
        let owner = Owner {
            user_id: Some("u1".into()),
            name: "Ana Paz".into(),
            phone: "1".into(),
        };

        for hour in 12..15 {
            let key = SlotKey::new(date(2024, 3, 6), "A", hour);
            engine.reserve(key, owner.clone(), Origin::Direct).await.unwrap();
        }
        assert!(!compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.booking_count().await, 3);
    }
}
