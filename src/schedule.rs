use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::ops::Range;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::model::{weekday_index, WeekdayIndex};

/// Opening hours for one weekday. `close` may be 24 (open until midnight);
/// `open >= close` means closed all day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: u8,
    pub close: u8,
}

impl DayHours {
    pub const CLOSED: DayHours = DayHours { open: 0, close: 0 };

    /// Start hours of the bookable slots.
    pub fn hours(&self) -> Range<u8> {
        let close = self.close.min(24);
        if self.open >= close { 0..0 } else { self.open..close }
    }

    pub fn contains(&self, hour: u8) -> bool {
        self.hours().contains(&hour)
    }
}

/// Weekly opening hours of one resource, keyed by weekday (0 = Sunday).
/// A missing weekday is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklySchedule {
    days: BTreeMap<WeekdayIndex, DayHours>,
}

impl WeeklySchedule {
    pub fn new(days: impl IntoIterator<Item = (WeekdayIndex, DayHours)>) -> Self {
        Self {
            days: days.into_iter().collect(),
        }
    }

    pub fn for_weekday(&self, weekday: WeekdayIndex) -> DayHours {
        self.days.get(&weekday).copied().unwrap_or(DayHours::CLOSED)
    }

    pub fn for_date(&self, date: NaiveDate) -> DayHours {
        self.for_weekday(weekday_index(date))
    }
}

impl Default for WeeklySchedule {
    /// 09-23 Sunday to Thursday, 09-24 Friday and Saturday.
    fn default() -> Self {
        Self::new((0..7).map(|day| {
            let close = if day >= 5 { 24 } else { 23 };
            (day, DayHours { open: 9, close })
        }))
    }
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Known resources, in display order.
    async fn resources(&self) -> Vec<String>;

    /// `None` for an unknown resource.
    async fn weekly_schedule(&self, resource_id: &str) -> Option<WeeklySchedule>;

    async fn holidays(&self) -> BTreeSet<NaiveDate>;

    /// Whether `hour` on `date` is inside the resource's opening hours and
    /// the date is not a holiday.
    async fn is_open(&self, date: NaiveDate, resource_id: &str, hour: u8) -> bool {
        let Some(schedule) = self.weekly_schedule(resource_id).await else {
            return false;
        };
        !self.holidays().await.contains(&date) && schedule.for_date(date).contains(hour)
    }
}

/// On-disk shape of a schedule file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ScheduleFile {
    resources: BTreeMap<String, WeeklySchedule>,
    #[serde(default)]
    holidays: BTreeSet<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct InMemorySchedule {
    resources: DashMap<String, WeeklySchedule>,
    holidays: DashSet<NaiveDate>,
}

impl InMemorySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(self, resource_id: impl Into<String>, schedule: WeeklySchedule) -> Self {
        self.set_resource(resource_id, schedule);
        self
    }

    pub fn set_resource(&self, resource_id: impl Into<String>, schedule: WeeklySchedule) {
        self.resources.insert(resource_id.into(), schedule);
    }

    pub fn add_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.insert(date)
    }

    pub fn remove_holiday(&self, date: &NaiveDate) -> bool {
        self.holidays.remove(date).is_some()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: ScheduleFile = serde_json::from_str(json)?;
        let schedule = Self::new();
        for (id, weekly) in file.resources {
            schedule.set_resource(id, weekly);
        }
        for date in file.holidays {
            schedule.add_holiday(date);
        }
        Ok(schedule)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[async_trait]
impl ScheduleStore for InMemorySchedule {
    async fn resources(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.resources.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn weekly_schedule(&self, resource_id: &str) -> Option<WeeklySchedule> {
        self.resources.get(resource_id).map(|e| e.value().clone())
    }

    async fn holidays(&self) -> BTreeSet<NaiveDate> {
        self.holidays.iter().map(|d| *d).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_hours_ranges() {
        assert_eq!(DayHours { open: 9, close: 23 }.hours(), 9..23);
        assert_eq!(DayHours { open: 9, close: 24 }.hours().last(), Some(23));
        assert_eq!(DayHours { open: 18, close: 18 }.hours().count(), 0);
        assert_eq!(DayHours { open: 20, close: 10 }.hours().count(), 0);
        assert!(!DayHours { open: 9, close: 23 }.contains(23));
    }

    #[test]
    fn default_schedule_stays_open_later_on_weekends() {
        let weekly = WeeklySchedule::default();
        assert_eq!(weekly.for_date(date(2024, 3, 4)).close, 23); // Monday
        assert_eq!(weekly.for_date(date(2024, 3, 8)).close, 24); // Friday
        assert_eq!(weekly.for_date(date(2024, 3, 9)).close, 24); // Saturday
        assert_eq!(weekly.for_date(date(2024, 3, 10)).close, 23); // Sunday
    }

    #[test]
    fn missing_weekday_is_closed() {
        let weekly = WeeklySchedule::new([(1, DayHours { open: 9, close: 12 })]);
        assert_eq!(weekly.for_weekday(2), DayHours::CLOSED);
        assert_eq!(weekly.for_weekday(1).hours(), 9..12);
    }

    #[tokio::test]
    async fn loads_from_json() {
        let json = r#"{
            "resources": {
                "A": { "1": { "open": 8, "close": 12 } },
                "B": { "0": { "open": 9, "close": 23 }, "2": { "open": 18, "close": 22 } }
            },
            "holidays": ["2024-12-25"]
        }"#;
        let store = InMemorySchedule::from_json(json).unwrap();

        assert_eq!(store.resources().await, vec!["A".to_string(), "B".to_string()]);
        let b = store.weekly_schedule("B").await.unwrap();
        assert_eq!(b.for_weekday(2).hours(), 18..22);
        assert!(store.holidays().await.contains(&date(2024, 12, 25)));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(InMemorySchedule::from_json("{\"resources\": 3}").is_err());
    }

    #[tokio::test]
    async fn is_open_honours_schedule_and_holidays() {
        let store = InMemorySchedule::new().with_resource("A", WeeklySchedule::default());
        let monday = date(2024, 3, 4);

        assert!(store.is_open(monday, "A", 18).await);
        assert!(!store.is_open(monday, "A", 8).await);
        assert!(!store.is_open(monday, "A", 23).await);
        assert!(!store.is_open(monday, "ghost", 18).await);

        store.add_holiday(monday);
        assert!(!store.is_open(monday, "A", 18).await);
        assert!(store.remove_holiday(&monday));
        assert!(store.is_open(monday, "A", 18).await);
    }
}
