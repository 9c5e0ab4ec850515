use std::sync::{mpsc, Arc, Mutex};

use chrono::{DateTime, FixedOffset, NaiveDate};
use tokio::sync::oneshot;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use slotkeeper::clock::{offset_from_hours, Clock, FixedClock};
use slotkeeper::coordinator::{BookingError, Coordinator, Settings};
use slotkeeper::engine::Engine;
use slotkeeper::model::*;
use slotkeeper::profile::{InMemoryProfiles, Profile};
use slotkeeper::schedule::{InMemorySchedule, WeeklySchedule};

/// A fixed clock that, once armed, stops the next caller of `now()` until
/// the test lets it go. Used to hold a request between its ownership
/// pre-check and the write that follows.
struct GatedClock {
    inner: FixedClock,
    parked: Mutex<Option<oneshot::Sender<()>>>,
    resume: Mutex<Option<mpsc::Receiver<()>>>,
}

impl GatedClock {
    fn new(inner: FixedClock) -> Self {
        Self {
            inner,
            parked: Mutex::new(None),
            resume: Mutex::new(None),
        }
    }

    /// Returns a receiver that fires once a caller is parked, and a sender
    /// that releases it.
    fn arm(&self) -> (oneshot::Receiver<()>, mpsc::Sender<()>) {
        let (parked_tx, parked_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        *self.parked.lock().unwrap() = Some(parked_tx);
        *self.resume.lock().unwrap() = Some(resume_rx);
        (parked_rx, resume_tx)
    }
}

impl Clock for GatedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let parked = self.parked.lock().unwrap().take();
        if let Some(parked) = parked {
            let resume = self.resume.lock().unwrap().take().unwrap();
            let _ = parked.send(());
            let _ = resume.recv();
        }
        self.inner.now()
    }
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

fn member(first: &str, is_admin: bool) -> Profile {
    Profile {
        first_name: first.into(),
        last_name: "Test".into(),
        phone: "555-0100".into(),
        is_admin,
        ..Profile::default()
    }
}

fn gated_club() -> (Arc<GatedClock>, Arc<Coordinator>) {
    let dir = std::env::temp_dir().join(format!("slotkeeper_race_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();

    let clock = Arc::new(GatedClock::new(FixedClock::at_local(
        monday(),
        10,
        0,
        offset_from_hours(-3),
    )));
    let engine = Arc::new(Engine::new(dir.join("slotkeeper.wal"), clock.clone()).unwrap());

    let profiles = Arc::new(InMemoryProfiles::new());
    profiles.insert("x", member("Ximena", false));
    profiles.insert("y", member("Yago", false));
    profiles.insert("admin", member("Alma", true));
    let schedule = Arc::new(InMemorySchedule::new().with_resource("A", WeeklySchedule::default()));

    let coordinator = Arc::new(Coordinator::new(engine, profiles, schedule, Settings::default()));
    (clock, coordinator)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_cancel_cannot_remove_the_next_holders_booking() {
    let (clock, c) = gated_club();
    let key = SlotKey::new(monday(), "A", 18);
    assert_ok!(c.book("x", monday(), "A", 18).await);

    // X's cancel reads its own booking, then stalls at the cutoff check.
    let (parked, resume) = clock.arm();
    let stale = {
        let c = c.clone();
        let key = key.clone();
        tokio::spawn(async move { c.cancel("x", &key).await })
    };
    parked.await.unwrap();

    // Meanwhile the slot changes hands.
    assert_ok!(c.admin_cancel("admin", &key).await);
    let theirs = assert_ok!(c.book("y", monday(), "A", 18).await);

    resume.send(()).unwrap();
    let err = assert_err!(stale.await.unwrap());
    assert_eq!(err, BookingError::NotOwner);
    assert_eq!(c.engine().get_booking(&key).await, Some(theirs));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_cancel_still_removes_its_own_booking() {
    let (clock, c) = gated_club();
    let key = SlotKey::new(monday(), "A", 18);
    assert_ok!(c.book("x", monday(), "A", 18).await);

    let (parked, resume) = clock.arm();
    let cancel = {
        let c = c.clone();
        let key = key.clone();
        tokio::spawn(async move { c.cancel("x", &key).await })
    };
    parked.await.unwrap();
    resume.send(()).unwrap();

    assert_ok!(cancel.await.unwrap());
    assert!(c.engine().get_booking(&key).await.is_none());
}

#[tokio::test]
async fn promote_of_someone_elses_booking_is_refused() {
    let (_clock, c) = gated_club();
    let booking = assert_ok!(c.book("y", monday(), "A", 18).await);

    assert_eq!(
        assert_err!(c.promote_to_fixed("x", &booking.key).await),
        BookingError::NotOwner
    );
    assert!(c.engine().fixed_bookings().await.is_empty());
    assert_eq!(c.engine().get_booking(&booking.key).await, Some(booking));
}
