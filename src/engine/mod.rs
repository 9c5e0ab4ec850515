mod availability;
mod confirmation;
mod error;
mod mutations;
mod queries;
mod recurrence;

pub use availability::day_availability;
pub use confirmation::Response;
pub use error::EngineError;
pub use recurrence::{next_on_or_after, occurrence_dates};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

pub type SharedDay = Arc<RwLock<DayState>>;
pub type SharedFixed = Arc<RwLock<FixedBooking>>;

// ── Group-commit journal channel ─────────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Appends that queue up while one batch is being written
/// are committed together with a single fsync.
async fn journal_writer(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    // Set once a failed batch could not be rolled back; the file can no
    // longer be trusted to match what callers were told.
    let mut broken: Option<String> = None;
    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    let mut batch = vec![(event, response)];
                    loop {
                        match rx.try_recv() {
                            Ok(WalCommand::Append { event, response }) => {
                                batch.push((event, response))
                            }
                            Ok(other) => {
                                next = Some(other);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    match &broken {
                        Some(why) => refuse_batch(batch, why),
                        None => broken = commit_batch(&mut wal, batch),
                    }
                }
                WalCommand::Compact { events, response } => {
                    let result = match &broken {
                        Some(why) => Err(io::Error::other(why.clone())),
                        None => Wal::write_snapshot(wal.path(), &events)
                            .and_then(|()| wal.swap_snapshot()),
                    };
                    let _ = response.send(result);
                }
                WalCommand::AppendsSinceCompact { response } => {
                    let _ = response.send(wal.appends_since_compact());
                }
            }
        }
    }
}

fn refuse_batch(batch: Vec<PendingAppend>, why: &str) {
    for (_, tx) in batch {
        let _ = tx.send(Err(io::Error::other(why.to_string())));
    }
}

/// Write and fsync one batch. On failure every caller gets the error and
/// the file is cut back to its last synced length, so a record whose caller
/// saw an error never comes back on replay. Returns a reason if even that
/// rollback failed.
fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) -> Option<String> {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    let mut broken = None;
    if let Err(e) = &result {
        warn!(records = batch.len(), "journal batch failed: {e}");
        if let Err(rollback) = wal.rollback() {
            error!("journal rollback failed, refusing further writes: {rollback}");
            broken = Some(format!("journal unusable after failed rollback: {rollback}"));
        }
    }

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
    broken
}

/// The reservation engine: every booking and fixed booking, kept in memory
/// and made durable through the journal before any change becomes visible.
pub struct Engine {
    pub(super) days: DashMap<NaiveDate, SharedDay>,
    pub(super) fixed: DashMap<Ulid, SharedFixed>,
    /// user id → keys of the bookings they hold.
    pub(super) owner_index: DashMap<String, BTreeSet<SlotKey>>,
    /// Serializes promotions so the duplicate check and the insert are atomic.
    pub(super) promote_lock: Mutex<()>,
    /// Mutations hold this shared; compaction holds it exclusively.
    pub(super) gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
}

fn index_add(index: &DashMap<String, BTreeSet<SlotKey>>, booking: &Booking) {
    if let Some(user) = &booking.owner.user_id {
        index.entry(user.clone()).or_default().insert(booking.key.clone());
    }
}

fn index_remove(index: &DashMap<String, BTreeSet<SlotKey>>, booking: &Booking) {
    if let Some(user) = &booking.owner.user_id {
        index.remove_if_mut(user, |_, keys| {
            keys.remove(&booking.key);
            keys.is_empty()
        });
    }
}

/// Apply the part of `event` that concerns `day` (no locking; caller holds
/// the day's write lock).
pub(super) fn apply_to_day(
    day: &mut DayState,
    event: &Event,
    index: &DashMap<String, BTreeSet<SlotKey>>,
) {
    match event {
        Event::BookingReserved { booking } => {
            if booking.key.date == day.date {
                index_add(index, booking);
                day.insert(booking.clone());
            }
        }
        Event::BookingMoved { from, booking } => {
            if from.date == day.date
                && let Some(old) = day.remove(from)
            {
                index_remove(index, &old);
            }
            if booking.key.date == day.date {
                index_add(index, booking);
                day.insert(booking.clone());
            }
        }
        Event::BookingConfirmed { key, at } => {
            if let Some(b) = day.get_mut(key) {
                b.status = BookingStatus::Confirmed;
                b.confirmed_at = Some(*at);
            }
        }
        Event::BookingReleased { key } => {
            if let Some(old) = day.remove(key) {
                index_remove(index, &old);
            }
        }
        Event::FixedPromoted { fixed, from } => {
            if let Some(b) = day.get_mut(from) {
                b.origin = Origin::Fixed(fixed.id);
            }
        }
        Event::FixedRestored { .. } | Event::FixedStatusChanged { .. } => {}
    }
}

/// Apply a status change to a fixed booking (caller holds its write lock).
pub(super) fn apply_to_fixed(fixed: &mut FixedBooking, event: &Event) {
    if let Event::FixedStatusChanged { id, status, cancelled_by, at } = event
        && fixed.id == *id
    {
        fixed.status = *status;
        if cancelled_by.is_some() {
            fixed.cancelled_by = *cancelled_by;
        }
        fixed.updated_at = *at;
    }
}

/// Days whose state an event touches.
fn event_dates(event: &Event) -> Vec<NaiveDate> {
    match event {
        Event::BookingReserved { booking } => vec![booking.key.date],
        Event::BookingMoved { from, booking } if from.date != booking.key.date => {
            vec![from.date, booking.key.date]
        }
        Event::BookingMoved { from, .. } => vec![from.date],
        Event::BookingConfirmed { key, .. } | Event::BookingReleased { key } => vec![key.date],
        Event::FixedPromoted { from, .. } => vec![from.date],
        Event::FixedRestored { .. } | Event::FixedStatusChanged { .. } => Vec::new(),
    }
}

impl Engine {
    /// Replay the journal at `wal_path` and start its writer task. Must be
    /// called from within a tokio runtime.
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let replay = Wal::replay::<Event>(&wal_path)?;
        if replay.torn_tail {
            warn!(
                path = %wal_path.display(),
                recovered = replay.records.len(),
                "journal ends in a damaged record; discarding the tail"
            );
            Wal::discard_tail(&wal_path, replay.valid_len)?;
        }

        // Rebuild into plain maps first; nothing else can see them yet.
        let owner_index = DashMap::new();
        let mut days: BTreeMap<NaiveDate, DayState> = BTreeMap::new();
        let mut fixed: HashMap<Ulid, FixedBooking> = HashMap::new();
        for event in &replay.records {
            for date in event_dates(event) {
                let day = days.entry(date).or_insert_with(|| DayState::new(date));
                apply_to_day(day, event, &owner_index);
            }
            match event {
                Event::FixedPromoted { fixed: f, .. } | Event::FixedRestored { fixed: f } => {
                    fixed.insert(f.id, f.clone());
                }
                Event::FixedStatusChanged { id, .. } => {
                    if let Some(f) = fixed.get_mut(id) {
                        apply_to_fixed(f, event);
                    }
                }
                _ => {}
            }
        }

        info!(
            records = replay.records.len(),
            days = days.len(),
            fixed = fixed.len(),
            "journal replayed"
        );

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer(wal, wal_rx));

        Ok(Self {
            days: days
                .into_iter()
                .map(|(date, day)| (date, Arc::new(RwLock::new(day))))
                .collect(),
            fixed: fixed
                .into_iter()
                .map(|(id, f)| (id, Arc::new(RwLock::new(f))))
                .collect(),
            owner_index,
            promote_lock: Mutex::new(()),
            gate: RwLock::new(()),
            wal_tx,
            clock,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Journal `event`, then apply it to the locked day.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DayState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event, &self.owner_index);
        Ok(())
    }

    /// The day's state, created empty on first use.
    pub(super) fn day(&self, date: NaiveDate) -> SharedDay {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    pub(super) fn get_day(&self, date: NaiveDate) -> Option<SharedDay> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    pub(super) fn get_fixed_shared(&self, id: &Ulid) -> Option<SharedFixed> {
        self.fixed.get(id).map(|e| e.value().clone())
    }

    /// Arcs of every fixed booking, collected before any lock is awaited.
    pub(super) fn fixed_handles(&self) -> Vec<SharedFixed> {
        self.fixed.iter().map(|e| e.value().clone()).collect()
    }

    pub(super) fn day_handles(&self) -> Vec<SharedDay> {
        self.days.iter().map(|e| e.value().clone()).collect()
    }
}
