//! A reservation service that lives in memory.
//!
//! Inventory follows the same rules as the real service: one unit per hold,
//! holds scoped to a session, capacity per room type. On top of that the
//! backend records every call in a journal and lets a test inject a failure,
//! a delay or a hang into the next call of a given kind.

use chrono::{DateTime, Utc};
use roomhold_core::BookingError;
use roomhold_core::backend::{
    BackendFuture, BookingSummary, HoldGrant, HoldRequest, ReservationBackend, SessionGrant,
};
use roomhold_core::environment::Clock;
use roomhold_core::types::{HoldId, Money, RoomTypeId, SessionId, StayDates};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Kinds of calls, used to target failure injection and count calls
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `create_session`
    CreateSession,
    /// `acquire_hold`
    AcquireHold,
    /// `release_hold`
    ReleaseHold,
    /// `release_all_holds`
    ReleaseAllHolds,
    /// `summary`
    Summary,
}

/// One entry of the call journal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    /// A session was requested for these dates
    CreateSession(StayDates),
    /// A hold was requested
    AcquireHold {
        /// Session in the request
        session_id: SessionId,
        /// Room type in the request
        room_type: RoomTypeId,
    },
    /// A hold release was requested
    ReleaseHold(HoldId),
    /// A session-wide release was requested
    ReleaseAllHolds(SessionId),
    /// A price summary was requested
    Summary(Vec<HoldId>),
}

impl BackendCall {
    /// Kind of this call
    #[must_use]
    pub const fn kind(&self) -> CallKind {
        match self {
            Self::CreateSession(_) => CallKind::CreateSession,
            Self::AcquireHold { .. } => CallKind::AcquireHold,
            Self::ReleaseHold(_) => CallKind::ReleaseHold,
            Self::ReleaseAllHolds(_) => CallKind::ReleaseAllHolds,
            Self::Summary(_) => CallKind::Summary,
        }
    }
}

#[derive(Clone, Debug)]
enum Injection {
    Fail(BookingError),
    Delay(Duration),
    Hang,
}

#[derive(Clone, Debug)]
struct HeldUnit {
    session_id: SessionId,
    room_type: RoomTypeId,
    dates: StayDates,
    expires_at: DateTime<Utc>,
    unit_price: Money,
}

#[derive(Clone, Copy, Debug)]
struct Inventory {
    capacity: u32,
    unit_price: Money,
}

#[derive(Debug, Default)]
struct Books {
    room_types: BTreeMap<RoomTypeId, Inventory>,
    sessions: HashMap<SessionId, StayDates>,
    holds: BTreeMap<HoldId, HeldUnit>,
    next_session: u64,
    next_hold: u64,
    journal: Vec<BackendCall>,
    injections: Vec<(CallKind, Injection)>,
    session_deadline: Option<String>,
}

impl Books {
    fn take_injection(&mut self, kind: CallKind) -> Option<Injection> {
        let index = self.injections.iter().position(|(k, _)| *k == kind)?;
        Some(self.injections.remove(index).1)
    }

    fn held_of(&self, room_type: &RoomTypeId) -> u32 {
        let held = self.holds.values().filter(|h| &h.room_type == room_type).count();
        u32::try_from(held).unwrap_or(u32::MAX)
    }
}

/// In-memory [`ReservationBackend`]
///
/// Hold ids are `h1`, `h2`, … and session ids `s1`, `s2`, … in issue order.
/// Sessions last `session_window` (15 minutes by default) unless a raw
/// deadline is forced with [`InMemoryReservationBackend::with_session_deadline`].
pub struct InMemoryReservationBackend {
    clock: Arc<dyn Clock>,
    session_window: chrono::Duration,
    tax_basis_points: u64,
    books: Mutex<Books>,
}

impl InMemoryReservationBackend {
    /// Creates a backend without any room types
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            session_window: chrono::Duration::minutes(15),
            tax_basis_points: 1_000,
            books: Mutex::new(Books::default()),
        }
    }

    /// Adds a room type with `capacity` units at `unit_price` per night
    #[must_use]
    pub fn with_room_type(self, room_type: impl Into<RoomTypeId>, capacity: u32, unit_price: Money) -> Self {
        self.books().room_types.insert(
            room_type.into(),
            Inventory {
                capacity,
                unit_price,
            },
        );
        self
    }

    /// Sets how long new sessions last
    #[must_use]
    pub fn with_session_window(mut self, window: chrono::Duration) -> Self {
        self.session_window = window;
        self
    }

    /// Sends this raw deadline for every new session instead of a computed one
    #[must_use]
    pub fn with_session_deadline(self, raw: impl Into<String>) -> Self {
        self.books().session_deadline = Some(raw.into());
        self
    }

    /// The next call of `kind` fails with `error`
    pub fn fail_next(&self, kind: CallKind, error: BookingError) {
        self.books().injections.push((kind, Injection::Fail(error)));
    }

    /// The next call of `kind` is answered after `delay`
    pub fn delay_next(&self, kind: CallKind, delay: Duration) {
        self.books().injections.push((kind, Injection::Delay(delay)));
    }

    /// The next call of `kind` never answers
    pub fn hang_next(&self, kind: CallKind) {
        self.books().injections.push((kind, Injection::Hang));
    }

    /// Every call received so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.books().journal.clone()
    }

    /// Number of calls of `kind` received so far
    #[must_use]
    pub fn call_count(&self, kind: CallKind) -> usize {
        self.books().journal.iter().filter(|c| c.kind() == kind).count()
    }

    /// Holds currently open for a session
    #[must_use]
    pub fn holds_of(&self, session_id: &SessionId) -> Vec<HoldId> {
        self.books()
            .holds
            .iter()
            .filter(|(_, unit)| &unit.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Total holds currently open
    #[must_use]
    pub fn open_holds(&self) -> usize {
        self.books().holds.len()
    }

    /// Units of a room type not held by anyone
    #[must_use]
    pub fn available(&self, room_type: &RoomTypeId) -> u32 {
        let books = self.books();
        books
            .room_types
            .get(room_type)
            .map_or(0, |inv| inv.capacity.saturating_sub(books.held_of(room_type)))
    }

    fn books(&self) -> MutexGuard<'_, Books> {
        self.books.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Journals the call and applies any injection targeting it
    async fn intercept(&self, call: BackendCall) -> Result<(), BookingError> {
        let injection = {
            let mut books = self.books();
            let kind = call.kind();
            books.journal.push(call);
            books.take_injection(kind)
        };

        match injection {
            None => Ok(()),
            Some(Injection::Fail(error)) => Err(error),
            Some(Injection::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            },
            Some(Injection::Hang) => std::future::pending().await,
        }
    }

    fn purge_lapsed(&self, books: &mut Books) {
        let now = self.clock.now();
        books.holds.retain(|_, unit| unit.expires_at > now);
    }
}

impl ReservationBackend for InMemoryReservationBackend {
    fn create_session(&self, dates: StayDates) -> BackendFuture<'_, SessionGrant> {
        Box::pin(async move {
            self.intercept(BackendCall::CreateSession(dates)).await?;

            let mut books = self.books();
            books.next_session += 1;
            let session_id = SessionId::new(format!("s{}", books.next_session));
            books.sessions.insert(session_id.clone(), dates);

            let expires_at = books
                .session_deadline
                .clone()
                .unwrap_or_else(|| (self.clock.now() + self.session_window).to_rfc3339());

            Ok(SessionGrant {
                session_id,
                expires_at,
            })
        })
    }

    fn acquire_hold(&self, request: HoldRequest) -> BackendFuture<'_, HoldGrant> {
        Box::pin(async move {
            self.intercept(BackendCall::AcquireHold {
                session_id: request.session_id.clone(),
                room_type: request.room_type.clone(),
            })
            .await?;

            let mut books = self.books();
            self.purge_lapsed(&mut books);

            if !books.sessions.contains_key(&request.session_id) {
                return Err(BookingError::Validation(format!(
                    "unknown session {}",
                    request.session_id
                )));
            }
            let inventory = *books.room_types.get(&request.room_type).ok_or_else(|| {
                BookingError::Capacity(format!("unknown room type {}", request.room_type))
            })?;
            if books.held_of(&request.room_type) >= inventory.capacity {
                return Err(BookingError::Capacity(format!(
                    "no {} rooms left for {}",
                    request.room_type, request.dates
                )));
            }

            books.next_hold += 1;
            let hold_id = HoldId::new(format!("h{}", books.next_hold));
            books.holds.insert(
                hold_id.clone(),
                HeldUnit {
                    session_id: request.session_id,
                    room_type: request.room_type,
                    dates: request.dates,
                    expires_at: request.expires_at,
                    unit_price: inventory.unit_price,
                },
            );

            Ok(HoldGrant {
                hold_id,
                expires_at: Some(request.expires_at.to_rfc3339()),
                unit_price: inventory.unit_price,
            })
        })
    }

    fn release_hold(&self, hold_id: HoldId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.intercept(BackendCall::ReleaseHold(hold_id.clone())).await?;
            // Releasing an unknown or already-lapsed hold is a no-op
            self.books().holds.remove(&hold_id);
            Ok(())
        })
    }

    fn release_all_holds(&self, session_id: SessionId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.intercept(BackendCall::ReleaseAllHolds(session_id.clone())).await?;
            self.books().holds.retain(|_, unit| unit.session_id != session_id);
            Ok(())
        })
    }

    fn summary(&self, hold_ids: Vec<HoldId>) -> BackendFuture<'_, BookingSummary> {
        Box::pin(async move {
            self.intercept(BackendCall::Summary(hold_ids.clone())).await?;

            let books = self.books();
            let mut subtotal = Money::ZERO;
            for id in &hold_ids {
                let unit = books
                    .holds
                    .get(id)
                    .ok_or_else(|| BookingError::Validation(format!("unknown hold {id}")))?;
                subtotal = subtotal.plus(unit.unit_price.times(u64::from(unit.dates.nights())));
            }
            let tax = Money::from_cents(subtotal.cents().saturating_mul(self.tax_basis_points) / 10_000);

            Ok(BookingSummary {
                subtotal,
                tax,
                total: subtotal.plus(tax),
            })
        })
    }
}
