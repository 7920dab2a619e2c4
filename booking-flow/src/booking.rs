use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// What kind of reservation is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Course,
    StudioSession,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Course => "course",
            Category::StudioSession => "studio_session",
        }
    }

    /// Human-facing label used in replies and notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Course => "course",
            Category::StudioSession => "studio session",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "course" => Some(Category::Course),
            "studio_session" => Some(Category::StudioSession),
            _ => None,
        }
    }
}

/// Lifecycle of a submitted booking. Transitions move from `Pending` to a
/// terminal value; the repository is the sole arbiter of the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "rejected" => Some(BookingStatus::Rejected),
            _ => None,
        }
    }
}

/// A durably stored reservation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub phone: String,
    pub category: Category,
    pub details: String,
    pub preferred_time: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a booking. Name, phone and category must be
/// non-empty by the time the conversation engine submits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub owner_id: i64,
    pub name: String,
    pub phone: String,
    pub category: Category,
    pub details: String,
    pub preferred_time: String,
}

/// Durable store of submitted bookings.
///
/// `create` returns the identifier assigned to the new row directly, so a
/// decision arriving later can be correlated without re-querying by owner.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create(&self, booking: NewBooking) -> Result<i64>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Booking>>;
    /// Returns `false` when no booking with that id exists.
    async fn set_status(&self, id: i64, status: BookingStatus) -> Result<bool>;
    /// All bookings, newest first.
    async fn list_all(&self) -> Result<Vec<Booking>>;
    async fn list_pending(&self) -> Result<Vec<Booking>>;
    async fn count(&self) -> Result<u64>;
}

/// In-memory implementation of `BookingRepository`.
pub struct InMemoryBookingRepository {
    bookings: Arc<DashMap<i64, Booking>>,
    next_id: AtomicI64,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self {
            bookings: Arc::new(DashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryBookingRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn create(&self, booking: NewBooking) -> Result<i64> {
        if booking.name.trim().is_empty() || booking.phone.trim().is_empty() {
            return Err(FlowError::Repository(
                "name and phone must be non-empty".to_string(),
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.bookings.insert(
            id,
            Booking {
                id,
                owner_id: booking.owner_id,
                name: booking.name,
                phone: booking.phone,
                category: booking.category,
                details: booking.details,
                preferred_time: booking.preferred_time,
                status: BookingStatus::Pending,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Booking>> {
        Ok(self.bookings.get(&id).map(|entry| entry.clone()))
    }

    async fn set_status(&self, id: i64, status: BookingStatus) -> Result<bool> {
        // The entry guard serializes concurrent updates to the same id.
        match self.bookings.get_mut(&id) {
            Some(mut entry) => {
                entry.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_all(&self) -> Result<Vec<Booking>> {
        let mut all: Vec<Booking> = self
            .bookings
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    async fn list_pending(&self) -> Result<Vec<Booking>> {
        let mut pending: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|entry| entry.status == BookingStatus::Pending)
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(pending)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.bookings.len() as u64)
    }
}
