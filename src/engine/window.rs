use std::cmp::Reverse;

use crate::model::*;

use super::EngineError;

/// Listing filter, evaluated against "now" at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    All,
    Past,
    Current,
    Future,
    Waiting,
    Rejected,
}

impl BookingState {
    pub const ALL: [BookingState; 6] = [
        BookingState::All,
        BookingState::Past,
        BookingState::Current,
        BookingState::Future,
        BookingState::Waiting,
        BookingState::Rejected,
    ];

    /// Exact, case-sensitive token match.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == raw)
            .ok_or_else(|| EngineError::StateValidation {
                raw: raw.to_string(),
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::All => "ALL",
            BookingState::Past => "PAST",
            BookingState::Current => "CURRENT",
            BookingState::Future => "FUTURE",
            BookingState::Waiting => "WAITING",
            BookingState::Rejected => "REJECTED",
        }
    }

    pub fn matches(&self, booking: &Booking, now: Ms) -> bool {
        match self {
            BookingState::All => true,
            BookingState::Past => booking.span.end < now,
            BookingState::Current => booking.span.contains_instant(now),
            BookingState::Future => booking.span.start > now,
            BookingState::Waiting => booking.status == BookingStatus::Waiting,
            BookingState::Rejected => booking.status == BookingStatus::Rejected,
        }
    }
}

/// Greatest `end` among bookings that ended before `now`; lowest id on ties.
pub fn last_booking(state: &ItemState, now: Ms) -> Option<&Booking> {
    state
        .bookings
        .iter()
        .filter(|b| b.span.end < now)
        .min_by_key(|b| (Reverse(b.span.end), b.id))
}

/// Smallest `start` among bookings starting after `now`; lowest id on ties.
pub fn next_booking(state: &ItemState, now: Ms) -> Option<&Booking> {
    let upcoming = state.starting_after(now);
    let first_start = upcoming.first()?.span.start;
    upcoming
        .iter()
        .take_while(|b| b.span.start == first_start)
        .min_by_key(|b| b.id)
}
