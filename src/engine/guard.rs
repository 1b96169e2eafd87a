use crate::limits::*;
use crate::model::*;

use super::error::{EntityKind, NotFoundReason};
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// How the acting user relates to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActorRole {
    Owner,
    Booker,
    Other,
}

/// Owner is taken from the item's current row, not from anything cached
/// on the booking.
pub(crate) fn actor_role(item: &Item, booking: &Booking, actor: Id) -> ActorRole {
    if item.owner_id == actor {
        ActorRole::Owner
    } else if booking.booker_id == actor {
        ActorRole::Booker
    } else {
        ActorRole::Other
    }
}

pub(crate) fn ensure_available(item: &Item) -> Result<(), EngineError> {
    if !item.available {
        return Err(EngineError::NotAvailable { item_id: item.id });
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if !span.is_ordered() {
        return Err(EngineError::validation(format!(
            "booking end {} must be after start {}",
            span.end, span.start
        )));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn ensure_not_owner(item: &Item, actor: Id) -> Result<(), EngineError> {
    if item.owner_id == actor {
        return Err(EngineError::unauthorized(
            EntityKind::Item,
            item.id,
            NotFoundReason::OwnItem,
        ));
    }
    Ok(())
}

pub(crate) fn ensure_owner(item: &Item, actor: Id) -> Result<(), EngineError> {
    if item.owner_id != actor {
        return Err(EngineError::unauthorized(
            EntityKind::Item,
            item.id,
            NotFoundReason::NotOwner,
        ));
    }
    Ok(())
}

/// WAITING is the only state with outgoing transitions.
pub(crate) fn ensure_waiting(booking: &Booking) -> Result<(), EngineError> {
    if booking.status.is_terminal() {
        return Err(EngineError::StatusAlreadyProcessed {
            status: booking.status,
        });
    }
    Ok(())
}

/// Comment rights need a booking by `author` on this item that started
/// strictly before `now`. Booking status is not considered.
pub(crate) fn ensure_may_comment(state: &ItemState, author: Id, now: Ms) -> Result<(), EngineError> {
    let eligible = state
        .bookings
        .iter()
        .any(|b| b.booker_id == author && b.span.start < now);
    if !eligible {
        return Err(no_started_booking(author, state.item.id));
    }
    Ok(())
}

/// Also raised for an item that does not exist: nobody can have booked it.
pub(crate) fn no_started_booking(author: Id, item_id: Id) -> EngineError {
    EngineError::validation(format!("user {author} has no started booking of item {item_id}"))
}

pub(crate) fn require_text(field: &str, value: &str, max_len: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(format!("{field} must not be blank")));
    }
    if value.len() > max_len {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), EngineError> {
    require_text("email", email, MAX_EMAIL_LEN)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(EngineError::validation(format!("malformed email: {email}"))),
    }
}
