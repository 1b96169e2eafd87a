use thiserror::Error;

use crate::model::{BookingStatus, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Item,
    Booking,
    Request,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::User => "user",
            EntityKind::Item => "item",
            EntityKind::Booking => "booking",
            EntityKind::Request => "request",
        })
    }
}

/// Why a NotFound was raised. Authorization failures surface as NotFound
/// too; the reason keeps them apart for logs and for a future split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    Missing,
    /// Actor does not own the item.
    NotOwner,
    /// Actor is neither the item's owner nor the booking's booker.
    NotOwnerOrBooker,
    /// Actor tried to book an item they own.
    OwnItem,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{}", not_found_message(.kind, .id, .reason))]
    NotFound {
        kind: EntityKind,
        id: Id,
        reason: NotFoundReason,
    },
    #[error("item {item_id} is not available for booking")]
    NotAvailable { item_id: Id },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("booking status already processed: {status}")]
    StatusAlreadyProcessed { status: BookingStatus },
    #[error("Unknown state: {raw}")]
    StateValidation { raw: String },
    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: EntityKind, key: String },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn missing(kind: EntityKind, id: Id) -> Self {
        EngineError::NotFound {
            kind,
            id,
            reason: NotFoundReason::Missing,
        }
    }

    /// `id` names the entity the actor was refused access to.
    pub fn unauthorized(kind: EntityKind, id: Id, reason: NotFoundReason) -> Self {
        EngineError::NotFound { kind, id, reason }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

fn not_found_message(kind: &EntityKind, id: &Id, reason: &NotFoundReason) -> String {
    match reason {
        NotFoundReason::Missing => format!("{kind} {id} not found"),
        NotFoundReason::NotOwner => format!("{kind} {id} not found: actor is not the item owner"),
        NotFoundReason::NotOwnerOrBooker => {
            format!("{kind} {id} not found: actor is neither item owner nor booker")
        }
        NotFoundReason::OwnItem => format!("{kind} {id} not found: owners cannot book their own items"),
    }
}
