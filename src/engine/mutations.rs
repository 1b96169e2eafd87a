use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::error::{EntityKind, NotFoundReason};
use super::guard::{
    actor_role, ensure_available, ensure_may_comment, ensure_not_owner, ensure_owner, ensure_waiting,
    no_started_booking, now_ms, require_text, validate_email, validate_span, ActorRole,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub async fn create_user(&self, name: String, email: String) -> Result<User, EngineError> {
        require_text("name", &name, MAX_NAME_LEN)?;
        validate_email(&email)?;

        let _gate = self.write_gate.read().await;
        let _users = self.user_writes.lock().await;
        if self.store.user_by_email(&email).is_some() {
            return Err(EngineError::AlreadyExists {
                kind: EntityKind::User,
                key: email,
            });
        }

        let id = self.store.seq.users.next();
        let event = Event::UserRegistered {
            id,
            name: name.clone(),
            email: email.clone(),
        };
        self.persist_global(&event).await?;
        debug!(user_id = id, "user registered");
        Ok(User { id, name, email })
    }

    /// Absent fields keep their current value. Re-submitting the user's
    /// own email is not a conflict.
    pub async fn update_user(
        &self,
        id: Id,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<User, EngineError> {
        let _gate = self.write_gate.read().await;
        let _users = self.user_writes.lock().await;
        let current = self.require_user(id)?;

        if let Some(name) = &name {
            require_text("name", name, MAX_NAME_LEN)?;
        }
        if let Some(email) = &email {
            validate_email(email)?;
            if self.store.user_by_email(email).is_some_and(|owner| owner != id) {
                return Err(EngineError::AlreadyExists {
                    kind: EntityKind::User,
                    key: email.clone(),
                });
            }
        }

        let user = User {
            id,
            name: name.unwrap_or(current.name),
            email: email.unwrap_or(current.email),
        };
        let event = Event::UserUpdated {
            id,
            name: user.name.clone(),
            email: user.email.clone(),
        };
        self.persist_global(&event).await?;
        debug!(user_id = id, "user updated");
        Ok(user)
    }

    // ── Items ────────────────────────────────────────────────

    pub async fn create_item(
        &self,
        actor: Id,
        name: String,
        description: String,
        available: bool,
        request_id: Option<Id>,
    ) -> Result<Item, EngineError> {
        let _gate = self.write_gate.read().await;
        self.require_user(actor)?;
        require_text("name", &name, MAX_NAME_LEN)?;
        require_text("description", &description, MAX_DESCRIPTION_LEN)?;
        if let Some(rid) = request_id {
            self.require_request(rid)?;
        }

        let item = Item {
            id: self.store.seq.items.next(),
            owner_id: actor,
            name,
            description,
            available,
            request_id,
        };
        let event = Event::ItemListed {
            id: item.id,
            owner_id: item.owner_id,
            name: item.name.clone(),
            description: item.description.clone(),
            available: item.available,
            request_id: item.request_id,
        };
        self.persist_global(&event).await?;
        debug!(item_id = item.id, owner_id = actor, "item listed");
        Ok(item)
    }

    /// Owner only. The owner itself never changes.
    pub async fn update_item(
        &self,
        actor: Id,
        item_id: Id,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    ) -> Result<Item, EngineError> {
        let _gate = self.write_gate.read().await;
        self.require_user(actor)?;
        let shared = self.require_item(item_id)?;
        let mut guard = shared.write().await;
        ensure_owner(&guard.item, actor)?;

        if let Some(name) = &name {
            require_text("name", name, MAX_NAME_LEN)?;
        }
        if let Some(description) = &description {
            require_text("description", description, MAX_DESCRIPTION_LEN)?;
        }

        let event = Event::ItemUpdated {
            id: item_id,
            name: name.unwrap_or_else(|| guard.item.name.clone()),
            description: description.unwrap_or_else(|| guard.item.description.clone()),
            available: available.unwrap_or(guard.item.available),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(item_id, "item updated");
        Ok(guard.item.clone())
    }

    // ── Item requests ────────────────────────────────────────

    pub async fn create_request(&self, actor: Id, description: String) -> Result<ItemRequest, EngineError> {
        let _gate = self.write_gate.read().await;
        self.require_user(actor)?;
        require_text("description", &description, MAX_DESCRIPTION_LEN)?;

        let request = ItemRequest {
            id: self.store.seq.requests.next(),
            requestor_id: actor,
            description,
            created: now_ms(),
        };
        let event = Event::RequestPosted {
            id: request.id,
            requestor_id: actor,
            description: request.description.clone(),
            created: request.created,
        };
        self.persist_global(&event).await?;
        debug!(request_id = request.id, "item request posted");
        Ok(request)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// New bookings always start WAITING. Checks run in a fixed order:
    /// actor, item, availability, date range, self-booking.
    pub async fn create_booking(
        &self,
        actor: Id,
        item_id: Id,
        start: Ms,
        end: Ms,
    ) -> Result<BookingInfo, EngineError> {
        let _gate = self.write_gate.read().await;
        self.require_user(actor)?;
        let shared = self.require_item(item_id)?;
        let mut guard = shared.write().await;

        ensure_available(&guard.item)?;
        let span = Span::new(start, end);
        validate_span(&span)?;
        ensure_not_owner(&guard.item, actor)?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many bookings on item"));
        }

        let id = self.store.seq.bookings.next();
        let event = Event::BookingRequested {
            id,
            item_id,
            booker_id: actor,
            span,
            status: BookingStatus::Waiting,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(booking_id = id, item_id, booker_id = actor, "booking requested");

        let booking = guard
            .booking(id)
            .ok_or_else(|| EngineError::missing(EntityKind::Booking, id))?;
        Ok(BookingInfo::new(booking, &guard.item.name))
    }

    /// WAITING → APPROVED or REJECTED, by the item's owner, once. The item
    /// lock serializes racing decisions; the loser sees a terminal status.
    pub async fn process_booking(
        &self,
        actor: Id,
        booking_id: Id,
        approve: bool,
    ) -> Result<BookingInfo, EngineError> {
        let _gate = self.write_gate.read().await;
        self.require_user(actor)?;
        let shared = self.resolve_booking(booking_id)?;
        let mut guard = shared.write().await;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| EngineError::missing(EntityKind::Booking, booking_id))?;

        if actor_role(&guard.item, &booking, actor) != ActorRole::Owner {
            return Err(EngineError::unauthorized(
                EntityKind::Booking,
                booking_id,
                NotFoundReason::NotOwner,
            ));
        }
        ensure_waiting(&booking)?;

        let status = if approve {
            BookingStatus::Approved
        } else {
            BookingStatus::Rejected
        };
        let event = Event::BookingDecided {
            id: booking_id,
            item_id: booking.item_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(booking_id, %status, "booking decided");

        let booking = guard
            .booking(booking_id)
            .ok_or_else(|| EngineError::missing(EntityKind::Booking, booking_id))?;
        Ok(BookingInfo::new(booking, &guard.item.name))
    }

    // ── Comments ─────────────────────────────────────────────

    pub async fn add_comment(&self, actor: Id, item_id: Id, text: String) -> Result<CommentInfo, EngineError> {
        let _gate = self.write_gate.read().await;
        let author = self.require_user(actor)?;
        require_text("text", &text, MAX_COMMENT_LEN)?;
        let shared = self
            .store
            .item(item_id)
            .ok_or_else(|| no_started_booking(actor, item_id))?;
        let mut guard = shared.write().await;

        let now = now_ms();
        ensure_may_comment(&guard, actor, now)?;

        let id = self.store.seq.comments.next();
        let event = Event::CommentPosted {
            id,
            item_id,
            author_id: actor,
            text: text.clone(),
            created: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(comment_id = id, item_id, author_id = actor, "comment posted");

        Ok(CommentInfo {
            id,
            item_id,
            author_id: actor,
            author_name: author.name,
            text,
            created: now,
        })
    }

    // ── Compaction ───────────────────────────────────────────

    /// One creation event per live record. Bookings carry their current
    /// status so decisions need no separate event.
    async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        let mut users: Vec<User> = self.store.users.iter().map(|e| e.value().clone()).collect();
        users.sort_unstable_by_key(|u| u.id);
        events.extend(users.into_iter().map(|u| Event::UserRegistered {
            id: u.id,
            name: u.name,
            email: u.email,
        }));

        let mut requests: Vec<ItemRequest> = self.store.requests.iter().map(|e| e.value().clone()).collect();
        requests.sort_unstable_by_key(|r| r.id);
        events.extend(requests.into_iter().map(|r| Event::RequestPosted {
            id: r.id,
            requestor_id: r.requestor_id,
            description: r.description,
            created: r.created,
        }));

        for item_id in self.store.item_ids() {
            let Some(shared) = self.store.item(item_id) else {
                continue;
            };
            let guard = shared.read().await;
            let item = &guard.item;
            events.push(Event::ItemListed {
                id: item.id,
                owner_id: item.owner_id,
                name: item.name.clone(),
                description: item.description.clone(),
                available: item.available,
                request_id: item.request_id,
            });
            // Start order, so equal starts replay in the same relative order
            events.extend(guard.bookings.iter().map(|b| Event::BookingRequested {
                id: b.id,
                item_id: b.item_id,
                booker_id: b.booker_id,
                span: b.span,
                status: b.status,
            }));
            events.extend(guard.comments.iter().map(|c| Event::CommentPosted {
                id: c.id,
                item_id: c.item_id,
                author_id: c.author_id,
                text: c.text.clone(),
                created: c.created,
            }));
        }
        events
    }

    /// Rewrite the WAL as a snapshot of current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
