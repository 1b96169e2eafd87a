use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedItemState = Arc<RwLock<ItemState>>;

/// Store-owned id counter. Ids start at 1.
#[derive(Debug, Default)]
pub struct IdSequence(AtomicI64);

impl IdSequence {
    pub fn next(&self) -> Id {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make sure later `next()` calls never hand out `id` again.
    pub fn observe(&self, id: Id) {
        self.0.fetch_max(id, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct Sequences {
    pub users: IdSequence,
    pub items: IdSequence,
    pub bookings: IdSequence,
    pub comments: IdSequence,
    pub requests: IdSequence,
}

pub struct Store {
    pub(super) users: DashMap<Id, User>,
    /// Lowercased email → user id.
    pub(super) emails: DashMap<String, Id>,
    pub(super) items: DashMap<Id, SharedItemState>,
    pub(super) requests: DashMap<Id, ItemRequest>,
    pub(super) booking_to_item: DashMap<Id, Id>,
    pub(super) items_by_owner: DashMap<Id, Vec<Id>>,
    pub(super) bookings_by_booker: DashMap<Id, Vec<Id>>,
    pub(super) items_by_request: DashMap<Id, Vec<Id>>,
    pub seq: Sequences,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            items: DashMap::new(),
            requests: DashMap::new(),
            booking_to_item: DashMap::new(),
            items_by_owner: DashMap::new(),
            bookings_by_booker: DashMap::new(),
            items_by_request: DashMap::new(),
            seq: Sequences::default(),
        }
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn user(&self, id: Id) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    pub fn user_by_email(&self, email: &str) -> Option<Id> {
        self.emails.get(&email.to_lowercase()).map(|e| *e.value())
    }

    pub fn item(&self, id: Id) -> Option<SharedItemState> {
        self.items.get(&id).map(|e| e.value().clone())
    }

    pub fn item_for_booking(&self, booking_id: Id) -> Option<Id> {
        self.booking_to_item.get(&booking_id).map(|e| *e.value())
    }

    pub fn request(&self, id: Id) -> Option<ItemRequest> {
        self.requests.get(&id).map(|e| e.value().clone())
    }

    pub fn items_of_owner(&self, owner_id: Id) -> Vec<Id> {
        self.items_by_owner
            .get(&owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn bookings_of_booker(&self, booker_id: Id) -> Vec<Id> {
        self.bookings_by_booker
            .get(&booker_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn items_answering(&self, request_id: Id) -> Vec<Id> {
        self.items_by_request
            .get(&request_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn item_ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.items.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    // ── Event application ────────────────────────────────────

    /// Events that touch no item state. Item-scoped events go through
    /// `apply_to_item` under the item's write lock.
    pub fn apply_global(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, name, email } => {
                self.seq.users.observe(*id);
                self.emails.insert(email.to_lowercase(), *id);
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        name: name.clone(),
                        email: email.clone(),
                    },
                );
            }
            Event::UserUpdated { id, name, email } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    let old_key = user.email.to_lowercase();
                    if old_key != email.to_lowercase() {
                        self.emails.remove(&old_key);
                        self.emails.insert(email.to_lowercase(), *id);
                    }
                    user.name = name.clone();
                    user.email = email.clone();
                }
            }
            Event::ItemListed {
                id,
                owner_id,
                name,
                description,
                available,
                request_id,
            } => {
                self.seq.items.observe(*id);
                let item = Item {
                    id: *id,
                    owner_id: *owner_id,
                    name: name.clone(),
                    description: description.clone(),
                    available: *available,
                    request_id: *request_id,
                };
                self.items.insert(*id, Arc::new(RwLock::new(ItemState::new(item))));
                self.items_by_owner.entry(*owner_id).or_default().push(*id);
                if let Some(rid) = request_id {
                    self.items_by_request.entry(*rid).or_default().push(*id);
                }
            }
            Event::RequestPosted {
                id,
                requestor_id,
                description,
                created,
            } => {
                self.seq.requests.observe(*id);
                self.requests.insert(
                    *id,
                    ItemRequest {
                        id: *id,
                        requestor_id: *requestor_id,
                        description: description.clone(),
                        created: *created,
                    },
                );
            }
            Event::ItemUpdated { .. }
            | Event::BookingRequested { .. }
            | Event::BookingDecided { .. }
            | Event::CommentPosted { .. } => {}
        }
    }

    /// Apply an item-scoped event (no locking, caller holds the item's lock).
    pub fn apply_to_item(&self, state: &mut ItemState, event: &Event) {
        match event {
            Event::ItemUpdated {
                name,
                description,
                available,
                ..
            } => {
                state.item.name = name.clone();
                state.item.description = description.clone();
                state.item.available = *available;
            }
            Event::BookingRequested {
                id,
                item_id,
                booker_id,
                span,
                status,
            } => {
                self.seq.bookings.observe(*id);
                state.insert_booking(Booking {
                    id: *id,
                    item_id: *item_id,
                    booker_id: *booker_id,
                    span: *span,
                    status: *status,
                });
                self.booking_to_item.insert(*id, *item_id);
                self.bookings_by_booker.entry(*booker_id).or_default().push(*id);
            }
            Event::BookingDecided { id, status, .. } => {
                if let Some(b) = state.booking_mut(*id) {
                    b.status = *status;
                }
            }
            Event::CommentPosted {
                id,
                item_id,
                author_id,
                text,
                created,
            } => {
                self.seq.comments.observe(*id);
                state.comments.push(Comment {
                    id: *id,
                    item_id: *item_id,
                    author_id: *author_id,
                    text: text.clone(),
                    created: *created,
                });
            }
            Event::UserRegistered { .. }
            | Event::UserUpdated { .. }
            | Event::ItemListed { .. }
            | Event::RequestPosted { .. } => {}
        }
    }
}
