use crate::limits::*;
use crate::model::*;
use crate::paging::{self, PageRequest, SortKey, Sortable};

use super::error::{EntityKind, NotFoundReason};
use super::guard::{actor_role, now_ms, ActorRole};
use super::window::{last_booking, next_booking, BookingState};
use super::{Engine, EngineError};

/// Whose bookings a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingView {
    /// Bookings the actor made.
    Booker,
    /// Bookings on items the actor owns.
    Owner,
}

fn check_window(page: &PageRequest, sort: &[SortKey]) -> Result<(), EngineError> {
    if page.size.get() > MAX_PAGE_SIZE {
        return Err(EngineError::LimitExceeded("page size too large"));
    }
    if sort.len() > MAX_SORT_KEYS {
        return Err(EngineError::LimitExceeded("too many sort keys"));
    }
    Ok(())
}

fn sorted<T: Sortable>(rows: Vec<T>, sort: &[SortKey]) -> Result<Vec<T>, EngineError> {
    paging::sort_by_keys(rows, sort).map_err(|e| EngineError::validation(e.to_string()))
}

fn sorted_page<T: Sortable>(rows: Vec<T>, sort: &[SortKey], page: PageRequest) -> Result<Vec<T>, EngineError> {
    check_window(&page, sort)?;
    paging::sort_and_page(rows, sort, page).map_err(|e| EngineError::validation(e.to_string()))
}

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub fn get_user(&self, id: Id) -> Result<User, EngineError> {
        self.require_user(id)
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.store.users.iter().map(|e| e.value().clone()).collect();
        users.sort_unstable_by_key(|u| u.id);
        users
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Visible to the item's owner and to the booker; anyone else gets
    /// NotFound.
    pub async fn get_booking(&self, actor: Id, booking_id: Id) -> Result<BookingInfo, EngineError> {
        self.require_user(actor)?;
        let shared = self.resolve_booking(booking_id)?;
        let guard = shared.read().await;
        let booking = guard
            .booking(booking_id)
            .ok_or_else(|| EngineError::missing(EntityKind::Booking, booking_id))?;
        if actor_role(&guard.item, booking, actor) == ActorRole::Other {
            return Err(EngineError::unauthorized(
                EntityKind::Booking,
                booking_id,
                NotFoundReason::NotOwnerOrBooker,
            ));
        }
        Ok(BookingInfo::new(booking, &guard.item.name))
    }

    /// `state` is the raw client token and is checked before anything is
    /// read. "now" is sampled once for the whole listing.
    pub async fn list_bookings(
        &self,
        actor: Id,
        view: BookingView,
        state: &str,
        page: PageRequest,
        sort: &[SortKey],
    ) -> Result<Vec<BookingInfo>, EngineError> {
        self.require_user(actor)?;
        let state = BookingState::parse(state)?;
        check_window(&page, sort)?;
        let now = now_ms();

        let mut rows = Vec::new();
        match view {
            BookingView::Booker => {
                for booking_id in self.store.bookings_of_booker(actor) {
                    let Ok(shared) = self.resolve_booking(booking_id) else {
                        continue;
                    };
                    let guard = shared.read().await;
                    if let Some(b) = guard.booking(booking_id)
                        && state.matches(b, now)
                    {
                        rows.push(BookingInfo::new(b, &guard.item.name));
                    }
                }
            }
            BookingView::Owner => {
                for item_id in self.store.items_of_owner(actor) {
                    let Some(shared) = self.store.item(item_id) else {
                        continue;
                    };
                    let guard = shared.read().await;
                    rows.extend(
                        guard
                            .bookings
                            .iter()
                            .filter(|b| state.matches(b, now))
                            .map(|b| BookingInfo::new(b, &guard.item.name)),
                    );
                }
            }
        }
        sorted_page(rows, sort, page)
    }

    // ── Items ────────────────────────────────────────────────

    fn comment_infos(&self, state: &ItemState) -> Vec<CommentInfo> {
        state
            .comments
            .iter()
            .map(|c| CommentInfo {
                id: c.id,
                item_id: c.item_id,
                author_id: c.author_id,
                author_name: self.store.user(c.author_id).map(|u| u.name).unwrap_or_default(),
                text: c.text.clone(),
                created: c.created,
            })
            .collect()
    }

    fn project(&self, state: &ItemState, now: Ms, with_windows: bool) -> ItemProjection {
        let (last, next) = if with_windows {
            (
                last_booking(state, now).map(BookingRef::from),
                next_booking(state, now).map(BookingRef::from),
            )
        } else {
            (None, None)
        };
        ItemProjection {
            item: state.item.clone(),
            last_booking: last,
            next_booking: next,
            comments: self.comment_infos(state),
        }
    }

    /// Comments for everyone; last/next bookings only for the owner. The
    /// viewer need not be a registered user.
    pub async fn get_item(&self, actor: Id, item_id: Id) -> Result<ItemProjection, EngineError> {
        let shared = self.require_item(item_id)?;
        let guard = shared.read().await;
        let is_owner = guard.item.owner_id == actor;
        Ok(self.project(&guard, now_ms(), is_owner))
    }

    pub async fn list_owner_items(
        &self,
        actor: Id,
        page: PageRequest,
        sort: &[SortKey],
    ) -> Result<Vec<ItemProjection>, EngineError> {
        check_window(&page, sort)?;
        let now = now_ms();
        let mut rows = Vec::new();
        for item_id in self.store.items_of_owner(actor) {
            if let Some(shared) = self.store.item(item_id) {
                rows.push(self.project(&*shared.read().await, now, true));
            }
        }
        sorted_page(rows, sort, page)
    }

    /// Available items whose name or description contains `text`, ignoring
    /// case. Blank text matches nothing.
    pub async fn search_items(&self, text: &str, page: PageRequest) -> Result<Vec<Item>, EngineError> {
        if text.len() > MAX_SEARCH_LEN {
            return Err(EngineError::LimitExceeded("search text too long"));
        }
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits = Vec::new();
        for item_id in self.store.item_ids() {
            let Some(shared) = self.store.item(item_id) else {
                continue;
            };
            let guard = shared.read().await;
            let item = &guard.item;
            if item.available
                && (item.name.to_lowercase().contains(&needle)
                    || item.description.to_lowercase().contains(&needle))
            {
                hits.push(item.clone());
            }
        }
        sorted_page(hits, &[], page)
    }

    // ── Item requests ────────────────────────────────────────

    async fn request_info(&self, request: ItemRequest) -> RequestInfo {
        let mut items = Vec::new();
        for item_id in self.store.items_answering(request.id) {
            if let Some(shared) = self.store.item(item_id) {
                items.push(shared.read().await.item.clone());
            }
        }
        items.sort_unstable_by_key(|i| i.id);
        RequestInfo { request, items }
    }

    async fn request_infos(&self, keep: impl Fn(&ItemRequest) -> bool) -> Vec<RequestInfo> {
        let requests: Vec<ItemRequest> = self
            .store
            .requests
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        let mut infos = Vec::with_capacity(requests.len());
        for request in requests {
            infos.push(self.request_info(request).await);
        }
        infos
    }

    pub async fn list_own_requests(&self, actor: Id, sort: &[SortKey]) -> Result<Vec<RequestInfo>, EngineError> {
        self.require_user(actor)?;
        if sort.len() > MAX_SORT_KEYS {
            return Err(EngineError::LimitExceeded("too many sort keys"));
        }
        let infos = self.request_infos(|r| r.requestor_id == actor).await;
        sorted(infos, sort)
    }

    /// Other users' requests. The requestor filter runs before paging so
    /// every page is full.
    pub async fn list_other_requests(
        &self,
        actor: Id,
        page: PageRequest,
        sort: &[SortKey],
    ) -> Result<Vec<RequestInfo>, EngineError> {
        self.require_user(actor)?;
        check_window(&page, sort)?;
        let infos = self.request_infos(|r| r.requestor_id != actor).await;
        sorted_page(infos, sort, page)
    }

    pub async fn get_request(&self, actor: Id, request_id: Id) -> Result<RequestInfo, EngineError> {
        self.require_user(actor)?;
        let request = self.require_request(request_id)?;
        Ok(self.request_info(request).await)
    }
}
