use serde::{Deserialize, Serialize};

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Store-assigned identity shared by every entity kind.
pub type Id = i64;

/// Booked time range. Creation requires `start < end`; `end` itself is
/// still inside the range for the CURRENT window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_ordered(&self) -> bool {
        self.start < self.end
    }

    /// `start <= t <= end`, inclusive on both ends.
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Waiting,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Waiting => "WAITING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Waiting)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Id,
    pub owner_id: Id,
    pub name: String,
    pub description: String,
    pub available: bool,
    pub request_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Id,
    pub item_id: Id,
    pub booker_id: Id,
    pub span: Span,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Id,
    pub item_id: Id,
    pub author_id: Id,
    pub text: String,
    pub created: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub id: Id,
    pub requestor_id: Id,
    pub description: String,
    pub created: Ms,
}

/// Everything that hangs off one item, guarded by a single lock.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub item: Item,
    /// Sorted by `span.start`.
    pub bookings: Vec<Booking>,
    /// Insertion (= id) order.
    pub comments: Vec<Comment>,
}

impl ItemState {
    pub fn new(item: Item) -> Self {
        Self {
            item,
            bookings: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Id) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Id) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings starting strictly after `t`. Binary search over the start order.
    pub fn starting_after(&self, t: Ms) -> &[Booking] {
        let from = self.bookings.partition_point(|b| b.span.start <= t);
        &self.bookings[from..]
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Id,
        name: String,
        email: String,
    },
    UserUpdated {
        id: Id,
        name: String,
        email: String,
    },
    ItemListed {
        id: Id,
        owner_id: Id,
        name: String,
        description: String,
        available: bool,
        request_id: Option<Id>,
    },
    ItemUpdated {
        id: Id,
        name: String,
        description: String,
        available: bool,
    },
    RequestPosted {
        id: Id,
        requestor_id: Id,
        description: String,
        created: Ms,
    },
    /// `status` is WAITING when written by a booking request; compaction
    /// snapshots carry the current status instead.
    BookingRequested {
        id: Id,
        item_id: Id,
        booker_id: Id,
        span: Span,
        status: BookingStatus,
    },
    BookingDecided {
        id: Id,
        item_id: Id,
        status: BookingStatus,
    },
    CommentPosted {
        id: Id,
        item_id: Id,
        author_id: Id,
        text: String,
        created: Ms,
    },
}

impl Event {
    /// The item whose lock must be held to apply this event, if any.
    pub fn item_scope(&self) -> Option<Id> {
        match self {
            Event::ItemUpdated { id, .. } => Some(*id),
            Event::BookingRequested { item_id, .. }
            | Event::BookingDecided { item_id, .. }
            | Event::CommentPosted { item_id, .. } => Some(*item_id),
            Event::UserRegistered { .. }
            | Event::UserUpdated { .. }
            | Event::ItemListed { .. }
            | Event::RequestPosted { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A booking joined with the name of the booked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingInfo {
    pub id: Id,
    pub item_id: Id,
    pub item_name: String,
    pub booker_id: Id,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
}

impl BookingInfo {
    pub fn new(booking: &Booking, item_name: &str) -> Self {
        Self {
            id: booking.id,
            item_id: booking.item_id,
            item_name: item_name.to_string(),
            booker_id: booking.booker_id,
            start: booking.span.start,
            end: booking.span.end,
            status: booking.status,
        }
    }
}

/// The slice of a booking shown on an item's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookingRef {
    pub id: Id,
    pub booker_id: Id,
}

impl From<&Booking> for BookingRef {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            booker_id: b.booker_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentInfo {
    pub id: Id,
    pub item_id: Id,
    pub author_id: Id,
    pub author_name: String,
    pub text: String,
    pub created: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemProjection {
    pub item: Item,
    pub last_booking: Option<BookingRef>,
    pub next_booking: Option<BookingRef>,
    pub comments: Vec<CommentInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestInfo {
    pub request: ItemRequest,
    /// Items listed in answer to the request, by id.
    pub items: Vec<Item>,
}
