//! Client sort specs and page windows.
//!
//! A sort spec is an ordered list of `"<field>;<direction>"` tokens. The
//! first token is the primary key and later tokens break ties. A page
//! window is given as an item offset `from` plus a page `size`, and is
//! translated to the page index `from / size`. The truncation is
//! deliberate: `from = 15, size = 10` reads page 1 (items 10..20).

use std::cmp::Ordering;
use std::num::NonZeroUsize;

use crate::model::{BookingInfo, Id, Item, ItemProjection, RequestInfo};

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
    /// Text values compare lowercased.
    pub ignore_case: bool,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Asc,
            ignore_case: true,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            direction: Direction::Desc,
            ..Self::asc(field)
        }
    }
}

/// Parse sort tokens. Anything other than a case-insensitive `DESC`
/// after the `;` (including no `;` at all) sorts ascending.
pub fn parse_sort<S: AsRef<str>>(tokens: &[S]) -> Vec<SortKey> {
    tokens
        .iter()
        .map(|token| {
            let token = token.as_ref();
            let (field, direction) = match token.split_once(';') {
                Some((field, dir)) if dir.trim().eq_ignore_ascii_case("DESC") => {
                    (field, Direction::Desc)
                }
                Some((field, _)) => (field, Direction::Asc),
                None => (token, Direction::Asc),
            };
            SortKey {
                field: field.trim().to_string(),
                direction,
                ignore_case: true,
            }
        })
        .collect()
}

/// `size` records starting at `page * size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: NonZeroUsize,
}

impl PageRequest {
    pub fn from_offset(from: usize, size: NonZeroUsize) -> Self {
        Self {
            page: from / size.get(),
            size,
        }
    }

    pub fn offset(&self) -> usize {
        self.page * self.size.get()
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset())
            .take(self.size.get())
            .collect()
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: NonZeroUsize::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown sort field: {0}")]
pub struct UnknownSortField(pub String);

/// Comparable field value. Variant order puts NULL after every value, so
/// ascending sorts nulls last and descending sorts them first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortValue {
    Int(i64),
    Bool(bool),
    Text(String),
    Null,
}

impl From<Option<Id>> for SortValue {
    fn from(v: Option<Id>) -> Self {
        v.map_or(SortValue::Null, SortValue::Int)
    }
}

pub trait Sortable {
    const SORT_FIELDS: &'static [&'static str];

    /// Used when the client supplies no sort tokens.
    fn default_sort() -> SortKey;

    /// Only called with names from `SORT_FIELDS`.
    fn sort_value(&self, field: &str) -> SortValue;

    /// Final tie-break.
    fn sort_id(&self) -> Id;
}

fn resolve_field<T: Sortable>(field: &str) -> Result<&'static str, UnknownSortField> {
    T::SORT_FIELDS
        .iter()
        .find(|f| f.eq_ignore_ascii_case(field))
        .copied()
        .ok_or_else(|| UnknownSortField(field.to_string()))
}

/// Stable composite sort, then ascending id.
pub fn sort_by_keys<T: Sortable>(items: Vec<T>, keys: &[SortKey]) -> Result<Vec<T>, UnknownSortField> {
    let fallback;
    let keys = if keys.is_empty() {
        fallback = [T::default_sort()];
        &fallback[..]
    } else {
        keys
    };
    let resolved = keys
        .iter()
        .map(|k| resolve_field::<T>(&k.field).map(|f| (f, k)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut decorated: Vec<(Vec<SortValue>, T)> = items
        .into_iter()
        .map(|item| {
            let values = resolved
                .iter()
                .map(|(field, key)| match item.sort_value(field) {
                    SortValue::Text(s) if key.ignore_case => SortValue::Text(s.to_lowercase()),
                    v => v,
                })
                .collect();
            (values, item)
        })
        .collect();

    decorated.sort_by(|(va, a), (vb, b)| {
        for (i, (_, key)) in resolved.iter().enumerate() {
            let ord = match key.direction {
                Direction::Asc => va[i].cmp(&vb[i]),
                Direction::Desc => vb[i].cmp(&va[i]),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.sort_id().cmp(&b.sort_id())
    });

    Ok(decorated.into_iter().map(|(_, item)| item).collect())
}

pub fn sort_and_page<T: Sortable>(
    items: Vec<T>,
    keys: &[SortKey],
    page: PageRequest,
) -> Result<Vec<T>, UnknownSortField> {
    Ok(page.apply(sort_by_keys(items, keys)?))
}

// ── Sortable entities ────────────────────────────────────────────

impl Sortable for BookingInfo {
    const SORT_FIELDS: &'static [&'static str] =
        &["id", "start", "end", "status", "item_id", "item_name", "booker_id"];

    fn default_sort() -> SortKey {
        SortKey::desc("start")
    }

    fn sort_value(&self, field: &str) -> SortValue {
        match field {
            "start" => SortValue::Int(self.start),
            "end" => SortValue::Int(self.end),
            "status" => SortValue::Text(self.status.as_str().to_string()),
            "item_id" => SortValue::Int(self.item_id),
            "item_name" => SortValue::Text(self.item_name.clone()),
            "booker_id" => SortValue::Int(self.booker_id),
            _ => SortValue::Int(self.id),
        }
    }

    fn sort_id(&self) -> Id {
        self.id
    }
}

impl Sortable for Item {
    const SORT_FIELDS: &'static [&'static str] =
        &["id", "name", "description", "available", "owner_id", "request_id"];

    fn default_sort() -> SortKey {
        SortKey::asc("id")
    }

    fn sort_value(&self, field: &str) -> SortValue {
        match field {
            "name" => SortValue::Text(self.name.clone()),
            "description" => SortValue::Text(self.description.clone()),
            "available" => SortValue::Bool(self.available),
            "owner_id" => SortValue::Int(self.owner_id),
            "request_id" => self.request_id.into(),
            _ => SortValue::Int(self.id),
        }
    }

    fn sort_id(&self) -> Id {
        self.id
    }
}

impl Sortable for ItemProjection {
    const SORT_FIELDS: &'static [&'static str] = Item::SORT_FIELDS;

    fn default_sort() -> SortKey {
        Item::default_sort()
    }

    fn sort_value(&self, field: &str) -> SortValue {
        self.item.sort_value(field)
    }

    fn sort_id(&self) -> Id {
        self.item.id
    }
}

impl Sortable for RequestInfo {
    const SORT_FIELDS: &'static [&'static str] = &["id", "description", "created", "requestor_id"];

    fn default_sort() -> SortKey {
        SortKey::desc("created")
    }

    fn sort_value(&self, field: &str) -> SortValue {
        match field {
            "description" => SortValue::Text(self.request.description.clone()),
            "created" => SortValue::Int(self.request.created),
            "requestor_id" => SortValue::Int(self.request.requestor_id),
            _ => SortValue::Int(self.request.id),
        }
    }

    fn sort_id(&self) -> Id {
        self.request.id
    }
}
