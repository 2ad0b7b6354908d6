//! Direction bookkeeping shared by the windowed queries.
//!
//! `Direction` is relative to the window's own order: `Next` extends the
//! tail, `Prev` extends the head. `Chrono` is the same move expressed in
//! time, which is what the store and the archive understand.

#![deny(clippy::wildcard_enum_match_arm)]

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::cache::{Keyed, OrderedResultCache};
use crate::error::Result;
use crate::store::{DateRange, SortOrder};

/// Where an item sits on the time axis. Items sharing a timestamp are ordered
/// by id, the same tie-break the stores sort with.
pub(crate) type Position<'a> = (DateTime<Utc>, &'a str);

/// Owned [`Position`], for holding on to an edge while the cache it came
/// from is being changed.
pub(crate) type Cursor = (DateTime<Utc>, String);

pub(crate) fn position(cursor: Option<&Cursor>) -> Option<Position<'_>> {
    cursor.map(|(date, id)| (*date, id.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

impl Direction {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Next => 0,
            Self::Prev => 1,
        }
    }

    pub(crate) fn chrono(self, order: SortOrder) -> Chrono {
        match (self, order) {
            (Self::Next, SortOrder::Ascending) | (Self::Prev, SortOrder::Descending) => {
                Chrono::Newer
            }
            (Self::Next, SortOrder::Descending) | (Self::Prev, SortOrder::Ascending) => {
                Chrono::Older
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Chrono {
    Older,
    Newer,
}

impl Chrono {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Older => 0,
            Self::Newer => 1,
        }
    }

    /// Store order that yields items in this direction.
    pub(crate) fn order(self) -> SortOrder {
        match self {
            Self::Older => SortOrder::Descending,
            Self::Newer => SortOrder::Ascending,
        }
    }

    /// Strict range of everything past `edge` in this direction.
    pub(crate) fn beyond(self, edge: DateTime<Utc>) -> DateRange {
        match self {
            Self::Older => DateRange::before(edge),
            Self::Newer => DateRange::after(edge),
        }
    }

    /// Range from `edge` on in this direction, `edge` itself included.
    pub(crate) fn from_edge(self, edge: DateTime<Utc>) -> DateRange {
        match self {
            Self::Older => DateRange::at_or_before(edge),
            Self::Newer => DateRange::at_or_after(edge),
        }
    }

    /// Whether `position` lies strictly past `edge` in this direction.
    pub(crate) fn is_past(self, position: Position<'_>, edge: Position<'_>) -> bool {
        match self {
            Self::Older => position < edge,
            Self::Newer => position > edge,
        }
    }
}

/// Fetch up to `wanted` items strictly past `edge`, nearest first.
///
/// `fetch` gets a range that still includes the edge timestamp, because items
/// sharing it may lie on either side of the edge. Those at or behind the edge
/// take up slots in the result, so the limit grows by the number dropped until
/// enough items remain or the source comes back short.
pub(crate) async fn fetch_past<T, F, Fut>(
    chrono: Chrono,
    edge: Option<Position<'_>>,
    wanted: usize,
    position: impl Fn(&T) -> (DateTime<Utc>, &str),
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(Option<DateRange>, usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let Some(edge) = edge else {
        return fetch(None, wanted).await;
    };
    let range = chrono.from_edge(edge.0);
    let mut limit = wanted;
    loop {
        let found = fetch(Some(range.clone()), limit).await?;
        let exhausted = found.len() < limit;
        let mut past: Vec<T> = found
            .into_iter()
            .filter(|item| chrono.is_past(position(item), edge))
            .collect();
        if exhausted || past.len() >= wanted {
            past.truncate(wanted);
            return Ok(past);
        }
        limit += wanted - past.len();
    }
}

/// Narrow `base` to `cursor` when there is one.
pub(crate) fn narrow(base: Option<&DateRange>, cursor: Option<DateRange>) -> Option<DateRange> {
    match (base, cursor) {
        (Some(base), Some(cursor)) => Some(base.intersect(&cursor)),
        (base, cursor) => cursor.or_else(|| base.cloned()),
    }
}

/// Requesting one item more than the limit tells a short page from a boundary.
pub(crate) fn lookahead(limit: usize) -> usize {
    limit + 1
}

/// Where the first page is loaded from.
///
/// An ascending window without an inclusive lower bound starts at the oldest
/// end. Every other window starts at the newest end. The result is expressed
/// in window order.
pub(crate) fn initial_direction(order: SortOrder, range: Option<&DateRange>) -> Direction {
    let inclusive_lower = range.map_or(false, |r| r.greater_or_equal.is_some());
    match order {
        SortOrder::Ascending if inclusive_lower => Direction::Prev,
        SortOrder::Ascending | SortOrder::Descending => Direction::Next,
    }
}

/// Mark the edge a first page starts from. That edge is the window's own start
/// and cannot be extended.
pub(crate) fn mark_start<T: Keyed>(cache: &mut OrderedResultCache<T>, direction: Direction) {
    match direction {
        Direction::Next => cache.set_head(true),
        Direction::Prev => cache.set_tail(true),
    }
}

pub(crate) fn at_boundary<T: Keyed>(cache: &OrderedResultCache<T>, direction: Direction) -> bool {
    match direction {
        Direction::Next => cache.is_tail(),
        Direction::Prev => cache.is_head(),
    }
}

/// Item the next page in `direction` continues from.
pub(crate) fn edge<T: Keyed>(cache: &OrderedResultCache<T>, direction: Direction) -> Option<&T> {
    match direction {
        Direction::Next => cache.last(),
        Direction::Prev => cache.first(),
    }
}

/// Insert a page fetched in `direction`. `page` is ordered moving away from
/// the cache, so a `Prev` page is reversed before prepending. A boundary flag
/// is only ever raised here.
pub(crate) fn extend<T: Keyed>(
    cache: &mut OrderedResultCache<T>,
    direction: Direction,
    mut page: Vec<T>,
    boundary: bool,
) -> usize {
    match direction {
        Direction::Next => {
            let added = cache.append(page);
            if boundary {
                cache.set_tail(true);
            }
            added
        }
        Direction::Prev => {
            page.reverse();
            let added = cache.prepend(page);
            if boundary {
                cache.set_head(true);
            }
            added
        }
    }
}

/// Count-shrinking invalidation: the window was full, a local delta shrank it
/// below the limit, and items may exist beyond either edge.
pub(crate) fn needs_reinit(
    len_before: usize,
    len_after: usize,
    limit: usize,
    head: bool,
    tail: bool,
) -> bool {
    len_before >= limit && len_after < limit && !(head && tail)
}

/// Cut a lookahead-sized fetch down to the limit. The flag is true when the
/// fetch came up short.
pub(crate) fn trim_lookahead<T>(mut items: Vec<T>, limit: usize) -> (Vec<T>, bool) {
    let boundary = items.len() < lookahead(limit);
    items.truncate(limit);
    (items, boundary)
}
