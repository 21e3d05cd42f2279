//! Pagination state and its opaque queryparam encoding.
//!
//! A cursor travels as base64url JSON in a versioned envelope:
//!
//! ```json
//! {"cursor_version": 1, "kind": "cardsearch", "start_index": 13, "page_size": 13,
//!  "result_count": 40, "random_sort": true, "first_page_ids": ["..."]}
//! ```
//!
//! `result_count` is `null` before results are in and `-1` for "many more"
//! (the engine reported an inexact hit count); page arithmetic then uses a
//! fixed ceiling instead of the count.
//!
//! [`CardsearchCursor`] additionally supports reproducibly-random paging:
//! with no sort and no text there is nothing to rank by, so page one is an
//! independent random sample. When the result set is small and filtered,
//! page one's ids are captured in the cursor; later pages exclude those ids
//! and seed their randomness with them, and revisiting page one replays
//! the captured order.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::ParamError;
use crate::params::{PageParam, MAX_PAGE_SIZE};

pub const CURSOR_VERSION: u32 = 1;
pub const MANY_MORE: i64 = -1;
pub const VALUESEARCH_MAX: i64 = 234;
pub const CARDSEARCH_MAX: i64 = 9997;

const CURSOR_PARAM: &str = "page[cursor]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleCursor {
    pub start_index: i64,
    pub page_size: i64,
    pub result_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardsearchCursor {
    #[serde(flatten)]
    pub offset: SimpleCursor,
    pub random_sort: bool,
    #[serde(default)]
    pub first_page_ids: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CursorBody {
    Simple(SimpleCursor),
    Cardsearch(CardsearchCursor),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    cursor_version: u32,
    #[serde(flatten)]
    body: CursorBody,
}

fn invalid_cursor() -> ParamError {
    ParamError::InvalidCursor {
        param: CURSOR_PARAM.to_string(),
    }
}

fn encode(body: CursorBody) -> String {
    let envelope = Envelope {
        cursor_version: CURSOR_VERSION,
        body,
    };
    let json = serde_json::to_string(&envelope).unwrap_or_default();
    URL_SAFE.encode(json)
}

fn decode(value: &str) -> Result<CursorBody, ParamError> {
    let bytes = URL_SAFE.decode(value.trim()).map_err(|_| invalid_cursor())?;
    let raw: serde_json::Value = serde_json::from_slice(&bytes).map_err(|_| invalid_cursor())?;
    if raw.get("cursor_version").and_then(|v| v.as_u64()) != Some(u64::from(CURSOR_VERSION)) {
        return Err(invalid_cursor());
    }
    let envelope: Envelope = serde_json::from_value(raw).map_err(|_| invalid_cursor())?;
    Ok(envelope.body)
}

impl SimpleCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            start_index: 0,
            page_size: page_size as i64,
            result_count: None,
        }
    }

    pub fn from_page_param(page: &PageParam) -> Result<Self, ParamError> {
        match &page.cursor {
            None => Ok(Self::new(page.size)),
            Some(value) => match decode(value)? {
                CursorBody::Simple(cursor) if cursor.is_well_formed(VALUESEARCH_MAX) => Ok(cursor),
                _ => Err(invalid_cursor()),
            },
        }
    }

    pub fn encode(&self) -> String {
        encode(CursorBody::Simple(self.clone()))
    }

    /// Bounds a client-supplied cursor before any arithmetic on it.
    fn is_well_formed(&self, ceiling: i64) -> bool {
        (0..=ceiling).contains(&self.start_index)
            && self.page_size > 0
            && self.page_size <= MAX_PAGE_SIZE as i64
            && self.result_count.map(|c| c >= MANY_MORE).unwrap_or(true)
    }

    pub fn is_first_page(&self) -> bool {
        self.start_index == 0
    }

    pub fn has_many_more(&self) -> bool {
        self.result_count == Some(MANY_MORE)
    }

    fn max_index_within(&self, ceiling: i64) -> i64 {
        if self.has_many_more() {
            ceiling
        } else {
            self.result_count.unwrap_or(0).min(ceiling)
        }
    }

    fn is_valid_within(&self, ceiling: i64) -> bool {
        0 <= self.start_index && self.start_index < self.max_index_within(ceiling)
    }

    fn shifted(&self, start_index: i64) -> Self {
        Self {
            start_index,
            ..self.clone()
        }
    }

    fn next_within(&self, ceiling: i64) -> Option<Self> {
        if matches!(self.result_count, None | Some(0)) {
            return None;
        }
        let next = self.shifted(self.start_index.saturating_add(self.page_size));
        next.is_valid_within(ceiling).then_some(next)
    }

    fn prev_within(&self, ceiling: i64) -> Option<Self> {
        let prev = self.shifted(self.start_index.saturating_sub(self.page_size));
        prev.is_valid_within(ceiling).then_some(prev)
    }

    fn first_within(&self) -> Option<Self> {
        if self.is_first_page() {
            return None;
        }
        Some(self.shifted(0))
    }

    pub fn max_index(&self) -> i64 {
        self.max_index_within(VALUESEARCH_MAX)
    }

    pub fn is_valid_cursor(&self) -> bool {
        self.is_valid_within(VALUESEARCH_MAX)
    }

    pub fn next_cursor(&self) -> Option<String> {
        self.next_within(VALUESEARCH_MAX).map(|c| c.encode())
    }

    pub fn prev_cursor(&self) -> Option<String> {
        self.prev_within(VALUESEARCH_MAX).map(|c| c.encode())
    }

    pub fn first_cursor(&self) -> Option<String> {
        self.first_within().map(|c| c.encode())
    }
}

impl CardsearchCursor {
    pub fn new(page_size: usize, random_sort: bool) -> Self {
        Self {
            offset: SimpleCursor::new(page_size),
            random_sort,
            first_page_ids: Vec::new(),
        }
    }

    /// Decode `page[cursor]`, or start at page one with `random_sort`.
    pub fn from_page_param(page: &PageParam, random_sort: bool) -> Result<Self, ParamError> {
        match &page.cursor {
            None => Ok(Self::new(page.size, random_sort)),
            Some(value) => match decode(value)? {
                CursorBody::Cardsearch(cursor) if cursor.offset.is_well_formed(CARDSEARCH_MAX) => {
                    Ok(cursor)
                }
                _ => Err(invalid_cursor()),
            },
        }
    }

    pub fn encode(&self) -> String {
        encode(CursorBody::Cardsearch(self.clone()))
    }

    pub fn start_index(&self) -> i64 {
        self.offset.start_index
    }

    pub fn page_size(&self) -> i64 {
        self.offset.page_size
    }

    pub fn is_first_page(&self) -> bool {
        self.offset.is_first_page()
    }

    pub fn has_many_more(&self) -> bool {
        self.offset.has_many_more()
    }

    pub fn set_result_count(&mut self, count: i64) {
        self.offset.result_count = Some(count);
    }

    pub fn result_count(&self) -> Option<i64> {
        self.offset.result_count
    }

    pub fn max_index(&self) -> i64 {
        self.offset.max_index_within(CARDSEARCH_MAX)
    }

    pub fn is_valid_cursor(&self) -> bool {
        self.offset.is_valid_within(CARDSEARCH_MAX)
    }

    /// Engine `from` offset: later random pages skip the captured page one.
    pub fn cardsearch_start_index(&self) -> i64 {
        if self.is_first_page() || !self.random_sort {
            self.offset.start_index
        } else {
            self.offset
                .start_index
                .saturating_sub(self.first_page_ids.len() as i64)
                .max(0)
        }
    }

    fn with_offset(&self, offset: SimpleCursor) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    /// Random order without captured ids cannot be navigated reproducibly.
    fn is_navigable(&self) -> bool {
        !(self.random_sort && self.first_page_ids.is_empty())
    }

    pub fn next_cursor(&self) -> Option<String> {
        if !self.is_navigable() {
            return None;
        }
        self.offset
            .next_within(CARDSEARCH_MAX)
            .map(|o| self.with_offset(o).encode())
    }

    pub fn prev_cursor(&self) -> Option<String> {
        if !self.is_navigable() {
            return None;
        }
        self.offset
            .prev_within(CARDSEARCH_MAX)
            .map(|o| self.with_offset(o).encode())
    }

    pub fn first_cursor(&self) -> Option<String> {
        if !self.is_navigable() {
            return None;
        }
        self.offset.first_within().map(|o| self.with_offset(o).encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn page(cursor: Option<String>) -> PageParam {
        PageParam { cursor, size: 10 }
    }

    #[test]
    fn test_fresh_cursor_has_no_neighbors() {
        let cursor = SimpleCursor::from_page_param(&page(None)).unwrap();
        assert_eq!(cursor.result_count, None);
        assert!(cursor.next_cursor().is_none());
        assert!(cursor.prev_cursor().is_none());
        assert!(cursor.first_cursor().is_none());
    }

    #[test]
    fn test_simple_cursor_navigation() {
        let mut cursor = SimpleCursor::new(10);
        cursor.result_count = Some(25);
        let next = SimpleCursor::from_page_param(&page(cursor.next_cursor())).unwrap();
        assert_eq!(next.start_index, 10);
        let last = SimpleCursor::from_page_param(&page(next.next_cursor())).unwrap();
        assert_eq!(last.start_index, 20);
        assert!(last.next_cursor().is_none());
        let back = SimpleCursor::from_page_param(&page(last.prev_cursor())).unwrap();
        assert_eq!(back.start_index, 10);
        let first = SimpleCursor::from_page_param(&page(last.first_cursor())).unwrap();
        assert_eq!(first.start_index, 0);
    }

    #[test]
    fn test_many_more_uses_ceiling() {
        let mut cursor = SimpleCursor::new(100);
        cursor.result_count = Some(MANY_MORE);
        assert_eq!(cursor.max_index(), VALUESEARCH_MAX);
        let next = SimpleCursor::from_page_param(&page(cursor.next_cursor())).unwrap();
        let after = SimpleCursor::from_page_param(&page(next.next_cursor())).unwrap();
        assert_eq!(after.start_index, 200);
        assert!(after.next_cursor().is_none());
    }

    #[test]
    fn test_random_cardsearch_without_ids_is_not_navigable() {
        let mut cursor = CardsearchCursor::new(10, true);
        cursor.set_result_count(50);
        assert!(cursor.next_cursor().is_none());
        assert!(cursor.prev_cursor().is_none());
        assert!(cursor.first_cursor().is_none());
    }

    #[test]
    fn test_random_cardsearch_with_ids() {
        let mut cursor = CardsearchCursor::new(3, true);
        cursor.set_result_count(7);
        cursor.first_page_ids = vec!["a".into(), "b".into(), "c".into()];
        let next = CardsearchCursor::from_page_param(&page(cursor.next_cursor()), true).unwrap();
        assert_eq!(next.start_index(), 3);
        assert_eq!(next.cardsearch_start_index(), 0);
        assert_eq!(next.first_page_ids, cursor.first_page_ids);
        let first = CardsearchCursor::from_page_param(&page(next.first_cursor()), true).unwrap();
        assert!(first.is_first_page());
        assert_eq!(first.cardsearch_start_index(), 0);
    }

    #[test]
    fn test_rejects_bad_cursors() {
        assert!(SimpleCursor::from_page_param(&page(Some("%%%".into()))).is_err());
        let wrong_version = URL_SAFE.encode(
            r#"{"cursor_version":2,"kind":"simple","start_index":0,"page_size":5,"result_count":null}"#,
        );
        assert!(SimpleCursor::from_page_param(&page(Some(wrong_version))).is_err());
        let cardsearch = CardsearchCursor::new(5, false).encode();
        assert!(matches!(
            SimpleCursor::from_page_param(&page(Some(cardsearch))),
            Err(ParamError::InvalidCursor { .. })
        ));
        let negative = URL_SAFE.encode(
            r#"{"cursor_version":1,"kind":"simple","start_index":-5,"page_size":5,"result_count":null}"#,
        );
        assert!(SimpleCursor::from_page_param(&page(Some(negative))).is_err());
    }

    #[test]
    fn test_rejects_start_index_past_ceiling() {
        let huge = URL_SAFE.encode(format!(
            r#"{{"cursor_version":1,"kind":"simple","start_index":{},"page_size":5,"result_count":-1}}"#,
            i64::MAX - 5
        ));
        assert!(matches!(
            SimpleCursor::from_page_param(&page(Some(huge))),
            Err(ParamError::InvalidCursor { .. })
        ));
        let past_values = URL_SAFE.encode(format!(
            r#"{{"cursor_version":1,"kind":"simple","start_index":{},"page_size":5,"result_count":null}}"#,
            VALUESEARCH_MAX + 1
        ));
        assert!(SimpleCursor::from_page_param(&page(Some(past_values))).is_err());

        let past_cards = URL_SAFE.encode(format!(
            r#"{{"cursor_version":1,"kind":"cardsearch","start_index":{},"page_size":5,"result_count":-1,"random_sort":false}}"#,
            CARDSEARCH_MAX + 1
        ));
        assert!(CardsearchCursor::from_page_param(&page(Some(past_cards)), false).is_err());
        let at_ceiling = URL_SAFE.encode(format!(
            r#"{{"cursor_version":1,"kind":"cardsearch","start_index":{},"page_size":5,"result_count":-1,"random_sort":false}}"#,
            CARDSEARCH_MAX
        ));
        let cursor = CardsearchCursor::from_page_param(&page(Some(at_ceiling)), false).unwrap();
        assert!(cursor.next_cursor().is_none());
    }

    proptest! {
        #[test]
        fn prop_cardsearch_cursor_roundtrip(
            start in 0i64..CARDSEARCH_MAX,
            size in 1i64..=MAX_PAGE_SIZE as i64,
            count in proptest::option::of(-1i64..100_000),
            random in any::<bool>(),
            ids in proptest::collection::vec("[a-f0-9-]{8,36}", 0..5),
        ) {
            let cursor = CardsearchCursor {
                offset: SimpleCursor { start_index: start, page_size: size, result_count: count },
                random_sort: random,
                first_page_ids: ids,
            };
            let decoded = CardsearchCursor::from_page_param(&page(Some(cursor.encode())), !random).unwrap();
            prop_assert_eq!(decoded, cursor);
        }
    }
}
