//! In-memory [`SearchEngine`] implementation.
//!
//! Stores JSON documents per index and evaluates the [`Query`] model
//! directly. Analysis is deliberately small:
//!
//! - text is split into lowercase alphanumeric tokens
//! - `match_phrase` honors slop, `match` honors `fuzziness: AUTO`
//!   (Damerau edit distance 0/1/2 by term length)
//! - range bounds accept date math (`2020||/y`, `2020-02||/M`, `2020-02-02||/d`)
//!   rounded the way Elasticsearch rounds them
//! - `random_score` with a seed hashes seed and field value with SHA-256,
//!   so the order is reproducible
//!
//! Documents are visible immediately; [`refresh`](SearchEngine::refresh)
//! only checks that the index exists. Failure injection
//! ([`set_unavailable`](InMemoryEngine::set_unavailable),
//! [`reject_doc_id`](InMemoryEngine::reject_doc_id)) lets daemon tests
//! exercise the retry and partial-failure paths.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rand::Rng;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{AliasAction, BulkAction, BulkItemResult, IndexDefinition, IndexInfo, SearchEngine};
use crate::query::{
    Aggregation, AggregationResult, Bucket, Hit, Hits, Query, SearchRequest, SearchResponse,
    TotalHits, TotalRelation,
};
use crate::walk::parse_date;

pub const DEFAULT_TRACK_TOTAL_HITS: u64 = 10_000;

struct MemIndex {
    definition: IndexDefinition,
    created: DateTime<Utc>,
    docs: BTreeMap<String, Value>,
}

#[derive(Default)]
struct State {
    indexes: BTreeMap<String, MemIndex>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    unavailable: bool,
    rejected_doc_ids: HashSet<String>,
}

impl State {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            bail!("search engine unavailable");
        }
        Ok(())
    }

    /// Index names for an index name or alias.
    fn resolve(&self, name: &str) -> Result<Vec<String>> {
        if self.indexes.contains_key(name) {
            return Ok(vec![name.to_string()]);
        }
        match self.aliases.get(name) {
            Some(members) if !members.is_empty() => Ok(members.iter().cloned().collect()),
            _ => bail!("no such index or alias: {name}"),
        }
    }
}

/// In-memory search engine for tests and local use.
pub struct InMemoryEngine {
    state: RwLock<State>,
    track_total_hits: u64,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::with_track_total_hits(DEFAULT_TRACK_TOTAL_HITS)
    }

    /// Totals above `track_total_hits` are reported as a `gte` lower bound.
    pub fn with_track_total_hits(track_total_hits: u64) -> Self {
        Self {
            state: RwLock::new(State::default()),
            track_total_hits,
        }
    }

    /// While unavailable, every operation fails as if the engine were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Make bulk index actions for `doc_id` fail individually.
    pub fn reject_doc_id(&self, doc_id: &str) {
        self.write().rejected_doc_ids.insert(doc_id.to_string());
    }

    pub fn clear_rejections(&self) {
        self.write().rejected_doc_ids.clear();
    }

    /// A stored document, for assertions.
    pub fn get_doc(&self, index: &str, id: &str) -> Option<Value> {
        let state = self.read();
        let names = state.resolve(index).ok()?;
        names
            .iter()
            .find_map(|name| state.indexes.get(name)?.docs.get(id).cloned())
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchEngine for InMemoryEngine {
    async fn create_index(&self, name: &str, definition: &IndexDefinition) -> Result<()> {
        let mut state = self.write();
        state.check_available()?;
        if state.indexes.contains_key(name) {
            bail!("index already exists: {name}");
        }
        state.indexes.insert(
            name.to_string(),
            MemIndex {
                definition: definition.clone(),
                created: Utc::now(),
                docs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let mut state = self.write();
        state.check_available()?;
        state.indexes.remove(name);
        for members in state.aliases.values_mut() {
            members.remove(name);
        }
        state.aliases.retain(|_, members| !members.is_empty());
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        let state = self.read();
        state.check_available()?;
        Ok(state.indexes.contains_key(name))
    }

    async fn refresh(&self, name: &str) -> Result<()> {
        let state = self.read();
        state.check_available()?;
        state.resolve(name)?;
        Ok(())
    }

    async fn indexes_matching(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.read();
        state.check_available()?;
        Ok(state
            .indexes
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_alias(&self, alias: &str) -> Result<Vec<String>> {
        let state = self.read();
        state.check_available()?;
        Ok(state
            .aliases
            .get(alias)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let mut state = self.write();
        state.check_available()?;
        for action in actions {
            if let AliasAction::Add { index, .. } = action {
                if !state.indexes.contains_key(index) {
                    bail!("cannot alias missing index: {index}");
                }
            }
        }
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    state
                        .aliases
                        .entry(alias.clone())
                        .or_default()
                        .insert(index.clone());
                }
                AliasAction::Remove { index, alias } => {
                    if let Some(members) = state.aliases.get_mut(alias) {
                        members.remove(index);
                    }
                }
            }
        }
        state.aliases.retain(|_, members| !members.is_empty());
        Ok(())
    }

    async fn index_info(&self, name: &str) -> Result<Option<IndexInfo>> {
        let state = self.read();
        state.check_available()?;
        let Some(index) = state.indexes.get(name) else {
            return Ok(None);
        };
        let aliases = state
            .aliases
            .iter()
            .filter(|(_, members)| members.contains(name))
            .map(|(alias, _)| alias.clone())
            .collect();
        Ok(Some(IndexInfo {
            name: name.to_string(),
            aliases,
            created: Some(index.created),
            doc_count: index.docs.len() as u64,
        }))
    }

    async fn bulk(&self, actions: &[BulkAction]) -> Result<Vec<BulkItemResult>> {
        let mut guard = self.write();
        let state = &mut *guard;
        state.check_available()?;
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let (status, error) = match state.indexes.get_mut(action.index_name()) {
                None => (404, Some(format!("no such index [{}]", action.index_name()))),
                Some(index) => match action {
                    BulkAction::Index { id, doc, .. } => {
                        if state.rejected_doc_ids.contains(id) {
                            (400, Some(format!("document rejected: {id}")))
                        } else if index.docs.insert(id.clone(), doc.clone()).is_some() {
                            (200, None)
                        } else {
                            (201, None)
                        }
                    }
                    BulkAction::Delete { id, .. } => match index.docs.remove(id) {
                        Some(_) => (200, None),
                        None => (404, None),
                    },
                },
            };
            results.push(BulkItemResult {
                index: action.index_name().to_string(),
                id: action.doc_id().to_string(),
                op: action.op().to_string(),
                status,
                ok: (200..300).contains(&status),
                error,
            });
        }
        Ok(results)
    }

    async fn delete_by_query(&self, indexes: &[String], query: &Query) -> Result<u64> {
        let mut guard = self.write();
        let state = &mut *guard;
        state.check_available()?;
        let mut names = BTreeSet::new();
        for name in indexes {
            names.extend(state.resolve(name)?);
        }
        let mut deleted = 0;
        for name in names {
            if let Some(index) = state.indexes.get_mut(&name) {
                let before = index.docs.len();
                index
                    .docs
                    .retain(|id, doc| evaluate(query, doc, id).is_none());
                deleted += (before - index.docs.len()) as u64;
            }
        }
        Ok(deleted)
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let state = self.read();
        state.check_available()?;
        let mut matched: Vec<(f64, String, &Value)> = Vec::new();
        for name in state.resolve(index)? {
            let Some(idx) = state.indexes.get(&name) else {
                continue;
            };
            for (id, doc) in &idx.docs {
                if let Some(score) = evaluate(&request.query, doc, id) {
                    matched.push((score, id.clone(), doc));
                }
            }
        }
        sort_matches(&mut matched, request);

        let total = matched.len() as u64;
        let total = if total > self.track_total_hits {
            TotalHits {
                value: self.track_total_hits,
                relation: TotalRelation::Gte,
            }
        } else {
            TotalHits {
                value: total,
                relation: TotalRelation::Eq,
            }
        };

        let highlight_terms = collect_highlight_terms(&request.query);
        let hits = matched
            .iter()
            .skip(request.from)
            .take(request.size)
            .map(|(_, id, doc)| Hit {
                id: id.clone(),
                source: request.source.then(|| (*doc).clone()),
                fields: request
                    .docvalue_fields
                    .iter()
                    .map(|f| (f.clone(), field_values(doc, f).into_iter().cloned().collect()))
                    .filter(|(_, values): &(String, Vec<Value>)| !values.is_empty())
                    .collect(),
                highlight: highlight(doc, &request.highlight_fields, &highlight_terms),
            })
            .collect();

        let docs: Vec<&Value> = matched.iter().map(|(_, _, doc)| *doc).collect();
        let aggregations = request
            .aggs
            .iter()
            .map(|(name, agg)| (name.clone(), aggregate(agg, &docs)))
            .collect();

        Ok(SearchResponse {
            hits: Hits { total, hits },
            aggregations,
        })
    }
}

// --- field access ---

/// Leaf values at a dotted field, with arrays flattened.
fn field_values<'a>(doc: &'a Value, field: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for step in field.split('.') {
        current = current
            .into_iter()
            .flat_map(|v| match v {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .filter_map(|v| v.get(step))
            .collect();
    }
    current
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .filter(|v| !v.is_null())
        .collect()
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field_strings(doc: &Value, field: &str) -> Vec<String> {
    field_values(doc, field)
        .into_iter()
        .filter_map(value_string)
        .collect()
}

/// Concrete field names for a pattern; a trailing `.*` expands object keys.
fn expand_field_pattern(doc: &Value, pattern: &str) -> Vec<String> {
    match pattern.strip_suffix(".*") {
        None => vec![pattern.to_string()],
        Some(prefix) => field_values(doc, prefix)
            .into_iter()
            .filter_map(Value::as_object)
            .flat_map(|obj| obj.keys().map(|k| format!("{prefix}.{k}")))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    }
}

// --- text analysis ---

struct Token {
    start: usize,
    end: usize,
    text: String,
}

fn tokens_with_spans(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        match (c.is_alphanumeric(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                tokens.push(Token {
                    start: s,
                    end: i,
                    text: text[s..i].to_lowercase(),
                });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            start: s,
            end: text.len(),
            text: text[s..].to_lowercase(),
        });
    }
    tokens
}

fn tokenize(text: &str) -> Vec<String> {
    tokens_with_spans(text).into_iter().map(|t| t.text).collect()
}

/// `fuzziness: AUTO` by term length.
fn auto_fuzziness(term: &str) -> usize {
    match term.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// Optimal string alignment distance (adjacent transpositions count once).
fn damerau_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut d = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in d.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        d[0][j] = j;
    }
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            d[i][j] = (d[i - 1][j] + 1)
                .min(d[i][j - 1] + 1)
                .min(d[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                d[i][j] = d[i][j].min(d[i - 2][j - 2] + 1);
            }
        }
    }
    d[a.len()][b.len()]
}

fn fuzzy_eq(query_term: &str, token: &str) -> bool {
    query_term == token || damerau_distance(query_term, token) <= auto_fuzziness(query_term)
}

/// Whether `query` appears in `tokens` in order with at most `slop` gaps.
fn phrase_matches(tokens: &[String], query: &[String], slop: usize, prefix_last: bool) -> bool {
    let Some((last, head)) = query.split_last() else {
        return false;
    };
    let term_matches = |k: usize, token: &str| {
        if k == head.len() && prefix_last {
            token.starts_with(last.as_str())
        } else {
            token == query[k]
        }
    };
    for start in 0..tokens.len() {
        if !term_matches(0, &tokens[start]) {
            continue;
        }
        let mut pos = start;
        let mut found = true;
        for k in 1..query.len() {
            match (pos + 1..tokens.len()).find(|&p| term_matches(k, &tokens[p])) {
                Some(p) => pos = p,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found && pos - start - (query.len() - 1) <= slop {
            return true;
        }
    }
    false
}

// --- dates ---

/// A range bound as a day, rounded per Elasticsearch date math.
fn date_bound(bound: &str, round_up: bool) -> Option<NaiveDate> {
    let (date_part, rounding) = match bound.split_once("||") {
        Some((date, math)) => (date, math.strip_prefix('/')),
        None => (bound, None),
    };
    let pieces: Vec<&str> = date_part.trim().split('-').collect();
    let year: i32 = pieces.first()?.parse().ok()?;
    let month = match pieces.get(1) {
        Some(m) => m.parse::<u32>().ok()?,
        None => 1,
    };
    let day = match pieces.get(2) {
        Some(d) => d.parse::<u32>().ok()?,
        None => 1,
    };
    let unit = match (rounding, pieces.len()) {
        (Some(unit), _) => unit,
        (None, 1) => "y",
        (None, 2) => "M",
        (None, _) => "d",
    };
    let day_date = NaiveDate::from_ymd_opt(year, month, day)?;
    let (floor, span) = match unit {
        "y" => (NaiveDate::from_ymd_opt(year, 1, 1)?, Months::new(12)),
        "M" => (NaiveDate::from_ymd_opt(year, month, 1)?, Months::new(1)),
        _ => return Some(day_date),
    };
    if round_up {
        floor.checked_add_months(span)?.pred_opt()
    } else {
        Some(floor)
    }
}

fn range_matches(
    value: NaiveDate,
    gt: &Option<String>,
    gte: &Option<String>,
    lt: &Option<String>,
    lte: &Option<String>,
) -> bool {
    let check = |bound: &Option<String>, round_up: bool, ok: fn(NaiveDate, NaiveDate) -> bool| {
        match bound {
            None => true,
            Some(b) => date_bound(b, round_up).map(|d| ok(value, d)).unwrap_or(false),
        }
    };
    check(gt, true, |v, d| v > d)
        && check(gte, false, |v, d| v >= d)
        && check(lt, false, |v, d| v < d)
        && check(lte, true, |v, d| v <= d)
}

// --- evaluation ---

fn seeded_score(seed: &str, value: &str) -> f64 {
    let digest = Sha256::digest(format!("{seed}\u{0}{value}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes) as f64 / u64::MAX as f64
}

/// `Some(score)` when `doc` matches.
fn evaluate(query: &Query, doc: &Value, id: &str) -> Option<f64> {
    match query {
        Query::MatchAll => Some(1.0),
        Query::Bool(b) => {
            for clause in &b.filter {
                evaluate(clause, doc, id)?;
            }
            if b.must_not.iter().any(|c| evaluate(c, doc, id).is_some()) {
                return None;
            }
            let mut score = 0.0;
            for clause in &b.must {
                score += evaluate(clause, doc, id)?;
            }
            let mut should_matched = 0u32;
            for clause in &b.should {
                if let Some(s) = evaluate(clause, doc, id) {
                    should_matched += 1;
                    score += s;
                }
            }
            let required = b.minimum_should_match.unwrap_or(
                if b.should.is_empty() || !b.must.is_empty() || !b.filter.is_empty() {
                    0
                } else {
                    1
                },
            );
            (should_matched >= required).then_some(score)
        }
        Query::Term { field, value } => field_strings(doc, field)
            .iter()
            .any(|v| v == value)
            .then_some(1.0),
        Query::Terms { field, values } => field_strings(doc, field)
            .iter()
            .any(|v| values.contains(v))
            .then_some(1.0),
        Query::Exists { field } => (!field_values(doc, field).is_empty()).then_some(1.0),
        Query::Range {
            field,
            gt,
            gte,
            lt,
            lte,
        } => field_strings(doc, field)
            .iter()
            .filter_map(|v| parse_date(v))
            .any(|d| range_matches(d, gt, gte, lt, lte))
            .then_some(1.0),
        Query::MatchPhrase { field, query, slop } => {
            let query_tokens = tokenize(query);
            field_strings(doc, field)
                .iter()
                .any(|v| phrase_matches(&tokenize(v), &query_tokens, *slop as usize, false))
                .then_some(query_tokens.len() as f64)
        }
        Query::MatchPhrasePrefix { field, query } => {
            let query_tokens = tokenize(query);
            field_strings(doc, field)
                .iter()
                .any(|v| phrase_matches(&tokenize(v), &query_tokens, 0, true))
                .then_some(query_tokens.len() as f64)
        }
        Query::Match {
            field,
            query,
            fuzzy,
        } => {
            let doc_tokens: Vec<String> = field_strings(doc, field)
                .iter()
                .flat_map(|v| tokenize(v))
                .collect();
            let matched = tokenize(query)
                .iter()
                .filter(|term| {
                    doc_tokens.iter().any(|t| {
                        if *fuzzy {
                            fuzzy_eq(term, t)
                        } else {
                            *term == t
                        }
                    })
                })
                .count();
            (matched > 0).then_some(matched as f64)
        }
        Query::FunctionScore {
            query,
            random_score,
        } => {
            evaluate(query, doc, id)?;
            Some(match &random_score.seed {
                Some(seed) => {
                    let value = random_score
                        .field
                        .as_deref()
                        .and_then(|f| field_strings(doc, f).into_iter().next())
                        .unwrap_or_else(|| id.to_string());
                    seeded_score(seed, &value)
                }
                None => rand::thread_rng().gen::<f64>(),
            })
        }
    }
}

fn sort_matches(matched: &mut [(f64, String, &Value)], request: &SearchRequest) {
    matched.sort_by(|(score_a, id_a, doc_a), (score_b, id_b, doc_b)| {
        for sort in &request.sort {
            let key = |doc: &Value| {
                let dates = field_strings(doc, &sort.field)
                    .iter()
                    .filter_map(|v| parse_date(v))
                    .collect::<Vec<_>>();
                if sort.descending {
                    dates.into_iter().max()
                } else {
                    dates.into_iter().min()
                }
            };
            let ordering = match (key(doc_a), key(doc_b)) {
                (Some(a), Some(b)) if sort.descending => b.cmp(&a),
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        if request.sort.is_empty() {
            let by_score = score_b.partial_cmp(score_a).unwrap_or(Ordering::Equal);
            if by_score != Ordering::Equal {
                return by_score;
            }
        }
        id_a.cmp(id_b)
    });
}

// --- highlighting ---

enum HighlightTerm {
    Exact(String),
    Fuzzy(String),
    Prefix(String),
}

impl HighlightTerm {
    fn matches(&self, token: &str) -> bool {
        match self {
            HighlightTerm::Exact(term) => term == token,
            HighlightTerm::Fuzzy(term) => fuzzy_eq(term, token),
            HighlightTerm::Prefix(term) => token.starts_with(term.as_str()),
        }
    }
}

/// Terms of positive text clauses; `must_not` subtrees are skipped.
fn collect_highlight_terms(query: &Query) -> Vec<HighlightTerm> {
    let mut terms = Vec::new();
    let mut stack = vec![query];
    while let Some(q) = stack.pop() {
        match q {
            Query::Bool(b) => stack.extend(b.filter.iter().chain(&b.must).chain(&b.should)),
            Query::FunctionScore { query, .. } => stack.push(query.as_ref()),
            Query::MatchPhrase { query, .. } => {
                terms.extend(tokenize(query).into_iter().map(HighlightTerm::Exact))
            }
            Query::Match { query, fuzzy, .. } => terms.extend(tokenize(query).into_iter().map(|t| {
                if *fuzzy {
                    HighlightTerm::Fuzzy(t)
                } else {
                    HighlightTerm::Exact(t)
                }
            })),
            Query::MatchPhrasePrefix { query, .. } => {
                let mut tokens = tokenize(query);
                if let Some(last) = tokens.pop() {
                    terms.push(HighlightTerm::Prefix(last));
                }
                terms.extend(tokens.into_iter().map(HighlightTerm::Exact));
            }
            _ => {}
        }
    }
    terms
}

fn highlight_text(text: &str, terms: &[HighlightTerm]) -> Option<String> {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    let mut any = false;
    for token in tokens_with_spans(text) {
        if terms.iter().any(|t| t.matches(&token.text)) {
            out.push_str(&text[last..token.start]);
            out.push_str("<em>");
            out.push_str(&text[token.start..token.end]);
            out.push_str("</em>");
            last = token.end;
            any = true;
        }
    }
    out.push_str(&text[last..]);
    any.then_some(out)
}

fn highlight(
    doc: &Value,
    patterns: &[String],
    terms: &[HighlightTerm],
) -> BTreeMap<String, Vec<String>> {
    let mut highlights = BTreeMap::new();
    if terms.is_empty() {
        return highlights;
    }
    for pattern in patterns {
        for field in expand_field_pattern(doc, pattern) {
            let snippets: Vec<String> = field_strings(doc, &field)
                .iter()
                .filter_map(|v| highlight_text(v, terms))
                .collect();
            if !snippets.is_empty() {
                highlights.insert(field, snippets);
            }
        }
    }
    highlights
}

// --- aggregations ---

fn aggregate(agg: &Aggregation, docs: &[&Value]) -> AggregationResult {
    match agg {
        Aggregation::Terms {
            field,
            include,
            size,
            aggs,
        } => {
            let mut by_key: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
            for doc in docs {
                let keys: BTreeSet<String> = field_strings(doc, field).into_iter().collect();
                for key in keys {
                    if include.as_ref().map(|inc| inc.contains(&key)).unwrap_or(true) {
                        by_key.entry(key).or_default().push(*doc);
                    }
                }
            }
            let mut buckets: Vec<Bucket> = by_key
                .into_iter()
                .map(|(key, bucket_docs)| Bucket {
                    key: Value::String(key),
                    key_as_string: None,
                    doc_count: bucket_docs.len() as u64,
                    aggs: aggs
                        .iter()
                        .map(|(name, sub)| (name.clone(), aggregate(sub, &bucket_docs)))
                        .collect(),
                })
                .collect();
            buckets.sort_by(|a, b| {
                b.doc_count
                    .cmp(&a.doc_count)
                    .then_with(|| a.key_string().cmp(&b.key_string()))
            });
            buckets.truncate(*size);
            AggregationResult { buckets }
        }
        Aggregation::YearHistogram {
            field,
            descending,
            min_doc_count,
        } => {
            let mut by_year: BTreeMap<i32, u64> = BTreeMap::new();
            for doc in docs {
                let years: BTreeSet<i32> = field_strings(doc, field)
                    .iter()
                    .filter_map(|v| parse_date(v))
                    .map(|d| d.year())
                    .collect();
                for year in years {
                    *by_year.entry(year).or_default() += 1;
                }
            }
            let mut buckets: Vec<Bucket> = by_year
                .into_iter()
                .filter(|(_, count)| count >= min_doc_count)
                .filter_map(|(year, count)| {
                    let start = NaiveDate::from_ymd_opt(year, 1, 1)?
                        .and_hms_opt(0, 0, 0)?
                        .and_utc()
                        .timestamp_millis();
                    Some(Bucket {
                        key: Value::from(start),
                        key_as_string: Some(format!("{year:04}")),
                        doc_count: count,
                        aggs: BTreeMap::new(),
                    })
                })
                .collect();
            if *descending {
                buckets.reverse();
            }
            AggregationResult { buckets }
        }
    }
}

impl InMemoryEngine {
    /// Total document count across every index, for assertions.
    pub fn total_doc_count(&self) -> usize {
        self.read().indexes.values().map(|i| i.docs.len()).sum()
    }

    /// The definition an index was created with.
    pub fn definition_of(&self, index: &str) -> Option<IndexDefinition> {
        self.read().indexes.get(index).map(|i| i.definition.clone())
    }
}
