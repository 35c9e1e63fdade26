//! Hybrid retriever (C8) and query relaxation (C9)
//!
//! A search runs a keyword-exact pass over the metadata list (the trust
//! anchor against name-confusion hallucinations) and a dense-vector pass
//! over the flat index, applies the date filter to both, cleanses
//! precise-entity results, and merges keyword hits ahead of vector hits.
//!
//! When a dated search comes back empty it is re-run exactly once without
//! the date filter; if even the relaxed pass finds nothing the caller
//! renders the fixed no-record envelope, which the agent must never
//! contradict.

use std::collections::HashSet;

use aho_corasick::AhoCorasick;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::config::DataPaths;
use crate::datefilter::{self, DateRange};
use crate::embedding::{EmbeddingError, TextEmbedder};
use crate::index::{FlatIndex, IndexError};
use crate::record::SubChunk;

/// Fixed envelope returned when nothing relevant exists in the corpus.
pub const NO_RECORD_ENVELOPE: &str = "[no-record] 没有找到相关的日记记录";

/// Queries shorter than this (in chars) are treated as seeking a specific
/// named entity, which enables post-retrieval cleansing.
const PRECISE_ENTITY_MAX_CHARS: usize = 15;
/// Queries shorter than this get the keyword-exact pass.
const SHORT_QUERY_MAX_CHARS: usize = 20;
/// Broad "show me my stuff" tokens that bypass cleansing for user-authored
/// hits: 记录/内容/最近/什么 and short variants of the same asks.
const GENERIC_TOKENS: &[&str] = &["记录", "内容", "最近", "什么", "日记", "说过"];

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("Index holds {ntotal} vectors but metadata lists {metadata} chunks; refusing to serve retrieval")]
    SizeMismatch { ntotal: usize, metadata: usize },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metadata file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which pass produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitOrigin {
    Keyword,
    Vector,
}

/// One retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub id: String,
    pub source: String,
    pub date: Option<String>,
    pub content: String,
    /// Squared L2 distance; 0.0 for keyword-exact hits
    pub distance: f32,
    pub origin: HitOrigin,
}

/// Immutable `(index, metadata)` pair. Published as a unit so readers can
/// never observe a vector without its chunk or vice versa.
#[derive(Debug)]
pub struct Snapshot {
    index: Option<FlatIndex>,
    metadata: Vec<SubChunk>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            index: None,
            metadata: Vec::new(),
        }
    }

    /// Load the published pair from disk. A completely unindexed corpus
    /// (neither file present) is a valid empty snapshot; a size mismatch is
    /// fatal and retrieval refuses to serve.
    pub fn load(paths: &DataPaths) -> Result<Self, RetrieverError> {
        let index = match FlatIndex::load(&paths.index) {
            Ok(i) => Some(i),
            Err(IndexError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let metadata: Vec<SubChunk> = match std::fs::read_to_string(&paths.metadata) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let ntotal = index.as_ref().map(FlatIndex::ntotal).unwrap_or(0);
        if ntotal != metadata.len() {
            return Err(RetrieverError::SizeMismatch {
                ntotal,
                metadata: metadata.len(),
            });
        }
        Ok(Self { index, metadata })
    }

    /// Build from in-memory parts, enforcing the size invariant.
    pub fn from_parts(
        index: Option<FlatIndex>,
        metadata: Vec<SubChunk>,
    ) -> Result<Self, RetrieverError> {
        let ntotal = index.as_ref().map(FlatIndex::ntotal).unwrap_or(0);
        if ntotal != metadata.len() {
            return Err(RetrieverError::SizeMismatch {
                ntotal,
                metadata: metadata.len(),
            });
        }
        Ok(Self { index, metadata })
    }

    pub fn ntotal(&self) -> usize {
        self.metadata.len()
    }

    pub fn metadata(&self) -> &[SubChunk] {
        &self.metadata
    }

    /// Does any published file exist for this layout?
    pub fn exists(paths: &DataPaths) -> bool {
        paths.index.exists() || paths.metadata.exists()
    }
}

/// How the date filter shapes the vector search depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterShape {
    None,
    /// `YYYY-MM-DD`: very narrow, search deep
    SingleDay,
    /// 上旬/中旬/下旬: ten days, search wide
    Dekad,
    /// Month, year, relative windows
    Other,
}

impl FilterShape {
    fn of(filter: Option<&str>) -> Self {
        let Some(filter) = filter else {
            return FilterShape::None;
        };
        let clean = filter.trim();
        if clean.contains("上旬") || clean.contains("中旬") || clean.contains("下旬") {
            FilterShape::Dekad
        } else if clean.len() == 10 && clean.matches('-').count() == 2 {
            FilterShape::SingleDay
        } else {
            FilterShape::Other
        }
    }

    /// Candidate depth for the vector pass. Narrow filters discard most
    /// neighbors, so they search proportionally deeper.
    fn search_depth(self, k: usize, ntotal: usize) -> usize {
        match self {
            FilterShape::None => k,
            FilterShape::SingleDay => (k * 200).min(ntotal),
            FilterShape::Dekad => (k * 100).min(ntotal),
            FilterShape::Other => (k * 50).min(ntotal),
        }
    }
}

/// Hybrid search over one snapshot.
pub struct Retriever<'a> {
    snapshot: &'a Snapshot,
    embedder: &'a dyn TextEmbedder,
}

impl<'a> Retriever<'a> {
    pub fn new(snapshot: &'a Snapshot, embedder: &'a dyn TextEmbedder) -> Self {
        Self { snapshot, embedder }
    }

    /// Top-level search with one-shot relaxation: if a dated search yields
    /// nothing, retry once without the date filter.
    pub fn search(
        &self,
        query: &str,
        date_filter: Option<&str>,
        k: usize,
        today: NaiveDate,
    ) -> Result<Vec<Hit>, RetrieverError> {
        let _span = tracing::info_span!("search", k, filter = date_filter.unwrap_or("-")).entered();

        let range = match date_filter {
            None => None,
            Some(filter) => match datefilter::parse_strict(filter, today) {
                Ok(range) => range,
                Err(unparsed) => {
                    tracing::warn!(filter = %unparsed, "Unparsable date filter, searching unfiltered");
                    None
                }
            },
        };
        let shape = if range.is_some() {
            FilterShape::of(date_filter)
        } else {
            FilterShape::None
        };

        let hits = self.search_once(query, range, shape, k)?;
        if !hits.is_empty() || range.is_none() {
            return Ok(hits);
        }

        // Relaxation: the dated pass found nothing; one retry, never more
        tracing::info!("Dated search empty, relaxing date filter");
        self.search_once(query, None, FilterShape::None, k)
    }

    fn search_once(
        &self,
        query: &str,
        range: Option<DateRange>,
        shape: FilterShape,
        k: usize,
    ) -> Result<Vec<Hit>, RetrieverError> {
        let trimmed = query.trim();
        let query_chars = trimmed.chars().count();
        let precise = query_chars < PRECISE_ENTITY_MAX_CHARS;
        let short = query_chars < SHORT_QUERY_MAX_CHARS;
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();

        let keyword_hits = if short && !tokens.is_empty() {
            self.keyword_pass(&tokens, range.as_ref())
        } else {
            Vec::new()
        };

        let mut vector_hits = self.vector_pass(trimmed, range.as_ref(), shape, k)?;
        if precise {
            vector_hits = cleanse(vector_hits, trimmed, &tokens, self.snapshot);
        }

        // Keyword hits lead; within each group the pass order is preserved
        let mut seen: HashSet<&str> = HashSet::new();
        let mut merged = Vec::with_capacity(k);
        for hit in keyword_hits.iter().chain(vector_hits.iter()) {
            if merged.len() >= k {
                break;
            }
            if seen.insert(hit.id.as_str()) {
                merged.push(hit.clone());
            }
        }
        tracing::debug!(
            keyword = keyword_hits.len(),
            vector = vector_hits.len(),
            merged = merged.len(),
            "Search pass complete"
        );
        Ok(merged)
    }

    /// Exact scan: a chunk matches when every query token is a
    /// case-insensitive substring of its content. Order follows the
    /// metadata list, which is stable across runs.
    fn keyword_pass(&self, tokens: &[&str], range: Option<&DateRange>) -> Vec<Hit> {
        let automaton = match AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(tokens)
        {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "Keyword automaton build failed, skipping keyword pass");
                return Vec::new();
            }
        };

        let mut hits = Vec::new();
        for chunk in &self.snapshot.metadata {
            if let Some(range) = range {
                if !datefilter::date_matches(chunk.date.as_deref(), range) {
                    continue;
                }
            }
            let mut found = vec![false; tokens.len()];
            for m in automaton.find_overlapping_iter(&chunk.content) {
                found[m.pattern().as_usize()] = true;
            }
            if found.iter().all(|&f| f) {
                hits.push(hit_from(chunk, 0.0, HitOrigin::Keyword));
            }
        }
        hits
    }

    /// Dense pass: embed the query, take the k (or deeper, under a date
    /// filter) nearest vectors, then date-filter the positions.
    fn vector_pass(
        &self,
        query: &str,
        range: Option<&DateRange>,
        shape: FilterShape,
        k: usize,
    ) -> Result<Vec<Hit>, RetrieverError> {
        let Some(index) = self.snapshot.index.as_ref() else {
            return Ok(Vec::new());
        };
        if index.ntotal() == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query)?;
        let depth = shape.search_depth(k, index.ntotal());
        let neighbors = index.search(&query_vector, depth)?;

        let mut hits = Vec::new();
        for (position, distance) in neighbors {
            let Some(chunk) = self.snapshot.metadata.get(position) else {
                tracing::warn!(position, "Index position beyond metadata, skipping");
                continue;
            };
            if let Some(range) = range {
                if !datefilter::date_matches(chunk.date.as_deref(), range) {
                    continue;
                }
            }
            hits.push(hit_from(chunk, distance, HitOrigin::Vector));
        }
        Ok(hits)
    }
}

/// Post-retrieval cleanse for precise-entity queries.
///
/// A vector hit normally survives only when the core token (the longest
/// one) appears in its content. User-authored hits are held to a softer
/// standard: generic queries bypass cleansing entirely, and otherwise any
/// multi-char token match keeps the hit.
fn cleanse(hits: Vec<Hit>, query: &str, tokens: &[&str], snapshot: &Snapshot) -> Vec<Hit> {
    let Some(core_token) = tokens.iter().max_by_key(|t| t.chars().count()) else {
        return hits;
    };
    let core_lower = core_token.to_lowercase();
    let generic = is_generic_query(query);
    let multi_char_tokens: Vec<String> = tokens
        .iter()
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .collect();

    let user_authored: HashSet<&str> = snapshot
        .metadata
        .iter()
        .filter(|c| c.is_user_authored())
        .map(|c| c.id.as_str())
        .collect();

    let before = hits.len();
    let kept: Vec<Hit> = hits
        .into_iter()
        .filter(|hit| {
            let content = hit.content.to_lowercase();
            if user_authored.contains(hit.id.as_str()) {
                if generic {
                    return true;
                }
                return multi_char_tokens.iter().any(|t| content.contains(t));
            }
            content.contains(&core_lower)
        })
        .collect();
    if kept.len() < before {
        tracing::debug!(dropped = before - kept.len(), core = %core_token, "Cleansed vector hits");
    }
    kept
}

/// Broad queries ("最近的记录", "说了什么") keep everything the vector pass
/// surfaced from the user's own entries. Membership is by the configured
/// token set only: a short unknown name must still be cleansed, or absent
/// entities would come back as plausible-looking noise.
fn is_generic_query(query: &str) -> bool {
    GENERIC_TOKENS.iter().any(|t| query.contains(t))
}

fn hit_from(chunk: &SubChunk, distance: f32, origin: HitOrigin) -> Hit {
    Hit {
        id: chunk.id.clone(),
        source: chunk.source.clone(),
        date: chunk.date.clone(),
        content: chunk.content.clone(),
        distance,
        origin,
    }
}

/// Render hits as the observation envelope the agent grounds its answer in.
/// Empty results render as the fixed no-record sentinel.
pub fn render_envelope(hits: &[Hit]) -> String {
    if hits.is_empty() {
        return NO_RECORD_ENVELOPE.to_string();
    }
    let mut out = String::from("检索到的日记记录：\n");
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}] {} — {}\n",
            i + 1,
            hit.id,
            hit.date.as_deref().unwrap_or("无日期"),
            hit.content
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SOURCE_VOICE;

    /// Deterministic embedder: maps known needles onto axis-aligned
    /// vectors so distances are predictable.
    struct FakeEmbedder;

    impl TextEmbedder for FakeEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.0f32; 4];
            if text.contains("张三") {
                v[0] = 1.0;
            }
            if text.contains("抑郁") {
                v[1] = 1.0;
            }
            if text.contains("项目") {
                v[2] = 1.0;
            }
            if v.iter().all(|&x| x == 0.0) {
                v[3] = 1.0;
            }
            Ok(v)
        }
    }

    /// Embedder that always fails, for error-path tests.
    struct BrokenEmbedder;

    impl TextEmbedder for BrokenEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::RetriesExhausted {
                attempts: 3,
                last_error: "connection refused".into(),
            })
        }
    }

    fn chunk(id: &str, date: Option<&str>, content: &str) -> SubChunk {
        SubChunk {
            id: id.into(),
            source: SOURCE_VOICE.into(),
            date: date.map(String::from),
            time: None,
            content: content.into(),
            conversation_id: None,
            user_id: None,
            original_id: None,
            split_index: None,
            total_splits: None,
        }
    }

    fn snapshot(chunks: Vec<SubChunk>) -> Snapshot {
        let embedder = FakeEmbedder;
        let mut index = FlatIndex::new(4).unwrap();
        let vectors: Vec<Vec<f32>> = chunks
            .iter()
            .map(|c| embedder.embed(&c.content).unwrap())
            .collect();
        index.add(&vectors).unwrap();
        Snapshot::from_parts(Some(index), chunks).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[test]
    fn test_keyword_hit_leads_with_zero_distance() {
        let snap = snapshot(vec![
            chunk("voice_20240101", Some("2024-01-01"), "今天见了 张三，聊了项目。"),
            chunk("other_1", Some("2024-02-01"), "普通的一天，没有特别的事。"),
        ]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever.search("张三", None, 5, today()).unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, "voice_20240101");
        assert_eq!(hits[0].origin, HitOrigin::Keyword);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_keyword_requires_every_token() {
        let snap = snapshot(vec![
            chunk("a", Some("2024-01-01"), "张三来了"),
            chunk("b", Some("2024-01-02"), "张三聊了项目"),
        ]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever.search("张三 项目", None, 5, today()).unwrap();
        let keyword_ids: Vec<&str> = hits
            .iter()
            .filter(|h| h.origin == HitOrigin::Keyword)
            .map(|h| h.id.as_str())
            .collect();
        assert_eq!(keyword_ids, ["b"]);
    }

    #[test]
    fn test_keyword_ascii_case_insensitive() {
        let snap = snapshot(vec![chunk("a", Some("2024-01-01"), "昨天和 Alice 开会")]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever.search("alice", None, 5, today()).unwrap();
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].origin, HitOrigin::Keyword);
    }

    #[test]
    fn test_long_query_skips_keyword_pass() {
        let snap = snapshot(vec![chunk("a", Some("2024-01-01"), "张三来了")]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        // 20+ chars: vector pass only
        let hits = retriever
            .search("请帮我查一下之前记录里张三什么时候来过家里", None, 5, today())
            .unwrap();
        assert!(hits.iter().all(|h| h.origin == HitOrigin::Vector));
    }

    #[test]
    fn test_date_filter_dekad() {
        let snap = snapshot(vec![
            chunk("late", Some("2024-11-25"), "抑郁的症状又出现了"),
            chunk("early", Some("2024-11-05"), "抑郁的情绪持续了一天"),
        ]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever
            .search("抑郁 症状", Some("2024-11-下旬"), 5, today())
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.id == "late"));
    }

    #[test]
    fn test_null_date_never_matches_filter() {
        let snap = snapshot(vec![chunk("undated", None, "张三来了")]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever.search("张三", Some("2024-11"), 5, today()).unwrap();
        // Dated pass drops it; relaxation then brings it back unfiltered
        assert_eq!(hits[0].id, "undated");
    }

    #[test]
    fn test_relaxation_when_dated_search_empty() {
        let snap = snapshot(vec![chunk(
            "voice_old",
            Some("2024-01-01"),
            "内心的小孩 名字叫小明",
        )]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever
            .search("内心的小孩 名字", Some("2024-06"), 5, today())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "voice_old");
    }

    #[test]
    fn test_no_relaxation_when_dated_search_has_hits() {
        let snap = snapshot(vec![
            chunk("in_range", Some("2024-06-15"), "张三六月来访"),
            chunk("out_of_range", Some("2024-01-01"), "张三一月来访"),
        ]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever.search("张三", Some("2024-06"), 5, today()).unwrap();
        assert!(hits.iter().all(|h| h.id == "in_range"));
    }

    #[test]
    fn test_unparsable_filter_searches_unfiltered() {
        let snap = snapshot(vec![chunk("a", Some("2024-01-01"), "张三来了")]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever
            .search("张三", Some("下个星期"), 5, today())
            .unwrap();
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn test_merge_dedupes_keyword_over_vector() {
        let snap = snapshot(vec![chunk("a", Some("2024-01-01"), "张三来了")]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever.search("张三", None, 5, today()).unwrap();
        // One chunk matched by both passes appears once, as keyword
        assert_eq!(hits.iter().filter(|h| h.id == "a").count(), 1);
        assert_eq!(hits[0].origin, HitOrigin::Keyword);
    }

    #[test]
    fn test_truncates_to_k() {
        let chunks: Vec<SubChunk> = (0..10)
            .map(|i| chunk(&format!("c{}", i), Some("2024-01-01"), "张三来了"))
            .collect();
        let snap = snapshot(chunks);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever.search("张三", None, 3, today()).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_cleanse_drops_unrelated_vector_hits() {
        // Non-voice chunks whose content lacks the core token get cleansed
        let mut far = chunk("sys_1", Some("2024-01-01"), "系统生成的别的内容");
        far.source = "import".into();
        let snap = snapshot(vec![far, chunk("v1", Some("2024-01-02"), "张三来了")]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever.search("张三", None, 5, today()).unwrap();
        assert!(hits.iter().all(|h| h.id != "sys_1"));
    }

    #[test]
    fn test_generic_query_bypasses_cleanse_for_voice() {
        let snap = snapshot(vec![chunk("v1", Some("2024-01-01"), "平凡的一天")]);
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        // "最近的记录" contains generic tokens: voice hits survive cleansing
        let hits = retriever.search("最近的记录", None, 5, today()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "v1");
    }

    #[test]
    fn test_empty_snapshot_returns_no_hits() {
        let snap = Snapshot::empty();
        let retriever = Retriever::new(&snap, &FakeEmbedder);
        let hits = retriever.search("李四", None, 5, today()).unwrap();
        assert!(hits.is_empty());
        assert_eq!(render_envelope(&hits), NO_RECORD_ENVELOPE);
    }

    #[test]
    fn test_embedding_failure_propagates() {
        let snap = snapshot(vec![chunk("a", Some("2024-01-01"), "一些很长的无关内容在这里")]);
        let retriever = Retriever::new(&snap, &BrokenEmbedder);
        let err = retriever
            .search("这是一个超过二十个字符的长查询所以没有关键词通道", None, 5, today())
            .unwrap_err();
        assert!(matches!(err, RetrieverError::Embedding(_)));
    }

    #[test]
    fn test_size_mismatch_is_fatal() {
        let mut index = FlatIndex::new(4).unwrap();
        index.add(&[vec![0.0, 0.0, 0.0, 1.0]]).unwrap();
        let err = Snapshot::from_parts(Some(index), Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            RetrieverError::SizeMismatch { ntotal: 1, metadata: 0 }
        ));
    }

    #[test]
    fn test_render_envelope_lists_hits() {
        let hits = vec![hit_from(
            &chunk("a", Some("2024-01-01"), "张三来了"),
            0.0,
            HitOrigin::Keyword,
        )];
        let envelope = render_envelope(&hits);
        assert!(envelope.contains("张三来了"));
        assert!(envelope.contains("2024-01-01"));
        assert!(envelope.contains("[a]"));
    }
}
