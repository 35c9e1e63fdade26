//! Journal records and derived sub-chunks
//!
//! A [`JournalRecord`] is the append-only source of truth: one voice-transcribed
//! entry. A [`SubChunk`] is a window of a record's text produced by the
//! splitter; it is the unit of vector indexing and carries explicit provenance
//! fields instead of ad-hoc metadata keys.

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Source tag for voice-transcribed entries. Retrieval treats records with
/// this source as user-authored when deciding whether to cleanse a hit.
pub const SOURCE_VOICE: &str = "voice";

/// One journal entry as stored in the chunk store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Unique ID; insertion time encoded in sortable form (`voice_YYYYMMDD_HHMMSS`)
    pub id: String,
    /// Origin tag (e.g. "voice")
    pub source: String,
    /// Entry date as `YYYY-MM-DD`, or null for undated entries
    pub date: Option<String>,
    /// Entry time as `HH:MM`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Transcribed text, non-empty
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Owner scope tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl JournalRecord {
    /// Build a voice record stamped with the given local time.
    pub fn voice(content: impl Into<String>, now: DateTime<Local>) -> Self {
        Self {
            id: generate_id(now),
            source: SOURCE_VOICE.to_string(),
            date: Some(now.format("%Y-%m-%d").to_string()),
            time: Some(now.format("%H:%M").to_string()),
            content: content.into(),
            conversation_id: None,
            user_id: None,
        }
    }
}

/// Generate a sortable record ID from a timestamp.
///
/// Seconds are included so that entries dictated in the same minute get
/// distinct IDs; the store still rejects true collisions.
pub fn generate_id(now: DateTime<Local>) -> String {
    format!("voice_{}", now.format("%Y%m%d_%H%M%S"))
}

/// Check a date string against the only accepted format, `YYYY-MM-DD`.
pub fn is_valid_date(date: &str) -> bool {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

/// One indexable window of a record's text.
///
/// Position `i` in the metadata list corresponds to vector `i` in the index.
/// Sub-chunks are created by the indexer and never edited; a full rebuild
/// invalidates them en bloc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubChunk {
    /// `{record_id}` when the record fit in one window, else `{record_id}_part_{k}`
    pub id: String,
    pub source: String,
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Window text, at most `chunk_size` chars
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Parent record ID; present only when the record was split
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_splits: Option<u32>,
}

impl SubChunk {
    /// Wrap an unsplit record as a single sub-chunk with the same ID.
    pub fn whole(record: &JournalRecord) -> Self {
        Self {
            id: record.id.clone(),
            source: record.source.clone(),
            date: record.date.clone(),
            time: record.time.clone(),
            content: record.content.clone(),
            conversation_id: record.conversation_id.clone(),
            user_id: record.user_id.clone(),
            original_id: None,
            split_index: None,
            total_splits: None,
        }
    }

    /// Build part `k` of `total` from a split record.
    pub fn part(record: &JournalRecord, content: String, k: u32, total: u32) -> Self {
        Self {
            id: format!("{}_part_{}", record.id, k),
            source: record.source.clone(),
            date: record.date.clone(),
            time: record.time.clone(),
            content,
            conversation_id: record.conversation_id.clone(),
            user_id: record.user_id.clone(),
            original_id: Some(record.id.clone()),
            split_index: Some(k),
            total_splits: Some(total),
        }
    }

    /// Whether this chunk came from a user-authored voice entry.
    pub fn is_user_authored(&self) -> bool {
        self.source == SOURCE_VOICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> JournalRecord {
        JournalRecord {
            id: "voice_20240101_093000".into(),
            source: SOURCE_VOICE.into(),
            date: Some("2024-01-01".into()),
            time: Some("09:30".into()),
            content: "今天见了 张三，聊了项目。".into(),
            conversation_id: None,
            user_id: None,
        }
    }

    #[test]
    fn test_generate_id_sortable() {
        let a = Local.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap();
        let b = Local.with_ymd_and_hms(2024, 1, 1, 9, 30, 5).unwrap();
        let (ida, idb) = (generate_id(a), generate_id(b));
        assert_eq!(ida, "voice_20240101_093000");
        assert!(ida < idb);
    }

    #[test]
    fn test_is_valid_date() {
        assert!(is_valid_date("2024-11-25"));
        assert!(!is_valid_date("2024-13-01"));
        assert!(!is_valid_date("2024/11/25"));
        assert!(!is_valid_date("Nov 25, 2024"));
        assert!(!is_valid_date(""));
    }

    #[test]
    fn test_whole_chunk_keeps_id_and_metadata() {
        let record = sample_record();
        let chunk = SubChunk::whole(&record);
        assert_eq!(chunk.id, record.id);
        assert_eq!(chunk.date, record.date);
        assert!(chunk.original_id.is_none());
        assert!(chunk.split_index.is_none());
    }

    #[test]
    fn test_part_chunk_provenance() {
        let record = sample_record();
        let chunk = SubChunk::part(&record, "今天".into(), 1, 3);
        assert_eq!(chunk.id, "voice_20240101_093000_part_1");
        assert_eq!(chunk.original_id.as_deref(), Some("voice_20240101_093000"));
        assert_eq!(chunk.split_index, Some(1));
        assert_eq!(chunk.total_splits, Some(3));
        assert_eq!(chunk.date, record.date);
    }

    #[test]
    fn test_provenance_absent_from_json_when_unsplit() {
        let json = serde_json::to_string(&SubChunk::whole(&sample_record())).unwrap();
        assert!(!json.contains("original_id"));
        assert!(!json.contains("split_index"));
    }

    #[test]
    fn test_record_roundtrip_with_null_date() {
        let mut record = sample_record();
        record.date = None;
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"date\":null"));
        let back: JournalRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
