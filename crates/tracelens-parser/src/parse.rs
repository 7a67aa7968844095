use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tracelens_types::{ContentItem, Entry, Role, TokenUsage};

use crate::Result;
use crate::schema::{AssistantRecord, RawUsage, SummaryRecord, SystemRecord, UserRecord};

/// One line that could not be decoded into the expected envelope.
///
/// Issues are data, not errors: the stream continues with the next line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseIssue {
    /// 1-based line number within the source file
    pub line_no: usize,
    pub reason: String,
    /// The raw line text, preserved for diagnostics
    pub raw: String,
}

/// Result of parsing one transcript file: decoded entries plus the lines
/// that failed to decode.
#[derive(Debug, Default)]
pub struct FileParse {
    pub entries: Vec<Entry>,
    pub issues: Vec<ParseIssue>,
}

/// Decode one raw log line into an `Entry`.
///
/// Never panics on malformed input. Lines that are not JSON objects, carry
/// no recognized record type, or fail envelope validation become a
/// `ParseIssue`. Content blocks with unrecognized kinds degrade to
/// `ContentItem::Unknown` inside an otherwise valid entry.
pub fn parse_line(line: &str, line_no: usize) -> std::result::Result<Entry, ParseIssue> {
    let issue = |reason: String| ParseIssue {
        line_no,
        reason,
        raw: line.to_string(),
    };

    let value: Value =
        serde_json::from_str(line).map_err(|e| issue(format!("invalid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(issue("not a JSON object".to_string()));
    }

    let record_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| issue("missing record type".to_string()))?
        .to_string();

    match record_type.as_str() {
        "user" => serde_json::from_value::<UserRecord>(value)
            .map(user_entry)
            .map_err(|e| issue(format!("invalid user record: {}", e))),
        "assistant" => serde_json::from_value::<AssistantRecord>(value)
            .map(assistant_entry)
            .map_err(|e| issue(format!("invalid assistant record: {}", e))),
        "system" => serde_json::from_value::<SystemRecord>(value)
            .map(system_entry)
            .map_err(|e| issue(format!("invalid system record: {}", e))),
        "summary" => serde_json::from_value::<SummaryRecord>(value)
            .map(summary_entry)
            .map_err(|e| issue(format!("invalid summary record: {}", e))),
        other => Err(issue(format!("unrecognized record type `{}`", other))),
    }
}

/// Parse a whole transcript file line by line. Blank lines are skipped.
/// Only a failure to read the file at all is an `Error`; per-line failures
/// accumulate as issues.
pub fn parse_file(path: &Path) -> Result<FileParse> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut parse = FileParse::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line, idx + 1) {
            Ok(entry) => parse.entries.push(entry),
            Err(iss) => parse.issues.push(iss),
        }
    }
    Ok(parse)
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn content_items(blocks: Vec<Value>) -> Vec<ContentItem> {
    blocks.into_iter().map(ContentItem::from_value).collect()
}

fn user_entry(record: UserRecord) -> Entry {
    Entry {
        id: record.uuid,
        parent_id: record.parent_uuid,
        role: Role::User,
        timestamp: parse_timestamp(&record.timestamp),
        session_id: record.session_id,
        cwd: record.cwd,
        usage: None,
        is_sidechain: record.is_sidechain,
        is_meta: record.is_meta,
        tool_use_result: record.tool_use_result,
        content: content_items(record.message.content),
    }
}

fn assistant_entry(record: AssistantRecord) -> Entry {
    Entry {
        id: record.uuid,
        parent_id: record.parent_uuid,
        role: Role::Assistant,
        timestamp: parse_timestamp(&record.timestamp),
        session_id: record.session_id,
        cwd: record.cwd,
        usage: record.message.usage.map(token_usage),
        is_sidechain: record.is_sidechain,
        is_meta: false,
        tool_use_result: None,
        content: content_items(record.message.content),
    }
}

fn system_entry(record: SystemRecord) -> Entry {
    Entry {
        id: record.uuid,
        parent_id: record.parent_uuid,
        role: Role::System,
        timestamp: parse_timestamp(&record.timestamp),
        session_id: record.session_id,
        cwd: record.cwd,
        usage: None,
        is_sidechain: record.is_sidechain,
        is_meta: record.is_meta,
        tool_use_result: None,
        content: vec![ContentItem::Text {
            text: record.content,
        }],
    }
}

fn summary_entry(record: SummaryRecord) -> Entry {
    Entry {
        // Summary records have no uuid of their own; derive one from the
        // leaf they summarize so dedup and threading stay well-defined.
        id: format!("{}:summary", record.leaf_uuid),
        parent_id: Some(record.leaf_uuid),
        role: Role::Summary,
        timestamp: None,
        // Filled from sibling entries during assembly.
        session_id: String::new(),
        cwd: record.cwd,
        usage: None,
        is_sidechain: false,
        is_meta: false,
        tool_use_result: None,
        content: vec![ContentItem::Text {
            text: record.summary,
        }],
    }
}

fn token_usage(raw: RawUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: raw.input_tokens.unwrap_or(0),
        output_tokens: raw.output_tokens.unwrap_or(0),
        cache_creation_input_tokens: raw.cache_creation_input_tokens.unwrap_or(0),
        cache_read_input_tokens: raw.cache_read_input_tokens.unwrap_or(0),
    }
}
