use std::collections::{HashMap, HashSet};

use tracelens_types::{Entry, Role, Session, SessionSummary, ThreadIndex, TokenUsage, truncate};

/// Display bound for derived session titles, in characters.
pub const TITLE_DISPLAY_CHARS: usize = 80;

/// Assemble parsed entries into a session.
///
/// Ordering is `(timestamp, id)`; entries without timestamps sort first.
/// Duplicate ids keep the last-seen occurrence: the logs are append-only,
/// so a replayed record supersedes the one it corrects. Returns `None` for
/// an empty entry set or one with no session id anywhere; the caller
/// treats that file as unreadable.
///
/// Assembly is pure: no cache, no filesystem. Hit/miss decisions belong to
/// the orchestrator alone.
pub fn assemble(entries: Vec<Entry>) -> Option<Session> {
    if entries.is_empty() {
        return None;
    }

    // Keep the last occurrence per id; a replayed record lands in the
    // slot of the one it replaces.
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<Option<Entry>> = Vec::with_capacity(entries.len());
    for entry in entries {
        match by_id.get(&entry.id) {
            Some(&slot) => deduped[slot] = Some(entry),
            None => {
                by_id.insert(entry.id.clone(), deduped.len());
                deduped.push(Some(entry));
            }
        }
    }
    let mut entries: Vec<Entry> = deduped.into_iter().flatten().collect();

    entries.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });

    let session_id = entries
        .iter()
        .find(|e| !e.session_id.is_empty())
        .map(|e| e.session_id.clone())?;

    let thread = ThreadIndex::from_entries(&entries);
    let summary = summarize(&entries);

    Some(Session {
        session_id,
        entries,
        thread,
        summary,
    })
}

fn summarize(entries: &[Entry]) -> SessionSummary {
    let mut usage = TokenUsage::default();
    for entry in entries {
        usage.merge(&entry.usage_or_default());
    }

    let timestamps = entries.iter().filter_map(|e| e.timestamp);

    SessionSummary {
        message_count: entries.len(),
        usage,
        first_timestamp: timestamps.clone().min(),
        last_timestamp: timestamps.max(),
        cwd: entries.iter().find_map(|e| e.cwd.clone()),
        title: derive_title(entries),
    }
}

/// An explicit summary record wins; otherwise the first user entry that is
/// not a sidechain, not a meta message, and not a descendant of one. Meta
/// descendants are tracked through the parent chain because injected
/// context (startup hooks, command echoes) threads off a meta root.
fn derive_title(entries: &[Entry]) -> Option<String> {
    if let Some(summary) = entries.iter().find(|e| e.role == Role::Summary) {
        let text = summary.text_content();
        if !text.trim().is_empty() {
            return Some(truncate(text.trim(), TITLE_DISPLAY_CHARS));
        }
    }

    let mut meta_ids: HashSet<&str> = HashSet::new();
    for entry in entries {
        let parent_is_meta = entry
            .parent_id
            .as_deref()
            .is_some_and(|p| meta_ids.contains(p));
        if entry.is_meta || parent_is_meta {
            meta_ids.insert(entry.id.as_str());
            continue;
        }

        if entry.role == Role::User && !entry.is_sidechain {
            let text = entry.text_content();
            let leading = text.lines().next().unwrap_or("").trim();
            if !leading.is_empty() {
                return Some(truncate(leading, TITLE_DISPLAY_CHARS));
            }
        }
    }
    None
}
