use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

/// Maximum number of scored matches attached to one chat turn.
pub const CHAT_RELATED_LIMIT: usize = 3;

/// Category assigned when the source row carries none.
pub const DEFAULT_CATEGORY: &str = "その他";

pub const GREETING_TEXT: &str = "こんにちは！社内FAQチャットボットです。ご質問をお聞かせください。";
pub const REPLY_LEAD_IN: &str = "以下のFAQが関連している可能性があります：\n\n";
pub const REPLY_MORE_RELATED: &str = "\n\n他にも関連するFAQがあります。詳細は下記をご確認ください。";
pub const REPLY_NOT_FOUND: &str =
    "申し訳ございませんが、該当するFAQが見つかりませんでした。\n\n担当者に確認いたしますので、こちらのフォームからお問い合わせください。";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FaqError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FaqId(pub Ulid);

impl FaqId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for FaqId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FaqId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MessageId(pub Ulid);

impl MessageId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One question/answer record of the active FAQ set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaqEntry {
    pub id: FaqId,
    pub question: String,
    pub answer: String,
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub is_active: bool,
    pub sort_order: i64,
}

impl FaqEntry {
    /// Validate one FAQ entry before it is persisted or scored.
    ///
    /// # Errors
    /// Returns [`FaqError::Validation`] when question, answer, or category is blank.
    pub fn validate(&self) -> Result<(), FaqError> {
        if self.question.trim().is_empty() {
            return Err(FaqError::Validation("question MUST be non-empty".to_string()));
        }
        if self.answer.trim().is_empty() {
            return Err(FaqError::Validation("answer MUST be non-empty".to_string()));
        }
        if self.category.trim().is_empty() {
            return Err(FaqError::Validation("category MUST be non-empty".to_string()));
        }
        Ok(())
    }
}

/// Scorer output: one entry plus its relevance score. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoredFaq {
    pub entry: FaqEntry,
    pub score: u32,
}

/// Fixed label set for the category tab surface. Entries synced with other
/// labels still filter correctly; these are only the default tabs.
#[must_use]
pub fn default_categories() -> Vec<&'static str> {
    vec!["料金", "機能・仕様", "操作方法", "契約", "トラブルシューティング", DEFAULT_CATEGORY]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCount {
    pub label: String,
    pub count: usize,
}

/// Count entries per category: the fixed labels in order, then any labels
/// discovered in the entries that are not part of the default set.
#[must_use]
pub fn category_counts(entries: &[FaqEntry]) -> Vec<CategoryCount> {
    let defaults = default_categories();
    let mut counts = defaults
        .iter()
        .map(|label| CategoryCount {
            label: (*label).to_string(),
            count: entries.iter().filter(|entry| entry.category == *label).count(),
        })
        .collect::<Vec<_>>();

    for entry in entries {
        if defaults.contains(&entry.category.as_str()) {
            continue;
        }
        if let Some(existing) = counts.iter_mut().find(|count| count.label == entry.category) {
            existing.count += 1;
        } else {
            counts.push(CategoryCount { label: entry.category.clone(), count: 1 });
        }
    }

    counts
}

fn fold(text: &str) -> String {
    text.to_lowercase()
}

/// Compute the additive relevance score of one entry against a free-text query.
///
/// Rules, applied to case-folded text: +10 for the full query as a question
/// substring, +5 per keyword containing the full query, +3 for the full query
/// as an answer substring, and +1 per whitespace-split term contained in the
/// question, answer, or any keyword (at most +1 per term).
#[must_use]
pub fn score_entry(entry: &FaqEntry, query: &str) -> u32 {
    let query = query.trim();
    if query.is_empty() {
        return 0;
    }

    let query_folded = fold(query);
    let question = fold(&entry.question);
    let answer = fold(&entry.answer);
    let keywords = entry.keywords.iter().map(|keyword| fold(keyword)).collect::<Vec<_>>();

    let mut score = 0;
    if question.contains(&query_folded) {
        score += 10;
    }
    for keyword in &keywords {
        if keyword.contains(&query_folded) {
            score += 5;
        }
    }
    if answer.contains(&query_folded) {
        score += 3;
    }
    for term in query_folded.split_whitespace() {
        if question.contains(term)
            || answer.contains(term)
            || keywords.iter().any(|keyword| keyword.contains(term))
        {
            score += 1;
        }
    }

    score
}

/// Rank entries by descending score, ties keeping input order. Entries with
/// score zero never appear; an empty or whitespace query yields no matches.
#[must_use]
pub fn rank_entries(entries: &[FaqEntry], query: &str, limit: Option<usize>) -> Vec<ScoredFaq> {
    let mut scored = entries
        .iter()
        .filter_map(|entry| {
            let score = score_entry(entry, query);
            if score > 0 {
                Some(ScoredFaq { entry: entry.clone(), score })
            } else {
                None
            }
        })
        .collect::<Vec<_>>();

    // Vec::sort_by is stable, so equal scores keep original relative order.
    scored.sort_by(|lhs, rhs| rhs.score.cmp(&lhs.score));
    if let Some(limit) = limit {
        scored.truncate(limit);
    }
    scored
}

/// Boolean variant used by the filter bar: same three fields and fold
/// semantics as the scorer, but no ranking. An empty query matches everything.
#[must_use]
pub fn matches_filter(entry: &FaqEntry, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }

    let query_folded = fold(query);
    fold(&entry.question).contains(&query_folded)
        || fold(&entry.answer).contains(&query_folded)
        || entry.keywords.iter().any(|keyword| fold(keyword).contains(&query_folded))
}

/// Substring filter plus optional exact category match, preserving input order.
#[must_use]
pub fn filter_entries<'a>(
    entries: &'a [FaqEntry],
    query: &str,
    category: Option<&str>,
) -> Vec<&'a FaqEntry> {
    entries
        .iter()
        .filter(|entry| matches_filter(entry, query))
        .filter(|entry| category.map_or(true, |category| entry.category == category))
        .collect()
}

/// Compose the assistant reply for a ranked match list.
#[must_use]
pub fn compose_reply(matches: &[ScoredFaq]) -> String {
    let Some(top) = matches.first() else {
        return REPLY_NOT_FOUND.to_string();
    };

    let mut reply = format!("{REPLY_LEAD_IN}{}\n\n{}", top.entry.question, top.entry.answer);
    if matches.len() > 1 {
        reply.push_str(REPLY_MORE_RELATED);
    }
    reply
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: ChatRole,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
    #[serde(default)]
    pub related: Vec<ScoredFaq>,
}

/// One in-memory chat session: an append-only turn log plus an explicit
/// counter of completed exchanges. Exclusive `&mut` access is the only
/// concurrency control needed; at most one exchange is in flight per session.
#[derive(Debug, Clone)]
pub struct ChatSession {
    turns: Vec<ChatMessage>,
    completed_exchanges: u32,
}

impl ChatSession {
    #[must_use]
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            turns: vec![ChatMessage {
                id: MessageId::new(),
                role: ChatRole::Assistant,
                content: GREETING_TEXT.to_string(),
                sent_at: now,
                related: Vec::new(),
            }],
            completed_exchanges: 0,
        }
    }

    #[must_use]
    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    #[must_use]
    pub fn completed_exchanges(&self) -> u32 {
        self.completed_exchanges
    }

    /// Whether the persistent escalation affordance (contact link) is shown.
    #[must_use]
    pub fn show_escalation(&self) -> bool {
        self.completed_exchanges >= 1
    }

    /// Run one chat exchange: append the user turn, score the active set with
    /// a cap of [`CHAT_RELATED_LIMIT`], and append exactly one assistant turn.
    ///
    /// Whitespace-only input appends nothing, invokes no scoring, and returns
    /// `None`. Otherwise returns the appended assistant turn.
    pub fn submit(
        &mut self,
        input: &str,
        entries: &[FaqEntry],
        now: OffsetDateTime,
    ) -> Option<&ChatMessage> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        self.turns.push(ChatMessage {
            id: MessageId::new(),
            role: ChatRole::User,
            content: input.to_string(),
            sent_at: now,
            related: Vec::new(),
        });

        let related = rank_entries(entries, input, Some(CHAT_RELATED_LIMIT));
        let content = compose_reply(&related);
        self.turns.push(ChatMessage {
            id: MessageId::new(),
            role: ChatRole::Assistant,
            content,
            sent_at: now,
            related,
        });
        self.completed_exchanges += 1;

        self.turns.last()
    }
}
