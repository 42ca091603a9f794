//! crates/revision_core/src/progress.rs
//!
//! Read-time progress summaries. A summary is always a fold over the ledger;
//! the per-user cache only remembers how far the fold has got.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    ContentType, DailyPerformance, GradedItem, LedgerEntry, LedgerEvent, ProgressSummary,
    SubjectAnalytics, TopicProgress, TypeBreakdown,
};
use crate::error::EngineResult;
use crate::ledger::ProgressLedger;

/// Topics whose lowest average falls below this are reported as weak.
pub const WEAK_TOPIC_THRESHOLD: f64 = 50.0;
pub const MAX_WEAK_TOPICS: usize = 5;
/// Recently graded items reported per content type.
pub const RECENT_ITEMS_PER_TYPE: usize = 10;
const MAX_CACHED_USERS: usize = 10_000;

/// The folded state of one user's ledger up to `last_seq`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerFold {
    pub last_seq: i64,
    pub topics: BTreeMap<(String, String), TypeBreakdown>,
    /// Graded work keyed by subject and the UTC day it was recorded.
    pub daily: BTreeMap<(String, NaiveDate), TypeBreakdown>,
    pub graded: BTreeMap<Uuid, GradedItem>,
}

impl LedgerFold {
    pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut fold = Self::default();
        for entry in entries {
            fold.apply(entry);
        }
        fold
    }

    /// Folds one entry in. Entries at or below `last_seq` were already counted.
    pub fn apply(&mut self, entry: &LedgerEntry) {
        if entry.seq <= self.last_seq {
            return;
        }
        self.last_seq = entry.seq;

        let stats = self
            .topics
            .entry((entry.subject.clone(), entry.topic.clone()))
            .or_default()
            .entry(entry.content_type)
            .or_default();
        match entry.event {
            LedgerEvent::Generated => stats.generated += 1,
            LedgerEvent::Graded => {
                stats.graded_items.insert(entry.item_id);
                stats.marks_earned += entry.marks_earned as u64;
                stats.marks_possible += entry.marks_possible as u64;

                let day = self
                    .daily
                    .entry((entry.subject.clone(), entry.recorded_at.date_naive()))
                    .or_default()
                    .entry(entry.content_type)
                    .or_default();
                day.graded_items.insert(entry.item_id);
                day.marks_earned += entry.marks_earned as u64;
                day.marks_possible += entry.marks_possible as u64;

                let item = self.graded.entry(entry.item_id).or_insert_with(|| GradedItem {
                    item_id: entry.item_id,
                    subject: entry.subject.clone(),
                    topic: entry.topic.clone(),
                    content_type: entry.content_type,
                    marks_earned: 0,
                    marks_possible: 0,
                    submitted_at: entry.recorded_at,
                });
                item.marks_earned += entry.marks_earned as u64;
                item.marks_possible += entry.marks_possible as u64;
            }
        }
    }

    /// Days in `from..=to` with graded work for `subject`, oldest first.
    pub fn history(&self, subject: &str, from: NaiveDate, to: NaiveDate) -> Vec<DailyPerformance> {
        if from > to {
            return Vec::new();
        }
        self.daily
            .range((subject.to_string(), from)..=(subject.to_string(), to))
            .map(|((_, date), by_type)| DailyPerformance {
                date: *date,
                by_type: by_type.clone(),
            })
            .collect()
    }

    /// Graded items, newest submission first, at most `per_type` of each content type.
    pub fn recent(&self, subject: Option<&str>, per_type: usize) -> Vec<GradedItem> {
        let mut items: Vec<&GradedItem> = self
            .graded
            .values()
            .filter(|item| subject.map_or(true, |wanted| wanted == item.subject))
            .collect();
        items.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(a.item_id.cmp(&b.item_id)));

        let mut taken: BTreeMap<ContentType, usize> = BTreeMap::new();
        items
            .into_iter()
            .filter(|item| {
                let count = taken.entry(item.content_type).or_default();
                *count += 1;
                *count <= per_type
            })
            .cloned()
            .collect()
    }

    pub fn summarize(&self, user_id: Uuid, subject: Option<&str>, topic: Option<&str>) -> ProgressSummary {
        let mut totals = TypeBreakdown::new();
        let mut topics = Vec::new();

        for ((s, t), by_type) in &self.topics {
            if subject.is_some_and(|wanted| wanted != s) || topic.is_some_and(|wanted| wanted != t) {
                continue;
            }
            for (content_type, stats) in by_type {
                totals.entry(*content_type).or_default().merge(stats);
            }
            topics.push(TopicProgress {
                subject: s.clone(),
                topic: t.clone(),
                by_type: by_type.clone(),
            });
        }

        let mut weak: Vec<(f64, &TopicProgress)> = topics
            .iter()
            .filter_map(|t| t.lowest_average().map(|avg| (avg, t)))
            .filter(|(avg, _)| *avg < WEAK_TOPIC_THRESHOLD)
            .collect();
        weak.sort_by(|a, b| a.0.total_cmp(&b.0));
        let weak_topics = weak.into_iter().take(MAX_WEAK_TOPICS).map(|(_, t)| t.clone()).collect();

        ProgressSummary {
            user_id,
            subject: subject.map(str::to_string),
            topic: topic.map(str::to_string),
            totals,
            topics,
            weak_topics,
        }
    }
}

pub struct ProgressAggregator {
    ledger: Arc<ProgressLedger>,
    cache: Mutex<HashMap<Uuid, LedgerFold>>,
}

impl ProgressAggregator {
    pub fn new(ledger: Arc<ProgressLedger>) -> Self {
        Self {
            ledger,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Brings the cached fold up to date with any entries written since.
    async fn current_fold(&self, user_id: Uuid) -> EngineResult<LedgerFold> {
        let mut fold = self.cache.lock().await.get(&user_id).cloned().unwrap_or_default();
        let fresh = self.ledger.entries_after(user_id, fold.last_seq).await?;
        if fresh.is_empty() {
            return Ok(fold);
        }

        for entry in &fresh {
            fold.apply(entry);
        }
        debug!(%user_id, folded = fresh.len(), last_seq = fold.last_seq, "Progress fold advanced");

        let mut cache = self.cache.lock().await;
        if cache.len() >= MAX_CACHED_USERS && !cache.contains_key(&user_id) {
            cache.clear();
        }
        let newer = cache.get(&user_id).map_or(true, |cached| cached.last_seq < fold.last_seq);
        if newer {
            cache.insert(user_id, fold.clone());
        }
        Ok(fold)
    }

    /// Summary for a user, optionally narrowed to one subject and/or topic.
    pub async fn summarize(
        &self,
        user_id: Uuid,
        subject: Option<&str>,
        topic: Option<&str>,
    ) -> EngineResult<ProgressSummary> {
        Ok(self.current_fold(user_id).await?.summarize(user_id, subject, topic))
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        subject: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<DailyPerformance>> {
        Ok(self.current_fold(user_id).await?.history(subject, from, to))
    }

    pub async fn analytics(&self, user_id: Uuid, subject: &str) -> EngineResult<SubjectAnalytics> {
        let fold = self.current_fold(user_id).await?;
        Ok(SubjectAnalytics {
            summary: fold.summarize(user_id, Some(subject), None),
            recent: fold.recent(Some(subject), RECENT_ITEMS_PER_TYPE),
        })
    }

    /// Drops the cached fold so the next read replays the whole ledger.
    pub async fn invalidate(&self, user_id: Uuid) {
        self.cache.lock().await.remove(&user_id);
    }
}
