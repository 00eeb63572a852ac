// Timeline trend research: fetch recent posts, extract trending terms,
// persist a snapshot for the posting strategy and the stats surface.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use magpie_common::{MagpieError, Result, Trend, TrendKind};

use crate::rate::RateLimiter;
use crate::retry::RetryPolicy;
use crate::store::StateStore;
use crate::traits::SocialPlatformClient;

/// Rate-limit key for timeline reads.
pub const TIMELINE_ENDPOINT: &str = "timeline";

const TRENDS_KEY: &str = "trends:latest";

const TIMELINE_SAMPLE: u32 = 100;
const TOP_HASHTAGS: usize = 5;
const TOP_TOPICS: usize = 5;
const TOP_KEYWORDS: usize = 5;

/// Words too common to signal anything.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "you", "your", "have", "has", "was", "are",
    "but", "not", "all", "its", "out", "they", "them", "what", "when", "how", "who", "just",
    "like", "about", "from", "will", "can", "into", "over", "than", "then", "there",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub trends: Vec<Trend>,
    pub updated_at: DateTime<Utc>,
}

/// Typed repository for the latest trend snapshot, over the shared store.
#[derive(Clone)]
pub struct TrendRepo {
    store: Arc<dyn StateStore>,
}

impl TrendRepo {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn latest(&self) -> Result<Option<TrendSnapshot>> {
        match self.store.get(TRENDS_KEY).await? {
            Some(raw) => {
                let snapshot = serde_json::from_str(&raw)
                    .map_err(|e| MagpieError::Store(format!("corrupt trend snapshot: {e}")))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    pub async fn save(&self, snapshot: &TrendSnapshot) -> Result<()> {
        let raw =
            serde_json::to_string(snapshot).map_err(|e| MagpieError::Store(e.to_string()))?;
        self.store.put(TRENDS_KEY, &raw, None).await
    }
}

/// Researches current trends from the timeline on a schedule.
pub struct TrendResearcher {
    platform: Arc<dyn SocialPlatformClient>,
    repo: TrendRepo,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl TrendResearcher {
    pub fn new(
        platform: Arc<dyn SocialPlatformClient>,
        repo: TrendRepo,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            platform,
            repo,
            limiter,
            retry,
        }
    }

    pub async fn research(&self) -> Result<TrendSnapshot> {
        let posts = self
            .retry
            .run("list_timeline", || async {
                self.limiter.acquire(TIMELINE_ENDPOINT).await;
                self.platform.list_timeline(TIMELINE_SAMPLE).await
            })
            .await?;

        let texts: Vec<String> = posts.into_iter().map(|p| p.text).collect();
        let snapshot = TrendSnapshot {
            trends: analyze_content(&texts),
            updated_at: Utc::now(),
        };
        self.repo.save(&snapshot).await?;
        info!(
            sampled = texts.len(),
            trends = snapshot.trends.len(),
            "Trend research complete"
        );
        Ok(snapshot)
    }
}

/// Extract trending terms from post texts: top hashtags, capitalized topic
/// phrases, and plain keywords by frequency.
pub fn analyze_content(texts: &[String]) -> Vec<Trend> {
    let hashtag_re = Regex::new(r"#(\w+)").expect("hashtag regex");
    let topic_re = Regex::new(r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)").expect("topic regex");
    let word_re = Regex::new(r"\b[a-z]{4,}\b").expect("word regex");

    let mut hashtags: HashMap<String, u32> = HashMap::new();
    let mut topics: HashMap<String, u32> = HashMap::new();
    let mut words: HashMap<String, u32> = HashMap::new();

    for text in texts {
        for cap in hashtag_re.captures_iter(text) {
            *hashtags.entry(cap[1].to_lowercase()).or_default() += 1;
        }
        for cap in topic_re.captures_iter(text) {
            *topics.entry(cap[1].to_string()).or_default() += 1;
        }
        for m in word_re.find_iter(&text.to_lowercase()) {
            let word = m.as_str();
            if STOPWORDS.contains(&word) {
                continue;
            }
            *words.entry(word.to_string()).or_default() += 1;
        }
    }

    let mut trends = Vec::new();
    for (tag, count) in top_n(hashtags, TOP_HASHTAGS) {
        trends.push(Trend {
            topic: format!("#{tag}"),
            count,
            kind: TrendKind::Hashtag,
        });
    }
    for (topic, count) in top_n(topics, TOP_TOPICS) {
        trends.push(Trend {
            topic,
            count,
            kind: TrendKind::Topic,
        });
    }
    for (word, count) in top_n(words, TOP_KEYWORDS) {
        trends.push(Trend {
            topic: word,
            count,
            kind: TrendKind::Keyword,
        });
    }
    trends
}

fn top_n(counts: HashMap<String, u32>, n: usize) -> Vec<(String, u32)> {
    let mut entries: Vec<(String, u32)> = counts.into_iter().collect();
    // Count descending, then alphabetical for a stable order.
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}
