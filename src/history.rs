use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::metrics::{self, AiResponse};
use crate::store;

/// One completed correction. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: Uuid,
    pub original_text: String,
    pub corrected_text: String,
    /// Unix epoch millis.
    pub timestamp_ms: u64,
    /// Seconds spent in `send_prompt`, retries included.
    pub duration: f64,
    pub provider: String,
    pub model: String,
    pub time_to_first_token: Option<f64>,
    pub token_count: Option<u64>,
    pub tokens_per_second: Option<f64>,
    pub retry_count: Option<u32>,
    pub prompt_title: Option<String>,
}

impl HistoryItem {
    pub fn from_response(
        original_text: String,
        response: &AiResponse,
        duration: Duration,
        provider: &str,
        model: &str,
        prompt_title: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_text,
            corrected_text: response.text.clone(),
            timestamp_ms: now_ms(),
            duration: duration.as_secs_f64(),
            provider: provider.to_string(),
            model: model.to_string(),
            time_to_first_token: Some(response.time_to_first_token.as_secs_f64()),
            token_count: Some(response.token_count),
            tokens_per_second: Some(metrics::tokens_per_second(response.token_count, duration)),
            retry_count: Some(response.retry_count),
            prompt_title,
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Ordered correction history, newest first.
pub struct HistoryStore {
    path: Option<PathBuf>,
    items: Mutex<Vec<HistoryItem>>,
}

impl HistoryStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            items: Mutex::new(Vec::new()),
        }
    }

    pub async fn open(path: PathBuf) -> Self {
        let items = store::load_list(&path).await;
        tracing::debug!(path = %path.display(), count = items.len(), "history loaded");
        Self {
            path: Some(path),
            items: Mutex::new(items),
        }
    }

    /// Insert at the head.
    pub async fn add(&self, item: HistoryItem) {
        let mut items = self.items.lock().await;
        items.insert(0, item);
        self.persist(&items).await;
    }

    pub async fn delete(&self, id: Uuid) -> bool {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|i| i.id != id);
        let removed = items.len() != before;
        if removed {
            self.persist(&items).await;
        }
        removed
    }

    pub async fn clear(&self) {
        let mut items = self.items.lock().await;
        items.clear();
        self.persist(&items).await;
    }

    pub async fn items(&self) -> Vec<HistoryItem> {
        self.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    async fn persist(&self, items: &[HistoryItem]) {
        if let Some(ref path) = self.path
            && let Err(e) = store::save_list(path, items).await
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to save history");
        }
    }
}

/// Window for usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    Hour,
    Day,
    Week,
    Month,
    All,
}

impl TimeRange {
    pub fn span(&self) -> Option<Duration> {
        const HOUR: u64 = 60 * 60;
        const DAY: u64 = 24 * HOUR;
        match self {
            Self::Hour => Some(Duration::from_secs(HOUR)),
            Self::Day => Some(Duration::from_secs(DAY)),
            Self::Week => Some(Duration::from_secs(7 * DAY)),
            Self::Month => Some(Duration::from_secs(30 * DAY)),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub total_corrections: usize,
    pub avg_response_time: f64,
    /// Mean over items that recorded a rate.
    pub avg_tokens_per_second: f64,
    pub total_output_tokens: u64,
    /// (provider, count), most used first.
    pub provider_usage: Vec<(String, usize)>,
    /// (model, count), most used first.
    pub model_usage: Vec<(String, usize)>,
}

impl UsageStats {
    pub fn compute(items: &[HistoryItem], range: TimeRange, now_ms: u64) -> Self {
        let cutoff_ms = range
            .span()
            .map(|span| now_ms.saturating_sub(span.as_millis() as u64));
        let filtered: Vec<&HistoryItem> = items
            .iter()
            .filter(|i| cutoff_ms.is_none_or(|c| i.timestamp_ms >= c))
            .collect();

        if filtered.is_empty() {
            return Self::default();
        }

        let total = filtered.len();
        let avg_response_time = filtered.iter().map(|i| i.duration).sum::<f64>() / total as f64;

        let rates: Vec<f64> = filtered.iter().filter_map(|i| i.tokens_per_second).collect();
        let avg_tokens_per_second = if rates.is_empty() {
            0.0
        } else {
            rates.iter().sum::<f64>() / rates.len() as f64
        };

        Self {
            total_corrections: total,
            avg_response_time,
            avg_tokens_per_second,
            total_output_tokens: filtered.iter().filter_map(|i| i.token_count).sum(),
            provider_usage: count_by(&filtered, |i| &i.provider),
            model_usage: count_by(&filtered, |i| &i.model),
        }
    }
}

fn count_by<'a>(
    items: &[&'a HistoryItem],
    key: impl Fn(&'a HistoryItem) -> &'a String,
) -> Vec<(String, usize)> {
    let mut counts: HashMap<&String, usize> = HashMap::new();
    for item in items {
        *counts.entry(key(*item)).or_default() += 1;
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().map(|(k, v)| (k.clone(), v)).collect();
    // Ties broken by name for stable output.
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}
