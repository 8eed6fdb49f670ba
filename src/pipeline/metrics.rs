//! Per-stage processing and usage counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Provider usage a stage reports while handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// Tokens streamed back by the language model.
    LlmTokens(u64),
    /// Characters sent to speech synthesis.
    TtsCharacters(u64),
}

/// Counters for one stage. Updated only by that stage's loop.
#[derive(Debug, Default)]
pub struct StageMetrics {
    processed: AtomicU64,
    faults: AtomicU64,
    busy_micros: AtomicU64,
    llm_tokens: AtomicU64,
    tts_characters: AtomicU64,
}

impl StageMetrics {
    /// Record one `process` call and how long it took.
    pub fn record(&self, elapsed: Duration, faulted: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if faulted {
            self.faults.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.busy_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_usage(&self, usage: Usage) {
        match usage {
            Usage::LlmTokens(n) => self.llm_tokens.fetch_add(n, Ordering::Relaxed),
            Usage::TtsCharacters(n) => self.tts_characters.fetch_add(n, Ordering::Relaxed),
        };
    }
}

/// Point-in-time copy of one stage's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    pub processed: u64,
    pub faults: u64,
    pub busy: Duration,
    pub llm_tokens: u64,
    pub tts_characters: u64,
}

/// Registry of stage counters for one session.
///
/// Processing counters (calls, faults, time) and usage counters are
/// switched on separately. With both off, registration hands out nothing.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    enabled: bool,
    usage: bool,
    stages: Arc<RwLock<Vec<(String, Arc<StageMetrics>)>>>,
}

impl PipelineMetrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            usage: false,
            stages: Arc::default(),
        }
    }

    /// Also count provider usage reported through [`Usage`].
    pub fn with_usage(mut self, enabled: bool) -> Self {
        self.usage = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn usage_enabled(&self) -> bool {
        self.usage
    }

    pub(crate) fn register(&self, stage: &str) -> Option<Arc<StageMetrics>> {
        if !self.enabled && !self.usage {
            return None;
        }
        let metrics = Arc::new(StageMetrics::default());
        self.stages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((stage.to_owned(), Arc::clone(&metrics)));
        Some(metrics)
    }

    /// Current counters, in pipeline order.
    pub fn snapshot(&self) -> Vec<StageReport> {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(stage, m)| StageReport {
                stage: stage.clone(),
                processed: m.processed.load(Ordering::Relaxed),
                faults: m.faults.load(Ordering::Relaxed),
                busy: Duration::from_micros(m.busy_micros.load(Ordering::Relaxed)),
                llm_tokens: m.llm_tokens.load(Ordering::Relaxed),
                tts_characters: m.tts_characters.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Usage totals across every stage: `(llm_tokens, tts_characters)`.
    pub fn usage_totals(&self) -> (u64, u64) {
        self.snapshot()
            .iter()
            .fold((0, 0), |(tokens, chars), r| {
                (tokens + r.llm_tokens, chars + r.tts_characters)
            })
    }
}
