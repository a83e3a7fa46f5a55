//! Entry point into daily job-graph construction.
//!
//! Building the graph (cron expansion, dependency resolution) happens outside
//! this crate. The coordinator only toggles the builder with leadership and
//! asks it to make sure today's graph exists.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tokio::sync::RwLock;

use crate::error::Result;

/// Formats a calendar day as the key the graph builder is indexed by.
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Today's key in the local timezone.
pub fn today_key() -> String {
    day_key(Local::now().date_naive())
}

#[async_trait]
pub trait JobGraphTrigger: Send + Sync {
    /// Builds the graph for `day` unless it already exists.
    async fn ensure_built(&self, day: &str) -> Result<()>;

    /// Enables or disables leader-only graph building.
    async fn set_active(&self, active: bool);
}

#[derive(Debug, Default)]
pub struct InMemoryGraphTrigger {
    active: AtomicBool,
    calls: AtomicUsize,
    built: RwLock<BTreeSet<String>>,
}

impl InMemoryGraphTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of `ensure_built` calls, including ones that found the day built.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn built_days(&self) -> Vec<String> {
        self.built.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl JobGraphTrigger for InMemoryGraphTrigger {
    async fn ensure_built(&self, day: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.built.write().await.insert(day.to_string()) {
            tracing::info!(day, "Job graph built");
        }
        Ok(())
    }

    async fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}
