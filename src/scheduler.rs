//! Trigger handling around the aggregator: wall-clock push times, the
//! periodic cache warm, and manual refresh requests all funnel through one
//! `Idle -> Running -> Idle` flag, so at most one aggregation is ever in
//! flight and simultaneous triggers collapse into a single run.
//!
//! Missed triggers are not replayed; a process that was down simply waits
//! for the next scheduled instant. In-flight runs are never cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use metrics::counter;
use tokio::task::JoinHandle;

use crate::aggregator::Aggregator;
use crate::cache::DigestCache;
use crate::config::logical_day_key;
use crate::model::Digest;
use crate::push::DispatchMux;

/// What became of one trigger.
#[derive(Debug)]
pub enum RunOutcome {
    /// This trigger ran the aggregation and sealed a digest.
    Completed(Arc<Digest>),
    /// Another run was already in flight; this trigger was a no-op.
    Coalesced,
    /// The run executed but every source failed.
    Failed,
}

pub struct Scheduler {
    aggregator: Arc<Aggregator>,
    tz: Tz,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(aggregator: Arc<Aggregator>, tz: Tz) -> Self {
        Self {
            aggregator,
            tz,
            running: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<DigestCache> {
        self.aggregator.cache()
    }

    /// Logical key for runs triggered now: the calendar day in the
    /// configured timezone.
    pub fn current_key(&self) -> String {
        logical_day_key(self.tz, Utc::now())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idle -> Running, or refusal when a run is already in flight.
    fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run an aggregation now unless one is already in flight.
    pub async fn run_now(&self) -> RunOutcome {
        if !self.try_begin() {
            counter!("scheduler_coalesced_total").increment(1);
            tracing::debug!("trigger coalesced into the in-flight run");
            return RunOutcome::Coalesced;
        }
        let outcome = self.run_exclusive().await;
        self.finish();
        outcome
    }

    async fn run_exclusive(&self) -> RunOutcome {
        let key = self.current_key();
        match self.aggregator.run(&key).await {
            Ok(digest) => RunOutcome::Completed(digest),
            Err(e) => {
                tracing::warn!(key, error = %e, "aggregation run failed");
                RunOutcome::Failed
            }
        }
    }

    /// Fire-and-forget refresh for the HTTP layer. Claims the run state
    /// before spawning, so the reply ("started" vs "coalesced") is accurate.
    pub fn spawn_refresh(self: &Arc<Self>) -> bool {
        if !self.try_begin() {
            counter!("scheduler_coalesced_total").increment(1);
            return false;
        }
        let sched = Arc::clone(self);
        tokio::spawn(async move {
            let _ = sched.run_exclusive().await;
            sched.finish();
        });
        true
    }

    /// Periodic cache warm. Only refreshes; never pushes. Ticks that land
    /// while a run is in flight coalesce, and ticks missed under load are
    /// skipped rather than replayed.
    pub fn spawn_refresh_loop(self: Arc<Self>, every: Duration, warm_on_start: bool) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            if !warm_on_start {
                // swallow the interval's immediate first tick
                ticker.tick().await;
            }
            loop {
                ticker.tick().await;
                let _ = self.run_now().await;
                let purged = self.cache().purge_expired(Utc::now());
                if purged > 0 {
                    tracing::debug!(purged, "dropped dead cache entries");
                }
            }
        })
    }

    /// Wall-clock push triggers. Each configured time of day runs an
    /// aggregation and hands the digest to the dispatch mux; delivery and
    /// retries are the mux's business.
    pub fn spawn_push_loop(self: Arc<Self>, times: Vec<NaiveTime>, mux: Arc<DispatchMux>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if times.is_empty() {
                return;
            }
            loop {
                let now = Utc::now().with_timezone(&self.tz);
                let next = next_trigger_after(now, &times);
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::debug!(at = %next, "next push trigger");
                tokio::time::sleep(wait).await;

                let digest = match self.run_now().await {
                    RunOutcome::Completed(d) => Some(d),
                    // coalesced or failed: push whatever the cache still
                    // serves rather than going silent
                    RunOutcome::Coalesced | RunOutcome::Failed => self
                        .cache()
                        .get(&self.current_key())
                        .entry()
                        .map(|e| Arc::clone(&e.digest)),
                };

                match digest {
                    Some(d) => {
                        counter!("push_triggers_total").increment(1);
                        mux.dispatch(&d).await;
                    }
                    None => tracing::warn!("push trigger fired with no digest to deliver"),
                }
            }
        })
    }
}

/// Earliest configured time-of-day strictly after `now`, today or on a
/// following day. Times that a DST gap swallows are skipped.
fn next_trigger_after(now: DateTime<Tz>, times: &[NaiveTime]) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut sorted: Vec<NaiveTime> = times.to_vec();
    sorted.sort();

    for day_offset in 0..=2u64 {
        let date = now.date_naive() + chrono::Days::new(day_offset);
        for &t in &sorted {
            if let Some(cand) = date.and_time(t).and_local_timezone(tz).earliest() {
                if cand > now {
                    return cand;
                }
            }
        }
    }
    now + chrono::Duration::days(1)
}
