//! # Background monitors
//!
//! Two periodic loops. The SLA monitor only refreshes the derived breach
//! flag; the claim reaper is the one that reverts timed-out claims.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::info;
use tokio::task::JoinHandle;

use crate::engine::TriageEngine;

fn sweep_period(engine: &TriageEngine) -> Duration {
    Duration::from_secs(engine.config().monitor.sweep_interval_secs.max(1))
}

pub fn spawn_sla_monitor(engine: Arc<TriageEngine>) -> JoinHandle<()> {
    let period = sweep_period(&engine);
    info!("starting SLA monitor (interval: {:?})", period);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            engine.sweep_breaches(Utc::now()).await;
        }
    })
}

pub fn spawn_claim_reaper(engine: Arc<TriageEngine>) -> JoinHandle<()> {
    let period = sweep_period(&engine);
    info!(
        "starting claim reaper (timeout: {} min)",
        engine.config().monitor.claim_timeout_minutes
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            engine.release_stale_claims(Utc::now()).await;
        }
    })
}
