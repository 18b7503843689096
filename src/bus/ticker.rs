use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{
    message_bus::MessageBus,
    messages::{LongTick, Message, ShortTick},
};
use crate::{log_debug, log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Drives the short and long cadence onto the bus from one background task.
///
/// Both cadences share a single loop and each publish is awaited before the
/// next tick is taken, so a long tick never overlaps a short one.
pub struct Ticker {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, bus: Arc<MessageBus>, short: Duration, long: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("ticker already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(bus, short, long, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        log_info!("ticker started (short {:?}, long {:?})", short, long);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle.await.context("ticker task failed to join")
        } else {
            Ok(())
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}

async fn tick_loop(
    bus: Arc<MessageBus>,
    short: Duration,
    long: Duration,
    cancel_token: CancellationToken,
) {
    let mut short_ticker = time::interval_at(Instant::now() + short, short);
    short_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut long_ticker = time::interval_at(Instant::now() + long, long);
    long_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("ticker shutting down");
                break;
            }
            _ = long_ticker.tick() => {
                publish_off_thread(&bus, LongTick { timestamp: Utc::now() }).await;
            }
            _ = short_ticker.tick() => {
                publish_off_thread(&bus, ShortTick { timestamp: Utc::now() }).await;
            }
        }
    }
}

/// Handlers may block on storage, so they run on the blocking pool.
async fn publish_off_thread<M: Message>(bus: &Arc<MessageBus>, message: M) {
    let bus = Arc::clone(bus);
    match tokio::task::spawn_blocking(move || bus.publish(&message)).await {
        Ok(report) if report.faults.is_empty() => {
            log_debug!("{} delivered to {} handlers", M::NAME, report.delivered);
        }
        Ok(report) => {
            log_warn!(
                "{} delivered to {} handlers, {} faulted",
                M::NAME,
                report.delivered,
                report.faults.len()
            );
        }
        Err(err) => log_error!("{} publish task failed: {err}", M::NAME),
    }
}
