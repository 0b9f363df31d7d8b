use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::aggregation::{Accumulator, FlushScheduler};
use crate::clock::Clock;
use crate::db::{ActivityCounters, BucketKey};
use crate::input::InputEvent;
use crate::store::BucketStore;

use super::controller::RecorderSettings;
use super::error::{RecorderError, RecorderResult};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Payload pushed to subscribers after every successful, non-empty flush.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushNotification {
    pub flushed_at: DateTime<Utc>,
    pub buckets: BTreeMap<BucketKey, ActivityCounters>,
}

/// What a recorder run did, returned when it stops.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderReport {
    pub events_recorded: u64,
    pub moves_debounced: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub buckets_written: u64,
    /// Sum of every bucket that reached the store.
    pub totals: ActivityCounters,
}

pub(crate) enum RecorderCommand {
    Flush {
        reply: oneshot::Sender<RecorderResult<usize>>,
    },
}

pub(crate) struct LoopContext {
    pub store: Arc<dyn BucketStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: broadcast::Sender<FlushNotification>,
}

struct RecorderState {
    accumulator: Accumulator,
    scheduler: FlushScheduler,
    report: RecorderReport,
}

impl RecorderState {
    fn record(&mut self, event: &InputEvent) {
        log_debug!("recorded {event:?}");
        self.report.events_recorded += 1;
        match *event {
            InputEvent::PointerMove { x, y, at } => {
                if !self.accumulator.record_pointer_move(x, y, at) {
                    self.report.moves_debounced += 1;
                }
            }
            _ => self.accumulator.record(event),
        }
    }

    async fn flush_closed(&mut self, ctx: &LoopContext, now: DateTime<Utc>) -> RecorderResult<usize> {
        let cutoff = self.scheduler.closed_cutoff(now);
        let batch = self.accumulator.drain_closed(cutoff);
        self.write(ctx, now, batch).await
    }

    async fn flush_all(&mut self, ctx: &LoopContext, now: DateTime<Utc>) -> RecorderResult<usize> {
        let batch = self.accumulator.drain();
        self.write(ctx, now, batch).await
    }

    async fn write(
        &mut self,
        ctx: &LoopContext,
        now: DateTime<Utc>,
        batch: BTreeMap<BucketKey, ActivityCounters>,
    ) -> RecorderResult<usize> {
        self.scheduler.mark_flushed(now);
        if batch.is_empty() {
            return Ok(0);
        }

        match ctx.store.upsert_batch(&batch).await {
            Ok(()) => {
                let written = batch.len();
                self.accumulator.mark_persisted(batch.keys().copied());
                self.report.flushes += 1;
                self.report.buckets_written += written as u64;
                for counters in batch.values() {
                    self.report.totals.merge(counters);
                }
                log_debug!(
                    "flushed {written} buckets ({:?}..={:?})",
                    batch.keys().next(),
                    batch.keys().next_back()
                );

                // Nobody listening is fine.
                let _ = ctx.notifier.send(FlushNotification {
                    flushed_at: now,
                    buckets: batch,
                });
                Ok(written)
            }
            Err(err) => {
                let pending = batch.len();
                self.accumulator.restore(batch);
                self.report.failed_flushes += 1;
                log_warn!("flush of {pending} buckets failed, keeping them buffered: {err:#}");
                Err(RecorderError::StoreUnavailable(err))
            }
        }
    }
}

pub(crate) async fn recorder_loop(
    mut events: mpsc::Receiver<InputEvent>,
    mut commands: mpsc::Receiver<RecorderCommand>,
    ctx: LoopContext,
    settings: RecorderSettings,
    cancel_token: CancellationToken,
) -> RecorderResult<RecorderReport> {
    let mut state = RecorderState {
        accumulator: Accumulator::new(settings.debounce),
        scheduler: FlushScheduler::new(
            settings.flush_interval,
            settings.settle_secs,
            ctx.clock.now(),
        ),
        report: RecorderReport::default(),
    };

    let mut ticker = tokio::time::interval(settings.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log_info!(
        "recorder loop started (flush every {}ms, debounce {}ms, timer flush {})",
        settings.flush_interval.num_milliseconds(),
        settings.debounce.num_milliseconds(),
        settings.timer_flush
    );

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("recorder loop shutting down");
                break;
            }
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    log_info!("all input senders dropped, recorder loop finishing");
                    break;
                };
                state.record(&event);

                let now = ctx.clock.now();
                if state.scheduler.is_due(now) {
                    if let Err(err) = state.flush_closed(&ctx, now).await {
                        log_error!("scheduled flush failed: {err}");
                    }
                }
            }
            Some(command) = commands.recv() => match command {
                RecorderCommand::Flush { reply } => {
                    // Everything enqueued before the request counts towards it.
                    while let Ok(event) = events.try_recv() {
                        state.record(&event);
                    }
                    let now = ctx.clock.now();
                    let result = state.flush_closed(&ctx, now).await;
                    if reply.send(result).is_err() {
                        log_debug!("flush requester went away before the reply");
                    }
                }
            },
            _ = ticker.tick(), if settings.timer_flush => {
                let now = ctx.clock.now();
                if state.scheduler.is_due(now) {
                    if let Err(err) = state.flush_closed(&ctx, now).await {
                        log_error!("timer flush failed: {err}");
                    }
                }
            }
        }
    }

    // Refuse new events, then account for everything already queued.
    events.close();
    while let Some(event) = events.recv().await {
        state.record(&event);
    }
    commands.close();

    let mut outcome = state.flush_all(&ctx, ctx.clock.now()).await;
    if let Err(err) = &outcome {
        log_warn!("final flush failed, retrying once: {err}");
        outcome = state.flush_all(&ctx, ctx.clock.now()).await;
    }

    match outcome {
        Ok(written) => {
            log_info!(
                "recorder stopped: {} events, {} buckets written ({} in final flush)",
                state.report.events_recorded,
                state.report.buckets_written,
                written
            );
            Ok(state.report)
        }
        Err(RecorderError::StoreUnavailable(source)) => {
            let unpersisted = state.accumulator.drain();
            log_error!(
                "final flush failed, {} buckets were not persisted: {source:#}",
                unpersisted.len()
            );
            Err(RecorderError::FinalFlushFailed {
                source,
                unpersisted,
                report: Box::new(state.report),
            })
        }
        Err(err) => Err(err),
    }
}
