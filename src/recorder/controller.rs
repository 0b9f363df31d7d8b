use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregation::{accumulator::DEFAULT_DEBOUNCE_MS, scheduler};
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::input::{InputEvent, MouseButton};
use crate::store::BucketStore;

use super::error::{RecorderError, RecorderResult};
use super::loop_worker::{
    recorder_loop, FlushNotification, LoopContext, RecorderCommand, RecorderReport,
};

const NOTIFICATION_CAPACITY: usize = 64;
const COMMAND_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub flush_interval: Duration,
    pub debounce: Duration,
    /// Seconds a bucket stays open after it ends before it may be flushed.
    pub settle_secs: i64,
    pub channel_capacity: usize,
    /// Also check the flush schedule on a timer, not only when events arrive.
    pub timer_flush: bool,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::milliseconds(scheduler::DEFAULT_FLUSH_INTERVAL_MS),
            debounce: Duration::milliseconds(DEFAULT_DEBOUNCE_MS),
            settle_secs: scheduler::DEFAULT_SETTLE_SECS,
            channel_capacity: 4_096,
            timer_flush: true,
        }
    }
}

impl RecorderSettings {
    pub(crate) fn tick_interval(&self) -> std::time::Duration {
        self.flush_interval
            .to_std()
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or(std::time::Duration::from_secs(1))
    }
}

impl From<&TrackerConfig> for RecorderSettings {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            flush_interval: millis_or(
                config.flush_interval_ms,
                scheduler::DEFAULT_FLUSH_INTERVAL_MS,
            ),
            debounce: millis_or(config.debounce_ms, DEFAULT_DEBOUNCE_MS),
            settle_secs: config.settle_secs.max(0),
            channel_capacity: config.channel_capacity.max(1),
            timer_flush: config.timer_flush,
        }
    }
}

fn millis_or(value: u64, default_ms: i64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or_else(|| {
            warn!("{value}ms is out of range, using {default_ms}ms");
            Duration::milliseconds(default_ms)
        })
}

/// Producer handle. Input callbacks stamp and enqueue events through it.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<InputEvent>,
    clock: Arc<dyn Clock>,
}

impl EventSender {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn send(&self, event: InputEvent) -> RecorderResult<()> {
        self.tx.send(event).await.map_err(|_| RecorderError::Closed)
    }

    /// For hook threads outside the async runtime. Blocks only while the
    /// queue is full; must not be called from a runtime worker thread.
    pub fn send_blocking(&self, event: InputEvent) -> RecorderResult<()> {
        self.tx.blocking_send(event).map_err(|_| RecorderError::Closed)
    }

    pub fn pointer_move(&self, x: f64, y: f64) -> RecorderResult<()> {
        let at = self.clock.now();
        self.send_blocking(InputEvent::PointerMove { x, y, at })
    }

    pub fn button(&self, button: MouseButton, pressed: bool) -> RecorderResult<()> {
        let at = self.clock.now();
        self.send_blocking(InputEvent::PointerButton {
            button,
            pressed,
            at,
        })
    }

    pub fn key_press(&self) -> RecorderResult<()> {
        let at = self.clock.now();
        self.send_blocking(InputEvent::KeyPress { at })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owns the recorder task: the single consumer of input events, the only
/// writer of the accumulator and the only caller of the store.
pub struct Recorder {
    handle: Option<JoinHandle<RecorderResult<RecorderReport>>>,
    outcome: Option<RecorderResult<RecorderReport>>,
    cancel_token: CancellationToken,
    commands: mpsc::Sender<RecorderCommand>,
    notifier: broadcast::Sender<FlushNotification>,
}

impl Recorder {
    /// Spawns the recorder task on the current tokio runtime.
    pub fn start(
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
        settings: RecorderSettings,
    ) -> (Self, EventSender) {
        let (event_tx, event_rx) = mpsc::channel(settings.channel_capacity.max(1));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let cancel_token = CancellationToken::new();

        let ctx = LoopContext {
            store,
            clock: Arc::clone(&clock),
            notifier: notifier.clone(),
        };
        let handle = tokio::spawn(recorder_loop(
            event_rx,
            command_rx,
            ctx,
            settings,
            cancel_token.clone(),
        ));

        info!("Recorder started");

        let recorder = Self {
            handle: Some(handle),
            outcome: None,
            cancel_token,
            commands: command_tx,
            notifier,
        };
        let sender = EventSender {
            tx: event_tx,
            clock,
        };
        (recorder, sender)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlushNotification> {
        self.notifier.subscribe()
    }

    /// Flushes every closed bucket now and returns how many were written.
    pub async fn flush(&self) -> RecorderResult<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(RecorderCommand::Flush { reply: reply_tx })
            .await
            .map_err(|_| RecorderError::Closed)?;
        reply_rx.await.map_err(|_| RecorderError::Closed)?
    }

    /// Resolves once the task has ended, e.g. because every sender was dropped.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(RecorderError::TaskFailed(join_err.to_string())),
            };
            self.handle = None;
            self.outcome = Some(outcome);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Stops accepting events, records what is already queued, performs the
    /// final flush and returns the run report.
    pub async fn stop(mut self) -> RecorderResult<RecorderReport> {
        self.cancel_token.cancel();
        self.wait().await;
        match self.outcome.take() {
            Some(outcome) => {
                if let Err(err) = &outcome {
                    warn!("Recorder stopped with error: {err}");
                }
                outcome
            }
            None => Err(RecorderError::TaskFailed(
                "recorder task outcome missing".to_string(),
            )),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
