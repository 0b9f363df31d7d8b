use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};

use crate::recorder::EventSender;

use super::types::RawEvent;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Something that delivers input notifications to the recorder.
///
/// `start` registers the hook; an error there is fatal for the process.
/// After `stop` returns the source sends nothing more.
pub trait EventSource: Send {
    fn name(&self) -> &str;

    fn start(&mut self, sender: EventSender) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

enum LineInput {
    Stdin,
    File(PathBuf),
    Reader(Option<Box<dyn BufRead + Send>>),
}

/// Reads one JSON event per line from stdin, a file or any reader.
pub struct JsonLinesSource {
    name: String,
    input: LineInput,
    is_running: Arc<AtomicBool>,
    malformed: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl JsonLinesSource {
    pub fn stdin() -> Self {
        Self::with_input("stdin".to_string(), LineInput::Stdin)
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::with_input(path.display().to_string(), LineInput::File(path))
    }

    pub fn reader(name: impl Into<String>, reader: impl BufRead + Send + 'static) -> Self {
        Self::with_input(name.into(), LineInput::Reader(Some(Box::new(reader))))
    }

    fn with_input(name: String, input: LineInput) -> Self {
        Self {
            name,
            input,
            is_running: Arc::new(AtomicBool::new(false)),
            malformed: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    /// Lines skipped because they did not describe a valid event.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn open_reader(&mut self) -> Result<Box<dyn BufRead + Send>> {
        match &mut self.input {
            LineInput::Stdin => Ok(Box::new(BufReader::new(io::stdin()))),
            LineInput::File(path) => {
                let file = File::open(&*path)
                    .with_context(|| format!("failed to open input file {}", path.display()))?;
                Ok(Box::new(BufReader::new(file)))
            }
            LineInput::Reader(reader) => reader
                .take()
                .context("reader input can only be started once"),
        }
    }
}

impl EventSource for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, sender: EventSender) -> Result<()> {
        if self.is_running.load(Ordering::SeqCst) {
            bail!("input source {} already running", self.name);
        }

        let reader = self.open_reader()?;
        let is_running = Arc::clone(&self.is_running);
        let malformed = Arc::clone(&self.malformed);
        let name = self.name.clone();
        is_running.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name("activity-input".into())
            .spawn(move || {
                let mut delivered: u64 = 0;
                for line in reader.lines() {
                    if !is_running.load(Ordering::SeqCst) {
                        break;
                    }
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            log_warn!("input {name}: read failed: {err}");
                            break;
                        }
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let event = RawEvent::parse_line(trimmed)
                        .and_then(|raw| raw.into_event(sender.now()));
                    let event = match event {
                        Ok(event) => event,
                        Err(err) => {
                            malformed.fetch_add(1, Ordering::SeqCst);
                            log_warn!("input {name}: ignoring event: {err}");
                            continue;
                        }
                    };

                    if sender.send_blocking(event).is_err() {
                        log_debug!("input {name}: recorder closed, stopping");
                        break;
                    }
                    delivered += 1;
                }

                is_running.store(false, Ordering::SeqCst);
                log_info!("input {name} finished after {delivered} events");
            })
            .context("failed to spawn input thread")?;

        self.thread_handle = Some(handle);
        log_info!("input source {} started", self.name);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // A thread parked in a blocking read cannot be interrupted;
                // the recorder refuses its sends once stopped.
                log_debug!("input {} still blocked on read, detaching", self.name);
            }
        }
        Ok(())
    }
}

impl Drop for JsonLinesSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
