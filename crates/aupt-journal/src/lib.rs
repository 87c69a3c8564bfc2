//! Append-only JSONL journal of suite events.
//!
//! Events are handed to a background writer thread through a bounded queue so
//! that recording never blocks the test orchestrator. When the queue is full
//! the event is dropped and counted.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

pub const JOURNAL_FILE_NAME: &str = "events.jsonl";

const EVENT_QUEUE_CAPACITY: usize = 256;
const MAX_JOURNAL_BYTES: u64 = 8 * 1024 * 1024;

/// Worker threads whose panics are test outcomes rather than harness crashes.
pub const TEST_THREAD_PREFIX: &str = "aupt-test-";

pub struct Journal {
    run_id: String,
    path: PathBuf,
    dropped: AtomicU64,
    sender: Mutex<Option<SyncSender<JournalEvent>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Serialize)]
struct JournalEvent {
    event_type: String,
    at_unix_millis: i64,
    run_id: String,
    properties: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct CrashReport {
    at_unix_millis: i64,
    run_id: String,
    thread: Option<String>,
    message: String,
    location: Option<String>,
    backtrace: Option<String>,
}

static CRASH_JOURNAL: OnceLock<Arc<Journal>> = OnceLock::new();

impl Journal {
    /// Opens (or appends to) `events.jsonl` inside `dir`.
    pub fn open(dir: &Path, run_id: &str) -> io::Result<Arc<Self>> {
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE_NAME);
        let (sender, receiver) = sync_channel(EVENT_QUEUE_CAPACITY);
        let writer = start_writer_thread(path.clone(), receiver)?;
        Ok(Arc::new(Self {
            run_id: run_id.to_string(),
            path,
            dropped: AtomicU64::new(0),
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn record(&self, event_type: &str, properties: &[(&str, &str)]) {
        let mut map = BTreeMap::new();
        for (key, value) in properties {
            if !key.trim().is_empty() {
                map.insert((*key).to_string(), (*value).to_string());
            }
        }
        let event = JournalEvent {
            event_type: event_type.to_string(),
            at_unix_millis: now_millis(),
            run_id: self.run_id.clone(),
            properties: map,
        };
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(sender) = guard.as_ref() else {
            return;
        };
        if sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stops accepting events and waits for the writer to drain the queue.
    /// Calling it more than once is harmless.
    pub fn close(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
        let writer = match self.writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = writer {
            let _ = handle.join();
        }
    }

    /// Routes panics raised outside test worker threads into
    /// `crash-<millis>-<pid>.json` files next to the journal. Only the first
    /// journal to call this is used for the lifetime of the process.
    pub fn install_crash_hook(self: &Arc<Self>) {
        if CRASH_JOURNAL.set(Arc::clone(self)).is_err() {
            return;
        }
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current().name().map(str::to_string);
            let is_test_thread = thread
                .as_deref()
                .map(|name| name.starts_with(TEST_THREAD_PREFIX))
                .unwrap_or(false);
            if !is_test_thread {
                if let Some(journal) = CRASH_JOURNAL.get() {
                    let message = if let Some(msg) = info.payload().downcast_ref::<&str>() {
                        (*msg).to_string()
                    } else if let Some(msg) = info.payload().downcast_ref::<String>() {
                        msg.clone()
                    } else {
                        "panic".to_string()
                    };
                    let location = info
                        .location()
                        .map(|loc| format!("{}:{}", loc.file(), loc.line()));
                    let backtrace = Some(format!("{:?}", std::backtrace::Backtrace::capture()));
                    journal.crash_report(thread, message, location, backtrace);
                }
            }
            default_hook(info);
        }));
    }

    fn crash_report(
        &self,
        thread: Option<String>,
        message: String,
        location: Option<String>,
        backtrace: Option<String>,
    ) {
        let report = CrashReport {
            at_unix_millis: now_millis(),
            run_id: self.run_id.clone(),
            thread,
            message,
            location,
            backtrace,
        };
        let Some(dir) = self.path.parent() else {
            return;
        };
        let filename = format!(
            "crash-{}-{}.json",
            report.at_unix_millis,
            std::process::id()
        );
        if let Ok(file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(filename))
        {
            let _ = serde_json::to_writer_pretty(file, &report);
        }
        self.record("crash", &[("message", report.message.as_str())]);
    }
}

fn start_writer_thread(
    path: PathBuf,
    receiver: Receiver<JournalEvent>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("aupt-journal".into())
        .spawn(move || {
            while let Ok(event) = receiver.recv() {
                write_event(&path, &event);
            }
        })
}

fn write_event(path: &Path, event: &JournalEvent) {
    if rotate_if_needed(path).is_err() {
        return;
    }
    let mut file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("journal: failed to open {}: {err}", path.display());
            return;
        }
    };
    if let Ok(line) = serde_json::to_string(event) {
        let _ = writeln!(file, "{line}");
    }
}

fn rotate_if_needed(path: &Path) -> io::Result<()> {
    if let Ok(meta) = fs::metadata(path) {
        if meta.len() >= MAX_JOURNAL_BYTES {
            let rotated = path.with_extension("jsonl.1");
            let _ = fs::remove_file(&rotated);
            fs::rename(path, rotated)?;
        }
    }
    Ok(())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_land_as_json_lines_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path(), "run-1").unwrap();
        journal.record("test.start", &[("test", "LoginTest"), ("", "ignored")]);
        journal.record("test.end", &[("test", "LoginTest")]);
        journal.close();
        journal.close();

        let text = fs::read_to_string(dir.path().join(JOURNAL_FILE_NAME)).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "test.start");
        assert_eq!(first["run_id"], "run-1");
        assert_eq!(first["properties"]["test"], "LoginTest");
        assert!(first["properties"].get("").is_none());
    }

    #[test]
    fn records_after_close_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path(), "run-2").unwrap();
        journal.close();
        journal.record("late", &[]);
        assert_eq!(journal.dropped(), 0);
        let text = fs::read_to_string(dir.path().join(JOURNAL_FILE_NAME)).unwrap_or_default();
        assert!(text.is_empty());
    }
}
