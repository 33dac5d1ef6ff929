use log::{Level, error, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;

use crate::error::Error;
use crate::logger::{DIAGNOSTIC_TARGET, LogEntry, LogHook};
use crate::sender::Transport;

const BATCH_CAPACITY: usize = 10;

/// Lifecycle of one host cycle (e.g. one monitoring pass).
pub trait Notifier: Send + Sync {
    /// Starts collecting entries instead of sending them one by one.
    fn start_batch(&self);

    /// Sends everything collected since [`Notifier::start_batch`] as one message.
    fn end_batch(&self);
}

/// Scheme of a validated webhook URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// Checks that `url` is non-empty and uses `http://` or `https://`.
///
/// # Errors
///
/// [`Error::MissingWebhookUrl`] for an empty string and
/// [`Error::UnsupportedScheme`] for anything else not starting with a
/// supported scheme.
pub fn check_webhook_url(url: &str) -> Result<Scheme, Error> {
    if url.is_empty() {
        Err(Error::MissingWebhookUrl)
    } else if url.starts_with("https://") {
        Ok(Scheme::Https)
    } else if url.starts_with("http://") {
        Ok(Scheme::Http)
    } else {
        Err(Error::UnsupportedScheme(url.to_string()))
    }
}

/// Chat webhook payload.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
}

impl OutboundMessage {
    /// Joins the entries' messages, one per line, in order. Levels are not
    /// included.
    #[must_use]
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        let text = entries.iter().fold(String::new(), |mut text, entry| {
            text.push_str(&entry.message);
            text.push_str("\r\n");
            text
        });
        Self { text }
    }
}

#[derive(Debug)]
enum Batch {
    Idle,
    Active(Vec<LogEntry>),
}

/// Log hook that batches entries per cycle and posts them to a chat webhook.
///
/// Entries fired between [`Notifier::start_batch`] and [`Notifier::end_batch`]
/// are sent together; entries fired outside a batch are sent right away.
/// Deliveries run on background tasks and failures are only logged.
pub struct NotificationHook<T> {
    url: Arc<str>,
    levels: Vec<Level>,
    batch: Mutex<Batch>,
    transport: Arc<T>,
    runtime: Handle,
}

impl<T: Transport> NotificationHook<T> {
    /// Creates the hook for `url`, accepting entries whose level is in `levels`.
    ///
    /// Must be called from within a tokio runtime, deliveries are spawned on it.
    ///
    /// # Errors
    ///
    /// Fails if the URL is empty or has an unsupported scheme (see
    /// [`check_webhook_url`]), or if there is no current runtime.
    pub fn new(url: &str, levels: Vec<Level>, transport: T) -> Result<Self, Error> {
        if check_webhook_url(url)? == Scheme::Http {
            warn!("Using an HTTP url for the webhook is insecure");
        }

        Ok(Self {
            url: Arc::from(url),
            levels,
            batch: Mutex::new(Batch::Idle),
            transport: Arc::new(transport),
            runtime: Handle::try_current()?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_batching(&self) -> bool {
        matches!(*self.lock_batch(), Batch::Active(_))
    }

    fn lock_batch(&self) -> MutexGuard<'_, Batch> {
        // A panic while holding the lock cannot leave the batch half-written.
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, entries: &[LogEntry]) {
        let message = OutboundMessage::from_entries(entries);
        let url = Arc::clone(&self.url);
        let transport = Arc::clone(&self.transport);

        self.runtime.spawn(async move {
            deliver(transport.as_ref(), &url, &message).await;
        });
    }
}

async fn deliver<T: Transport>(transport: &T, url: &str, message: &OutboundMessage) {
    let body = match serde_json::to_vec(message) {
        Ok(body) => body,
        Err(e) => {
            error!(target: DIAGNOSTIC_TARGET, "Failed to create JSON body for webhook notification: {e}");
            return;
        }
    };

    match transport.post_json(url, body).await {
        Ok(status) if status.is_success() => {}
        Ok(status) => {
            error!(target: DIAGNOSTIC_TARGET, "Webhook notification returned {} HTTP status code", status.as_u16());
        }
        Err(e) => {
            error!(target: DIAGNOSTIC_TARGET, "Failed to send webhook notification: {e}");
        }
    }
}

impl<T: Transport> Notifier for NotificationHook<T> {
    fn start_batch(&self) {
        let mut batch = self.lock_batch();
        if matches!(*batch, Batch::Idle) {
            *batch = Batch::Active(Vec::with_capacity(BATCH_CAPACITY));
        }
    }

    fn end_batch(&self) {
        // Swapped out under the lock before sending, late entries belong to
        // the next batch or go out on their own.
        let mut batch = self.lock_batch();
        let entries = match std::mem::replace(&mut *batch, Batch::Idle) {
            Batch::Active(entries) if !entries.is_empty() => entries,
            unchanged => {
                *batch = unchanged;
                return;
            }
        };
        drop(batch);
        self.dispatch(&entries);
    }
}

impl<T: Transport> LogHook for NotificationHook<T> {
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    fn fire(&self, entry: LogEntry) {
        if !self.levels.contains(&entry.level) {
            return;
        }

        let entry = {
            let mut batch = self.lock_batch();
            match &mut *batch {
                Batch::Active(entries) => {
                    entries.push(entry);
                    return;
                }
                Batch::Idle => entry,
            }
        };
        // Output from outside a cycle is sent immediately.
        self.dispatch(&[entry]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::levels_at_or_above;
    use reqwest::StatusCode;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
    use tokio::time::{sleep, timeout};

    const URL: &str = "https://chat.example.com/v1/spaces/AAA/messages";

    struct RecordingTransport {
        sent: UnboundedSender<(String, Vec<u8>)>,
        status: StatusCode,
        calls: Arc<AtomicUsize>,
    }

    impl Transport for RecordingTransport {
        async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<StatusCode, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.sent.send((url.to_string(), body));
            Ok(self.status)
        }
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        async fn post_json(&self, _url: &str, _body: Vec<u8>) -> Result<StatusCode, Error> {
            Err(Error::Config("connection refused".to_string()))
        }
    }

    struct Harness {
        hook: NotificationHook<RecordingTransport>,
        rx: UnboundedReceiver<(String, Vec<u8>)>,
        calls: Arc<AtomicUsize>,
    }

    fn harness_with(status: StatusCode, levels: Vec<Level>) -> Harness {
        let (sent, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = RecordingTransport {
            sent,
            status,
            calls: Arc::clone(&calls),
        };
        let hook = NotificationHook::new(URL, levels, transport).expect("valid hook");
        Harness { hook, rx, calls }
    }

    fn harness() -> Harness {
        harness_with(StatusCode::OK, levels_at_or_above(Level::Info))
    }

    fn info(message: &str) -> LogEntry {
        LogEntry::new(Level::Info, message)
    }

    async fn next_body(rx: &mut UnboundedReceiver<(String, Vec<u8>)>) -> String {
        let (url, body) = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("transport dropped");
        assert_eq!(url, URL);
        String::from_utf8(body).unwrap()
    }

    async fn assert_no_more(rx: &mut UnboundedReceiver<(String, Vec<u8>)>) {
        sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "unexpected extra delivery");
    }

    #[test]
    fn test_check_webhook_url() {
        assert!(matches!(
            check_webhook_url(""),
            Err(Error::MissingWebhookUrl)
        ));
        assert!(matches!(
            check_webhook_url("ftp://example.com"),
            Err(Error::UnsupportedScheme(url)) if url == "ftp://example.com"
        ));
        assert_eq!(check_webhook_url("http://example.com").unwrap(), Scheme::Http);
        assert_eq!(
            check_webhook_url("https://example.com").unwrap(),
            Scheme::Https
        );
    }

    #[tokio::test]
    async fn test_new_rejects_bad_urls() {
        let (sent, _rx) = mpsc::unbounded_channel();
        let transport = || RecordingTransport {
            sent: sent.clone(),
            status: StatusCode::OK,
            calls: Arc::new(AtomicUsize::new(0)),
        };

        let empty = NotificationHook::new("", vec![Level::Error], transport());
        assert!(matches!(empty, Err(Error::MissingWebhookUrl)));

        let ftp = NotificationHook::new("ftp://example.com", vec![Level::Error], transport());
        assert!(matches!(ftp, Err(Error::UnsupportedScheme(_))));

        let http = NotificationHook::new("http://example.com", vec![Level::Error], transport())
            .expect("plain http is allowed");
        assert_eq!(http.url(), "http://example.com");
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let (sent, _rx) = mpsc::unbounded_channel();
        let transport = RecordingTransport {
            sent,
            status: StatusCode::OK,
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let result = NotificationHook::new(URL, vec![Level::Error], transport);
        assert!(matches!(result, Err(Error::NoRuntime(_))));
    }

    #[test]
    fn test_message_concatenates_in_order_without_levels() {
        let entries = vec![
            LogEntry::new(Level::Warn, "first"),
            LogEntry::new(Level::Error, "second"),
        ];
        assert_eq!(
            OutboundMessage::from_entries(&entries).text,
            "first\r\nsecond\r\n"
        );
    }

    #[tokio::test]
    async fn test_batch_is_sent_as_one_message() {
        let mut h = harness();

        h.hook.start_batch();
        h.hook.fire(info("a"));
        h.hook.fire(info("b"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        h.hook.end_batch();

        assert_eq!(next_body(&mut h.rx).await, r#"{"text":"a\r\nb\r\n"}"#);
        assert_no_more(&mut h.rx).await;
        assert!(!h.hook.is_batching());
    }

    #[tokio::test]
    async fn test_entry_outside_batch_is_sent_immediately() {
        let mut h = harness();

        h.hook.fire(info("starting up"));
        assert_eq!(next_body(&mut h.rx).await, r#"{"text":"starting up\r\n"}"#);

        h.hook.start_batch();
        h.hook.fire(info("in cycle"));
        h.hook.end_batch();
        assert_eq!(next_body(&mut h.rx).await, r#"{"text":"in cycle\r\n"}"#);

        h.hook.fire(info("after cycle"));
        assert_eq!(next_body(&mut h.rx).await, r#"{"text":"after cycle\r\n"}"#);
        assert_no_more(&mut h.rx).await;
    }

    #[tokio::test]
    async fn test_start_batch_is_idempotent() {
        let mut h = harness();

        h.hook.start_batch();
        h.hook.fire(info("a"));
        h.hook.start_batch();
        h.hook.fire(info("b"));
        h.hook.end_batch();

        assert_eq!(next_body(&mut h.rx).await, r#"{"text":"a\r\nb\r\n"}"#);
        assert_no_more(&mut h.rx).await;
    }

    #[tokio::test]
    async fn test_end_batch_twice_sends_once() {
        let mut h = harness();

        h.hook.start_batch();
        h.hook.fire(info("only once"));
        h.hook.end_batch();
        h.hook.end_batch();

        assert_eq!(next_body(&mut h.rx).await, r#"{"text":"only once\r\n"}"#);
        assert_no_more(&mut h.rx).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing_and_stays_open() {
        let mut h = harness();

        h.hook.end_batch();
        h.hook.start_batch();
        h.hook.end_batch();
        assert_no_more(&mut h.rx).await;
        assert!(h.hook.is_batching());

        h.hook.fire(info("late"));
        h.hook.end_batch();
        assert_eq!(next_body(&mut h.rx).await, r#"{"text":"late\r\n"}"#);
    }

    #[tokio::test]
    async fn test_unaccepted_levels_are_ignored() {
        let mut h = harness_with(StatusCode::OK, levels_at_or_above(Level::Warn));

        h.hook.fire(info("chatty"));
        h.hook.start_batch();
        h.hook.fire(info("still chatty"));
        h.hook.fire(LogEntry::new(Level::Warn, "site down"));
        h.hook.end_batch();

        assert_eq!(next_body(&mut h.rx).await, r#"{"text":"site down\r\n"}"#);
        assert_no_more(&mut h.rx).await;
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let mut h = harness_with(
            StatusCode::INTERNAL_SERVER_ERROR,
            levels_at_or_above(Level::Info),
        );

        h.hook.start_batch();
        h.hook.fire(info("a"));
        h.hook.end_batch();

        next_body(&mut h.rx).await;
        assert_no_more(&mut h.rx).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_error_does_not_reach_caller() {
        let hook = NotificationHook::new(URL, vec![Level::Error], FailingTransport).unwrap();

        hook.fire(LogEntry::new(Level::Error, "boom"));
        hook.start_batch();
        hook.fire(LogEntry::new(Level::Error, "boom again"));
        hook.end_batch();

        sleep(Duration::from_millis(50)).await;
        assert!(!hook.is_batching());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_fires_are_delivered_exactly_once() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 2000;

        let Harness { hook, mut rx, .. } = harness();
        let hook = Arc::new(hook);
        hook.start_batch();

        let producers: Vec<_> = (0..THREADS)
            .map(|t| {
                let hook = Arc::clone(&hook);
                std::thread::spawn(move || {
                    for n in 0..PER_THREAD {
                        hook.fire(info(&format!("{t}-{n}")));
                        if n % 7 == 0 {
                            hook.end_batch();
                            hook.start_batch();
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        hook.end_batch();

        let mut seen = HashSet::new();
        let mut total = 0;
        while total < THREADS * PER_THREAD {
            let body = next_body(&mut rx).await;
            let message: serde_json::Value = serde_json::from_str(&body).unwrap();
            for line in message["text"].as_str().unwrap().split_terminator("\r\n") {
                total += 1;
                seen.insert(line.to_string());
            }
        }

        assert_eq!(total, THREADS * PER_THREAD);
        assert_eq!(seen.len(), total, "an entry was delivered twice");
        assert_no_more(&mut rx).await;
    }
}
