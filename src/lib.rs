//! Batches log output per host cycle and posts it to a chat webhook.
//!
//! [`HookedLogger`] is the `log` backend: it prints to the console and hands
//! records to registered [`LogHook`]s. [`NotificationHook`] is such a hook; it
//! collects entries between [`Notifier::start_batch`] and
//! [`Notifier::end_batch`] and sends each batch as one `{"text": ...}` message
//! through a [`Transport`] such as [`WebhookSender`].

pub mod config;
pub mod error;
pub mod logger;
pub mod notifier;
pub mod sender;
pub mod worker;

pub use config::Config;
pub use error::Error;
pub use logger::{HookedLogger, LogEntry, LogHook, levels_at_or_above};
pub use notifier::{NotificationHook, Notifier, OutboundMessage, check_webhook_url};
pub use sender::{Transport, WebhookSender};
