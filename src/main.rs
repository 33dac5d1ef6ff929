use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use webhook_notifier::{Config, Error, HookedLogger, NotificationHook, WebhookSender, worker};

#[tokio::main]
async fn main() {
    // A misconfigured webhook is fatal, the monitor must not run silently.
    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let logger = HookedLogger::from_env().install()?;
    let config = Config::load()?;

    let hook = Arc::new(NotificationHook::new(
        config.webhook_url(),
        config.notification_levels(),
        WebhookSender::default(),
    )?);
    logger.add_hook(hook.clone());
    info!(
        "Sending {} and above to the webhook",
        config.notifications.level
    );

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    worker::monitor_websites(&config, hook.as_ref(), token).await;
    Ok(())
}
