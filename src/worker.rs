use log::{error, info, warn};
use reqwest::Client;
use std::time::Duration;
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Error;
use crate::notifier::Notifier;

/// Continuously monitors the configured websites, one batch per cycle.
///
/// # Behavior
///
/// - Opens a notification batch at the start of every cycle
/// - Checks each configured URL for availability and logs UP (info) or DOWN (warn)
/// - Closes the batch, so everything the notifier accepted during the cycle
///   goes out as a single webhook message
/// - Sleeps for the configured interval, or stops when `token` is cancelled
pub async fn monitor_websites(config: &Config, notifier: &dyn Notifier, token: CancellationToken) {
    info!("Starting website monitoring...");
    info!(
        "Check interval: {} seconds",
        config.monitor.check_interval_secs
    );
    info!("Timeout: {} seconds", config.monitor.timeout_secs);
    info!("Monitoring {} websites", config.sites.urls.len());

    let client = match Client::builder()
        .timeout(Duration::from_secs(config.monitor.timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client, stopping monitor: {e}");
            return;
        }
    };

    loop {
        if token.is_cancelled() {
            info!("Shutdown requested, stopping monitor");
            break;
        }

        run_cycle(&client, &config.sites.urls, notifier).await;

        // Interruptible sleep
        select! {
            () = sleep(Duration::from_secs(config.monitor.check_interval_secs)) => {},
            () = token.cancelled() => {
                info!("Shutdown requested during sleep");
                break;
            }
        }
    }

    info!("Website monitoring stopped gracefully");
}

/// Checks every URL once inside a single notification batch.
pub async fn run_cycle(client: &Client, urls: &[String], notifier: &dyn Notifier) {
    notifier.start_batch();
    info!("Checking website status...");

    for url in urls {
        match is_url_up(client, url).await {
            Ok(true) => info!("{url}: UP"),
            Ok(false) => warn!("{url}: DOWN"),
            Err(e) => warn!("{url}: DOWN ({e})"),
        }
    }

    notifier.end_batch();
}

/// Asynchronously checks if a given URL is up (returns a 2xx status).
async fn is_url_up(client: &Client, url: &str) -> Result<bool, Error> {
    let response = client.get(url).send().await?;
    Ok(response.status().is_success())
}
