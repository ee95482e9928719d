//! Custom test assertions for integration tests

use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use xdcc_dl::{Event, FailureKind, Status, XdccDownloader};

/// Result of waiting for a terminal event
#[derive(Debug, PartialEq)]
pub enum WaitResult {
    /// File was published
    Available(String),
    /// Acquisition failed
    Failed(FailureKind),
    /// Timeout waiting for completion
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait on `events` until `name` reaches Available or Failed
pub async fn wait_for_terminal(
    events: &mut Receiver<Event>,
    name: &str,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Available {
                    file_name, digest, ..
                }) if file_name == name => return WaitResult::Available(digest),
                Ok(Event::Failed {
                    file_name, kind, ..
                }) if file_name == name => return WaitResult::Failed(kind),
                Ok(_) => continue,
                Err(_) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Collect events until one matches `predicate` or `timeout` elapses
pub async fn collect_events_until<F>(
    events: &mut Receiver<Event>,
    timeout: Duration,
    mut predicate: F,
) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = predicate(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    collected
}

/// Assert the ledger holds `name` with `status`
pub async fn assert_status(downloader: &XdccDownloader, name: &str, status: Status) {
    let record = downloader
        .get_download(name)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no ledger record for {name}"));
    assert_eq!(record.status(), status, "{name}");
}

/// Uppercase hex SHA-256, the digest format the ledger stores
pub fn sha256_hex(content: &[u8]) -> String {
    format!("{:X}", Sha256::digest(content))
}
