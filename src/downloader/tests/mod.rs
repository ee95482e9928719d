use super::test_helpers::*;
use super::*;
use crate::db::NewDownloadRecord;
use crate::registry::DownloadHandle;
use crate::types::{DownloadRequest, FailureKind, Outcome, Status, Submission};
use std::time::Duration;


fn episode(name: &str, package: u32) -> DownloadRequest {
    DownloadRequest::new(name, "Seeder1", package)
}

fn issued(submission: Submission) -> DownloadHandle {
    match submission {
        Submission::Issued(handle) => handle,
        other => panic!("expected Issued, got {other:?}"),
    }
}

fn uppercase_sha256(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("{:X}", Sha256::digest(content))
}

/// Poll the ledger until `name` reaches `status`
async fn wait_for_status(downloader: &XdccDownloader, name: &str, status: Status) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = downloader.get_download(name).await.unwrap() {
            if record.status() == status {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{name} never reached {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collect every event currently buffered on `rx`
fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
