//! Shared test helpers for creating XdccDownloader instances in tests.

use crate::config::{Config, RetryConfig};
use crate::correlator::OfferSink;
use crate::downloader::XdccDownloader;
use crate::error::TransportError;
use crate::storage::DirectoryStorage;
use crate::transport::{OfferHandle, TransferOffer, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

/// In-memory offer that writes fixed content on download
pub(crate) struct MemoryOffer {
    pub(crate) name: String,
    pub(crate) declared_size: u64,
    pub(crate) content: Vec<u8>,
    pub(crate) fail_with: Option<std::io::ErrorKind>,
    pub(crate) panic: bool,
    pub(crate) delay: Duration,
}

impl MemoryOffer {
    pub(crate) fn new(name: &str, content: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            declared_size: content.len() as u64,
            content: content.to_vec(),
            fail_with: None,
            panic: false,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn handle(self) -> OfferHandle {
        Arc::new(self)
    }
}

#[async_trait]
impl TransferOffer for MemoryOffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_size(&self) -> u64 {
        self.declared_size
    }

    async fn start_download(&self, dest_dir: &Path) -> std::io::Result<PathBuf> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic {
            panic!("offer stream exploded");
        }
        if let Some(kind) = self.fail_with {
            return Err(std::io::Error::new(kind, "peer closed the connection"));
        }
        let path = dest_dir.join(&self.name);
        tokio::fs::write(&path, &self.content).await?;
        Ok(path)
    }
}

type OfferFactory = Box<dyn Fn() -> OfferHandle + Send + Sync>;

/// Transport that records commands and answers them from a script
#[derive(Default)]
pub(crate) struct MockTransport {
    connected: AtomicBool,
    pub(crate) connect_calls: AtomicU32,
    /// Number of connect calls that fail before one succeeds
    pub(crate) connect_failures: AtomicU32,
    pub(crate) fail_commands: AtomicBool,
    commands: Mutex<Vec<(String, String)>>,
    sink: Mutex<Option<OfferSink>>,
    /// Offer delivered whenever a command for this package is sent
    responses: Mutex<HashMap<u32, OfferFactory>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer every command for `package` with the offer `factory` builds
    pub(crate) fn respond(
        &self,
        package: u32,
        factory: impl Fn() -> OfferHandle + Send + Sync + 'static,
    ) {
        self.responses
            .lock()
            .unwrap()
            .insert(package, Box::new(factory));
    }

    /// Deliver an offer as if a peer sent it
    pub(crate) fn deliver(&self, offer: OfferHandle) -> bool {
        let sink = self.sink.lock().unwrap().clone().expect("no sink registered");
        sink.offer_received(offer)
    }

    pub(crate) fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn is_connected_now(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectionFailed("refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_command(&self, text: &str, target: &str) -> Result<(), TransportError> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(TransportError::CommandFailed {
                target: target.to_string(),
                reason: "socket closed".into(),
            });
        }
        self.commands
            .lock()
            .unwrap()
            .push((text.to_string(), target.to_string()));

        let package = text
            .rsplit('#')
            .next()
            .and_then(|n| n.parse::<u32>().ok());
        let offer = package.and_then(|p| self.responses.lock().unwrap().get(&p).map(|f| f()));
        if let Some(offer) = offer {
            let sink = self.sink.lock().unwrap().clone();
            if let Some(sink) = sink {
                tokio::spawn(async move {
                    sink.offer_received(offer);
                });
            }
        }
        Ok(())
    }

    fn subscribe_offers(&self, sink: OfferSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Config with everything inside `root` and millisecond timings
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = root.join("test.db");
    config.download.temp_dir = root.join("temp");
    config.storage.root_dir = root.join("storage");
    config.download.offer_timeout = Duration::from_millis(200);
    config.download.command_retry = RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.download.connect_retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.disk_space.enabled = false;
    config
}

/// Downloader over a mock transport and directory storage in a temp dir
pub(crate) async fn create_test_downloader_with(
    configure: impl FnOnce(&mut Config),
) -> (XdccDownloader, Arc<MockTransport>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let transport = MockTransport::new();
    let storage = Arc::new(DirectoryStorage::from_config(&config.storage));
    let downloader = XdccDownloader::new(config, transport.clone(), storage)
        .await
        .unwrap();

    (downloader, transport, temp_dir)
}

/// Helper to create a test XdccDownloader with default test settings
pub(crate) async fn create_test_downloader()
-> (XdccDownloader, Arc<MockTransport>, tempfile::TempDir) {
    create_test_downloader_with(|_| {}).await
}
