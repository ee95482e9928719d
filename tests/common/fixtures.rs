//! Test fixtures: a scripted bot, in-memory offers and a recording ledger

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use xdcc_dl::config::RetryConfig;
use xdcc_dl::db::{NewDownloadRecord, RecordUpdate};
use xdcc_dl::error::TransportError;
use xdcc_dl::{
    Config, Database, DirectoryStorage, DownloadRecord, Ledger, OfferHandle, OfferSink, Result,
    Status, TransferOffer, Transport, XdccDownloader,
};

/// Offer that writes fixed bytes into the destination directory
pub struct ScriptedOffer {
    pub name: String,
    pub declared_size: u64,
    pub content: Vec<u8>,
    pub delay: Duration,
    pub fail: bool,
}

impl ScriptedOffer {
    pub fn new(name: &str, content: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            declared_size: content.len() as u64,
            content: content.to_vec(),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn handle(self) -> OfferHandle {
        Arc::new(self)
    }
}

#[async_trait]
impl TransferOffer for ScriptedOffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_size(&self) -> u64 {
        self.declared_size
    }

    async fn start_download(&self, dest_dir: &Path) -> std::io::Result<PathBuf> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "transfer aborted by peer",
            ));
        }
        let path = dest_dir.join(&self.name);
        tokio::fs::write(&path, &self.content).await?;
        Ok(path)
    }
}

/// Bot that serves a fixed package list
///
/// Commands for a known package are answered with an offer for that package's
/// file; unknown packages are silently ignored, like a real bot does.
#[derive(Default)]
pub struct ScriptedBot {
    connected: AtomicBool,
    packages: Mutex<HashMap<u32, (String, Vec<u8>, Duration)>>,
    commands: Mutex<Vec<(String, String)>>,
    sink: Mutex<Option<OfferSink>>,
}

impl ScriptedBot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `content` as `name` under package number `package`
    pub fn serve(&self, package: u32, name: &str, content: &[u8]) {
        self.serve_slowly(package, name, content, Duration::ZERO);
    }

    /// Like [`serve`](Self::serve) but the transfer takes `delay`
    pub fn serve_slowly(&self, package: u32, name: &str, content: &[u8], delay: Duration) {
        self.packages
            .lock()
            .unwrap()
            .insert(package, (name.to_string(), content.to_vec(), delay));
    }

    /// Send an offer nobody asked for
    pub fn push_offer(&self, offer: OfferHandle) -> bool {
        let sink = self.sink.lock().unwrap().clone();
        sink.expect("transport was never subscribed")
            .offer_received(offer)
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedBot {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> std::result::Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_command(&self, text: &str, target: &str) -> std::result::Result<(), TransportError> {
        self.commands
            .lock()
            .unwrap()
            .push((text.to_string(), target.to_string()));

        let served = text
            .strip_prefix("xdcc send #")
            .and_then(|n| n.parse::<u32>().ok())
            .and_then(|n| self.packages.lock().unwrap().get(&n).cloned());
        let sink = self.sink.lock().unwrap().clone();
        if let (Some((name, content, delay)), Some(sink)) = (served, sink) {
            let offer = ScriptedOffer::new(&name, &content).slow(delay).handle();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                sink.offer_received(offer);
            });
        }
        Ok(())
    }

    fn subscribe_offers(&self, sink: OfferSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn name(&self) -> &'static str {
        "scripted-bot"
    }
}

/// Ledger that records every status it writes before delegating to SQLite
pub struct RecordingLedger {
    inner: Arc<Database>,
    writes: Mutex<Vec<(String, Status)>>,
}

impl RecordingLedger {
    pub fn new(inner: Arc<Database>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            writes: Mutex::new(Vec::new()),
        })
    }

    /// Statuses written for `name`, in order
    pub fn history(&self, name: &str) -> Vec<Status> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, s)| *s)
            .collect()
    }
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn find_by_key(&self, name: &str) -> Result<Option<DownloadRecord>> {
        self.inner.find_by_key(name).await
    }

    async fn insert(&self, record: &NewDownloadRecord) -> Result<()> {
        self.inner.insert(record).await?;
        self.writes
            .lock()
            .unwrap()
            .push((record.name.clone(), record.status));
        Ok(())
    }

    async fn update(&self, update: &RecordUpdate) -> Result<()> {
        self.inner.update(update).await?;
        self.writes
            .lock()
            .unwrap()
            .push((update.name.clone(), update.status));
        Ok(())
    }

    async fn list_by_status(&self, status: Status) -> Result<Vec<DownloadRecord>> {
        self.inner.list_by_status(status).await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        self.inner.delete(name).await
    }
}

/// Config rooted in `root` with short timeouts
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = root.join("ledger.db");
    config.download.temp_dir = root.join("incoming");
    config.storage.root_dir = root.join("published");
    config.download.offer_timeout = Duration::from_millis(300);
    config.download.command_retry = RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config.disk_space.enabled = false;
    config
}

/// Everything a scenario needs, kept alive together
pub struct Harness {
    pub downloader: XdccDownloader,
    pub bot: Arc<ScriptedBot>,
    pub ledger: Arc<RecordingLedger>,
    pub temp_dir: TempDir,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        configure(&mut config);
        Self::start_in(temp_dir, config).await
    }

    /// Start over an existing directory, e.g. to simulate a restart
    pub async fn start_in(temp_dir: TempDir, config: Config) -> Self {
        let bot = ScriptedBot::new();
        let storage = Arc::new(DirectoryStorage::from_config(&config.storage));

        let recorder = Arc::new(Mutex::new(None));
        let slot = recorder.clone();
        let downloader = XdccDownloader::with_ledger(config, bot.clone(), storage, move |db| {
            let ledger = RecordingLedger::new(db);
            *slot.lock().unwrap() = Some(ledger.clone());
            ledger as Arc<dyn Ledger>
        })
        .await
        .unwrap();
        let ledger = recorder.lock().unwrap().take().unwrap();

        Self {
            downloader,
            bot,
            ledger,
            temp_dir,
        }
    }

    pub fn published(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join("published/Files").join(name)
    }
}
