use crate::config::Config;
use crate::metrics::{RELOAD_FAILED_TOTAL, RELOAD_VERSION_INFO};
use anyhow::Result;
use rand::Rng;
use sha2::{Digest, Sha512};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_JITTER: Duration = Duration::from_secs(15);

/// Polls the config file's SHA-512 and fires `reload_tx` once when it changes.
pub struct ConfigWatcher {
    _handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn spawn(path: String, interval: Duration, jitter: Duration, reload_tx: watch::Sender<bool>) -> Self {
        let interval = interval.max(Duration::from_millis(100));
        let jitter = jitter.min(interval / 2);

        let initial_hash = hash_file(&path).unwrap_or_default();
        RELOAD_VERSION_INFO.with_label_values(&["sha512", &initial_hash]).set(1.0);
        tracing::info!("[reload] Watching changes for {} (Interval: {:?}, Jitter: {:?})", path, interval, jitter);

        let handle = tokio::spawn(async move {
            loop {
                sleep(jittered(interval, jitter)).await;

                match hash_file(&path) {
                    Ok(new_hash) if new_hash != initial_hash => {
                        tracing::info!("[reload] config change detected, new SHA512: {}", new_hash);
                        RELOAD_VERSION_INFO.with_label_values(&["sha512", &initial_hash]).set(0.0);
                        RELOAD_VERSION_INFO.with_label_values(&["sha512", &new_hash]).set(1.0);
                        let _ = reload_tx.send(true);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("[reload] Failed to read {}: {}", path, e);
                        RELOAD_FAILED_TOTAL.inc();
                    }
                }
            }
        });

        Self { _handle: handle }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

/// `interval` shifted by a uniform offset in `[-jitter, +jitter]`.
fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let span = jitter.as_millis() as u64;
    if span == 0 {
        return interval;
    }
    let j = rand::thread_rng().gen_range(0..=span * 2);
    if j > span {
        interval + Duration::from_millis(j - span)
    } else {
        interval.saturating_sub(Duration::from_millis(span - j))
    }
}

/// Loads an edited config for the next generation. A broken file is logged
/// and counted, and the caller keeps serving the current generation.
pub fn load_next(path: &str) -> Option<Config> {
    match Config::load(path) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::error!("[reload] keeping the running configuration: {:#}", e);
            RELOAD_FAILED_TOTAL.inc();
            None
        }
    }
}

pub fn hash_file(path: &str) -> Result<String> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha512::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}
