// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Background workers: cache writeback and version retention. Long-lived
//! tasks woken by a signal or a fixed interval, joined on shutdown via a
//! shared stop flag rather than waiting out a sleep. Mirrors the shape of
//! the teacher's semi-space GC loop (`collect_loop_passive` /
//! `collect_loop_event`), adapted to this engine's cache/version workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheSystem;
use crate::config::Config;
use crate::file_registry::FileRegistry;

/// A request for an immediate writeback pass, paired with the channel its
/// caller blocks on for completion. Mirrors the teacher's GC control channel
/// (`flume::Sender<flume::Sender<anyhow::Result<()>>>` in
/// `node/db/src/rolling/gc.rs`): a channel carrying reply channels, so a
/// synchronous caller can wait for a background pass to actually finish
/// instead of just nudging it and hoping.
type WritebackRequest = flume::Sender<crate::error::Result<()>>;

pub struct BackgroundScheduler {
    stop: Arc<AtomicBool>,
    writeback_signal: Arc<Notify>,
    retention_signal: Arc<Notify>,
    writeback_requests: flume::Sender<WritebackRequest>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundScheduler {
    /// Spawns the writeback and retention workers onto the current Tokio
    /// runtime. Call [`BackgroundScheduler::shutdown`] to stop them.
    pub fn spawn(cache: Arc<CacheSystem>, files: Arc<FileRegistry>, cfg: Arc<parking_lot::Mutex<Config>>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let writeback_signal = Arc::new(Notify::new());
        let retention_signal = Arc::new(Notify::new());
        let (writeback_requests, wb_request_rx) = flume::unbounded::<WritebackRequest>();

        let wb_stop = stop.clone();
        let wb_signal = writeback_signal.clone();
        let wb_interval = cfg.lock().writeback_interval_seconds;
        let wb_handle = tokio::spawn(async move {
            loop {
                if wb_stop.load(Ordering::Relaxed) {
                    break;
                }
                let wait = tokio::time::sleep(Duration::from_secs(wb_interval.max(1)));
                let mut reply_to = None;
                tokio::select! {
                    _ = wait => {},
                    _ = wb_signal.notified() => {},
                    Ok(reply) = wb_request_rx.recv_async() => { reply_to = Some(reply); },
                }
                if wb_stop.load(Ordering::Relaxed) {
                    break;
                }
                let result = cache.manage();
                match &result {
                    Ok(fraction) => {
                        debug!("cache writeback pass complete, dirty_fraction={fraction:.3}");
                        if *fraction >= 0.20 {
                            wb_signal.notify_one();
                        }
                    }
                    Err(e) => warn!("cache writeback failed: {e}"),
                }
                if let Some(reply) = reply_to {
                    let _ = reply.send(result.map(|_| ()));
                }
            }
            info!("cache writeback worker stopped");
        });

        let ret_stop = stop.clone();
        let ret_signal = retention_signal.clone();
        let ret_handle = tokio::spawn(async move {
            loop {
                if ret_stop.load(Ordering::Relaxed) {
                    break;
                }
                let period = cfg.lock().version_period_seconds.max(1) as u64;
                let wait = tokio::time::sleep(Duration::from_secs(period));
                tokio::select! {
                    _ = wait => {},
                    _ = ret_signal.notified() => {},
                }
                if ret_stop.load(Ordering::Relaxed) {
                    break;
                }
                let now = chrono::Utc::now();
                let (max_versions, expire_days, size_limit) = {
                    let guard = cfg.lock();
                    (guard.max_versions, guard.version_expire_days, guard.version_size_limit_bytes)
                };
                for entry in files.iter() {
                    if let Err(e) = entry
                        .vc
                        .run_retention_with(now, max_versions, expire_days, size_limit)
                    {
                        warn!("retention failed for inode {}: {e}", entry.inode);
                    }
                }
            }
            info!("retention worker stopped");
        });

        BackgroundScheduler {
            stop,
            writeback_signal,
            retention_signal,
            writeback_requests,
            handles: vec![wb_handle, ret_handle],
        }
    }

    pub fn request_writeback_now(&self) {
        self.writeback_signal.notify_one();
    }

    pub fn request_retention_now(&self) {
        self.retention_signal.notify_one();
    }

    /// Asks the writeback worker to run immediately and blocks the caller
    /// until that pass has actually completed, rather than only nudging it.
    pub fn request_writeback_and_wait(&self) -> crate::error::Result<()> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        if self.writeback_requests.send(reply_tx).is_err() {
            return Err(crate::error::Error::Busy("writeback worker is not running".into()));
        }
        reply_rx
            .recv()
            .map_err(|_| crate::error::Error::Busy("writeback worker dropped the reply channel".into()))?
    }

    pub async fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.writeback_signal.notify_waiters();
        self.retention_signal.notify_waiters();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}
