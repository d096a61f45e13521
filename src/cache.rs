//! Page hierarchy cache service.
//!
//! [`PageCache`] owns the current [`HierarchySnapshot`] and is shared as an
//! `Arc<PageCache>` by the search engine and every tool invocation.
//!
//! # Concurrency
//!
//! - The snapshot sits behind a `std::sync::RwLock<Option<Arc<_>>>` that is
//!   held only to clone or swap the `Arc`. Readers never see a partial
//!   snapshot.
//! - Rebuilds are serialized by a `tokio::sync::Mutex<()>`. Callers that
//!   queue behind an in-flight rebuild re-check freshness once they get the
//!   lock and share the result instead of rebuilding again.
//! - A forced refresh only shares a rebuild that *started* after the call
//!   did. A rebuild already enumerating when the call arrives may predate
//!   the caller's write, so the call queues and rebuilds again.
//!
//! # Degradation
//!
//! - Only a failure of the *first* listing page fails a rebuild. Later page
//!   failures truncate the enumeration and are logged.
//! - If a rebuild fails while an older snapshot exists, `get_or_refresh`
//!   serves the stale snapshot.
//! - Persistence failures are logged; the in-memory snapshot is still used.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::error::HarnessError;
use crate::hierarchy::HierarchySnapshot;
use crate::models::PageRecord;
use crate::remote::Workspace;

pub struct PageCache {
    workspace: Arc<dyn Workspace>,
    config: CacheConfig,
    snapshot: RwLock<Option<Arc<HierarchySnapshot>>>,
    rebuild_lock: tokio::sync::Mutex<()>,
    /// Incremented when a rebuild starts enumerating.
    started: AtomicU64,
    /// `started` value of the rebuild that produced the current snapshot.
    installed_from: AtomicU64,
}

/// Result of [`PageCache::force_refresh`].
#[derive(Debug, Clone)]
pub struct Refresh {
    pub snapshot: Arc<HierarchySnapshot>,
    pub duration: Duration,
    /// True when a rebuild that started after this call was reused.
    pub shared: bool,
}

impl PageCache {
    pub fn new(workspace: Arc<dyn Workspace>, config: CacheConfig) -> Self {
        Self {
            workspace,
            config,
            snapshot: RwLock::new(None),
            rebuild_lock: tokio::sync::Mutex::new(()),
            started: AtomicU64::new(0),
            installed_from: AtomicU64::new(0),
        }
    }

    /// The current snapshot, fresh or not.
    pub fn current(&self) -> Option<Arc<HierarchySnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn fresh(&self) -> Option<Arc<HierarchySnapshot>> {
        self.current()
            .filter(|snap| !snap.is_expired(self.config.ttl()))
    }

    fn install(&self, snapshot: Arc<HierarchySnapshot>, from: u64) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
        self.installed_from.store(from, Ordering::SeqCst);
    }

    /// Load the persisted snapshot if present and not expired.
    ///
    /// Returns whether a snapshot was installed. A missing, corrupt or
    /// expired file is logged and ignored.
    pub fn load_persisted(&self) -> bool {
        let path = &self.config.path;
        if !path.exists() {
            return false;
        }
        match HierarchySnapshot::load(path) {
            Ok(snap) if snap.is_expired(self.config.ttl()) => {
                tracing::info!(path = %path.display(), built_at = %snap.built_at(), "persisted cache expired");
                false
            }
            Ok(snap) => {
                tracing::info!(path = %path.display(), records = snap.len(), "loaded persisted cache");
                self.install(Arc::new(snap), 0);
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "ignoring unreadable cache file");
                false
            }
        }
    }

    /// Return a snapshot younger than the TTL, rebuilding if needed.
    pub async fn get_or_refresh(&self) -> Result<Arc<HierarchySnapshot>, HarnessError> {
        if let Some(snap) = self.fresh() {
            return Ok(snap);
        }

        let _guard = self.rebuild_lock.lock().await;
        if let Some(snap) = self.fresh() {
            return Ok(snap);
        }

        match self.rebuild_and_install().await {
            Ok((snap, _)) => Ok(snap),
            Err(e) => match self.current() {
                Some(stale) => {
                    tracing::warn!(error = %e, built_at = %stale.built_at(), "rebuild failed, serving stale cache");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Rebuild unconditionally, unless a rebuild that started after this
    /// call began has already been installed, in which case its result is
    /// shared. Anything written before the call is in the returned snapshot.
    pub async fn force_refresh(&self) -> Result<Refresh, HarnessError> {
        let begun = self.started.load(Ordering::SeqCst);
        let waited = Instant::now();
        let _guard = self.rebuild_lock.lock().await;

        if self.installed_from.load(Ordering::SeqCst) > begun {
            if let Some(snapshot) = self.current() {
                tracing::debug!("sharing rebuild that started while waiting");
                return Ok(Refresh {
                    snapshot,
                    duration: waited.elapsed(),
                    shared: true,
                });
            }
        }

        let (snapshot, duration) = self.rebuild_and_install().await?;
        Ok(Refresh {
            snapshot,
            duration,
            shared: false,
        })
    }

    /// Enumerate the workspace and build a new snapshot, without installing it.
    pub async fn rebuild(&self) -> Result<HierarchySnapshot, HarnessError> {
        let first = self
            .workspace
            .list_pages(None)
            .await
            .map_err(|e| HarnessError::RemoteUnavailable(e.to_string()))?;

        let mut records: Vec<PageRecord> = first.objects.into_iter().map(PageRecord::from).collect();
        let mut cursor = first.next_cursor;
        let mut pages = 1usize;

        while let Some(current) = cursor.take() {
            match self.workspace.list_pages(Some(&current)).await {
                Ok(page) => {
                    pages += 1;
                    records.extend(page.objects.into_iter().map(PageRecord::from));
                    if page.next_cursor.as_deref() == Some(current.as_str()) {
                        tracing::warn!(cursor = %current, "listing returned the same cursor twice, stopping");
                        break;
                    }
                    cursor = page.next_cursor;
                }
                Err(e) => {
                    tracing::warn!(page = pages + 1, error = %e, "listing page failed, enumeration truncated");
                    break;
                }
            }
        }

        tracing::debug!(pages, records = records.len(), "enumeration finished");
        Ok(HierarchySnapshot::from_records(records, Utc::now()))
    }

    /// Caller must hold `rebuild_lock`.
    async fn rebuild_and_install(&self) -> Result<(Arc<HierarchySnapshot>, Duration), HarnessError> {
        let start = Instant::now();
        let ticket = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(self.rebuild().await?);
        let duration = start.elapsed();

        if let Err(e) = snapshot.save(&self.config.path) {
            tracing::warn!(path = %self.config.path.display(), error = %format!("{:#}", e), "failed to persist cache");
        }
        self.install(snapshot.clone(), ticket);

        tracing::info!(
            records = snapshot.len(),
            elapsed_ms = duration.as_millis() as u64,
            "hierarchy cache rebuilt"
        );
        Ok((snapshot, duration))
    }

    // ============ Read helpers ============

    pub async fn find_by_title(&self, query: &str, fuzzy: bool) -> Result<Vec<PageRecord>, HarnessError> {
        Ok(self.get_or_refresh().await?.find_by_title(query, fuzzy))
    }

    pub async fn find_by_path(&self, segments: &[String]) -> Result<Option<PageRecord>, HarnessError> {
        Ok(self.get_or_refresh().await?.find_by_path(segments))
    }

    pub async fn get(&self, id: &str) -> Result<Option<PageRecord>, HarnessError> {
        Ok(self.get_or_refresh().await?.get(id).cloned())
    }
}
