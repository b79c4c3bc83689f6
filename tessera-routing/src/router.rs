//! Collection router - keeps one collection's routing table current.
//!
//! The router owns the latest routing table snapshot and refreshes it from a
//! [`CatalogSource`]. Refreshes prefer an incremental diff and fall back to a
//! full rebuild when the collection's epoch changed or the diff is too large
//! to be worth applying. Readers take `Arc` snapshots and are never affected
//! by a later refresh.

use std::sync::Arc;

use tracing::{debug, info, warn};

use tessera_core::{ChunkRange, ChunkVersion, Limits, LogicalTime, ShardId};

use crate::catalog::CatalogSource;
use crate::error::{CatalogError, RefreshError, RoutingError};
use crate::ownership::OwnershipFilter;
use crate::routing_table::RoutingTable;
use crate::view::RoutingTableView;

/// Configuration for a collection router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Size limits for builds and diffs.
    pub limits: Limits,
    /// Rebuild from the full chunk list when a diff is malformed, instead of
    /// failing the refresh.
    pub full_rebuild_on_malformed_diff: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            full_rebuild_on_malformed_diff: true,
        }
    }
}

/// What a successful refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The catalog reported no changes; the snapshot was kept.
    Unchanged,
    /// A diff was applied to the previous snapshot.
    Incremental {
        /// Number of diff entries applied.
        diff_entries: usize,
    },
    /// The table was rebuilt from the full chunk list.
    FullRebuild {
        /// Number of chunks in the new table.
        chunks: usize,
    },
}

/// Refresh counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Refreshes that rebuilt the table from scratch.
    pub full_rebuilds: u64,
    /// Refreshes that applied a diff.
    pub incremental_refreshes: u64,
    /// Refreshes that found nothing to do.
    pub unchanged_refreshes: u64,
    /// Refreshes that returned an error.
    pub failed_refreshes: u64,
}

/// Refresh coordinator for one collection's routing table.
///
/// Refreshes take `&mut self`, so at most one is in progress per router.
#[derive(Debug)]
pub struct CollectionRouter<S> {
    /// Configuration.
    config: RouterConfig,
    /// Where chunk metadata is fetched from.
    source: S,
    /// The latest successfully built table.
    table: Option<Arc<RoutingTable>>,
    /// Refresh counters.
    stats: RefreshStats,
}

impl<S: CatalogSource> CollectionRouter<S> {
    /// Creates a router with no table loaded.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `config.limits` is inconsistent.
    pub fn new(config: RouterConfig, source: S) -> tessera_core::Result<Self> {
        config.limits.validate()?;
        Ok(Self::unchecked(config, source))
    }

    /// Creates a router with default configuration.
    #[must_use]
    pub fn with_source(source: S) -> Self {
        Self::unchecked(RouterConfig::default(), source)
    }

    fn unchecked(config: RouterConfig, source: S) -> Self {
        Self {
            config,
            source,
            table: None,
            stats: RefreshStats::default(),
        }
    }

    /// Brings the routing table up to date with the catalog.
    ///
    /// On a build or update failure the table is dropped, so that nothing
    /// routes with a table known to disagree with the catalog. An
    /// unreachable catalog keeps the previous table; a catalog reporting the
    /// collection gone drops it.
    ///
    /// # Errors
    ///
    /// - `RefreshError::Catalog` if the catalog cannot be read.
    /// - `RefreshError::Build` if the full chunk list is inconsistent.
    /// - `RefreshError::Update` if a diff cannot be applied and full rebuilds
    ///   on malformed diffs are disabled.
    pub fn refresh(&mut self) -> Result<RefreshOutcome, RefreshError> {
        let result = self.try_refresh();
        self.record(&result);
        result
    }

    /// Discards the current table and rebuilds from the full chunk list.
    ///
    /// # Errors
    ///
    /// See [`CollectionRouter::refresh`].
    pub fn force_full_rebuild(&mut self) -> Result<RefreshOutcome, RefreshError> {
        let result = self.full_rebuild();
        self.record(&result);
        result
    }

    fn try_refresh(&mut self) -> Result<RefreshOutcome, RefreshError> {
        let Some(current) = self.table.clone() else {
            return self.full_rebuild();
        };

        let since = current.collection_version();
        let diff = self.source.fetch_diff_since(since)?;
        if diff.is_empty() {
            debug!(version = %since, "Routing table is current");
            return Ok(RefreshOutcome::Unchanged);
        }

        let diff_entries = diff.len();
        if diff_entries as u64 > self.config.limits.max_diff_entries {
            info!(
                diff_entries,
                max = self.config.limits.max_diff_entries,
                "Diff too large, rebuilding routing table"
            );
            return self.full_rebuild();
        }

        match current.apply_diff(diff) {
            Ok(table) => {
                info!(
                    from = %since,
                    to = %table.collection_version(),
                    diff_entries,
                    "Refreshed routing table incrementally"
                );
                self.table = Some(Arc::new(table));
                Ok(RefreshOutcome::Incremental { diff_entries })
            }
            Err(err) if err.requires_full_rebuild() => {
                info!(error = %err, "Collection epoch changed, rebuilding routing table");
                self.table = None;
                self.full_rebuild()
            }
            Err(err) if self.config.full_rebuild_on_malformed_diff => {
                warn!(error = %err, "Malformed routing diff, rebuilding routing table");
                self.full_rebuild()
            }
            Err(err) => Err(err.into()),
        }
    }

    fn full_rebuild(&mut self) -> Result<RefreshOutcome, RefreshError> {
        let snapshot = self.source.fetch_full_chunk_list()?;
        let table = RoutingTable::build_with_limits(
            snapshot.epoch,
            snapshot.key_pattern,
            snapshot.chunks,
            &self.config.limits,
        )?;
        let chunks = table.chunk_count();
        info!(
            epoch = %table.epoch(),
            version = %table.collection_version(),
            chunks,
            shards = table.shard_count(),
            "Rebuilt routing table"
        );
        self.table = Some(Arc::new(table));
        Ok(RefreshOutcome::FullRebuild { chunks })
    }

    fn record(&mut self, result: &Result<RefreshOutcome, RefreshError>) {
        match result {
            Ok(RefreshOutcome::Unchanged) => self.stats.unchanged_refreshes += 1,
            Ok(RefreshOutcome::Incremental { .. }) => self.stats.incremental_refreshes += 1,
            Ok(RefreshOutcome::FullRebuild { .. }) => self.stats.full_rebuilds += 1,
            Err(err) => {
                self.stats.failed_refreshes += 1;
                match err {
                    RefreshError::Catalog(CatalogError::Unavailable { .. }) => {}
                    RefreshError::Catalog(CatalogError::CollectionNotFound) => {
                        info!("Collection no longer sharded, dropping routing table");
                        self.table = None;
                    }
                    RefreshError::Build(_) | RefreshError::Update(_) => self.table = None,
                }
                warn!(error = %err, "Routing table refresh failed");
            }
        }
    }

    /// Drops the current table; the next refresh rebuilds from scratch.
    pub fn invalidate(&mut self) {
        self.table = None;
    }

    /// Returns the current snapshot, if one is loaded.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<RoutingTable>> {
        self.table.clone()
    }

    /// Returns a view of the current snapshot with no read time.
    #[must_use]
    pub fn view(&self) -> Option<RoutingTableView> {
        self.snapshot().map(RoutingTableView::new)
    }

    /// Returns a view of the current snapshot as of `read_at`.
    #[must_use]
    pub fn view_at(&self, read_at: LogicalTime) -> Option<RoutingTableView> {
        self.snapshot().map(|table| RoutingTableView::at(table, read_at))
    }

    /// Returns an ownership filter for `local_shard` over the current
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::NotLoaded` if no table is loaded, or
    /// `RoutingError::Limit` if too many pending ranges are supplied.
    pub fn ownership_filter(
        &self,
        local_shard: ShardId,
        pending_incoming: impl IntoIterator<Item = ChunkRange>,
    ) -> Result<OwnershipFilter, RoutingError> {
        let view = self.view().ok_or(RoutingError::NotLoaded)?;
        let filter =
            OwnershipFilter::with_limits(view, local_shard, pending_incoming, &self.config.limits)?;
        Ok(filter)
    }

    /// Routes a document key to its owning shard.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::NotLoaded` if no table is loaded.
    pub fn route(&self, document_key: &[u8]) -> Result<ShardId, RoutingError> {
        let view = self.view().ok_or(RoutingError::NotLoaded)?;
        Ok(view.shard_for_document(document_key)?)
    }

    /// Returns the loaded table's collection version.
    #[must_use]
    pub fn collection_version(&self) -> Option<ChunkVersion> {
        self.table.as_ref().map(|table| table.collection_version())
    }

    /// Returns true if a table is loaded.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.table.is_some()
    }

    /// Returns the refresh counters.
    #[must_use]
    pub const fn stats(&self) -> RefreshStats {
        self.stats
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Returns the catalog source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }
}
