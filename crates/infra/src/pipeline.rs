//! Ingest → resolve → compile → persist.
//!
//! The pipeline owns the latest-state resolver. Events are folded in as they
//! arrive; [`LedgerPipeline::commit`] turns the keys that changed since the
//! last commit into one [`CommitBatch`] and hands it to the store adapter.
//! Keys that only reached the fallback log stay pending and ride along with
//! every later commit until the primary store accepts them.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use carbonledger_emissions::{FactorReference, FactorTable, LedgerCompiler};
use carbonledger_events::{ActivityEnvelope, EntityKind, Projection};

use crate::fallback::FallbackSink;
use crate::projections::{EntityRef, LatestStateProjection};
use crate::read_model::{CommitBatch, LedgerStore};
use crate::store_adapter::{LedgerStoreAdapter, WriteOutcome};

/// What one commit did.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReport {
    pub entities: usize,
    pub lines: usize,
    pub factor_reload: bool,
    pub outcome: WriteOutcome,
}

pub struct LedgerPipeline<S, F> {
    resolver: LatestStateProjection,
    factors: Arc<FactorReference>,
    compiled_with: Option<Arc<FactorTable>>,
    /// Exported to the fallback log but not yet in the primary store.
    exported: BTreeSet<EntityRef>,
    adapter: LedgerStoreAdapter<S, F>,
}

impl<S, F> LedgerPipeline<S, F>
where
    S: LedgerStore,
    F: FallbackSink,
{
    pub fn new(factors: Arc<FactorReference>, adapter: LedgerStoreAdapter<S, F>) -> Self {
        Self {
            resolver: LatestStateProjection::new(),
            factors,
            compiled_with: None,
            exported: BTreeSet::new(),
            adapter,
        }
    }

    pub fn resolver(&self) -> &LatestStateProjection {
        &self.resolver
    }

    pub fn adapter(&self) -> &LedgerStoreAdapter<S, F> {
        &self.adapter
    }

    /// Number of keys waiting for the primary store after a fallback export.
    pub fn pending_exports(&self) -> usize {
        self.exported.len()
    }

    /// Fold one event into the resolver. Returns `true` if it changed state.
    pub fn ingest(&mut self, envelope: &ActivityEnvelope) -> bool {
        self.resolver.apply(envelope)
    }

    fn factors_swapped(&self, current: &Arc<FactorTable>) -> bool {
        self.compiled_with
            .as_ref()
            .is_some_and(|prev| !Arc::ptr_eq(prev, current))
    }

    /// Compile and persist everything that changed since the previous commit.
    ///
    /// Returns `None` when there was nothing to write. Keys exported to the
    /// fallback log are re-sent with each later commit, but appended to the
    /// log only once. When neither the store nor the fallback log accepted
    /// the batch, the fresh keys are put back so the next commit retries them.
    pub fn commit(&mut self, computed_at: DateTime<Utc>) -> Option<CommitReport> {
        let table = self.factors.snapshot();
        let factor_reload = self.factors_swapped(&table);

        let mut fresh = self.resolver.take_dirty();
        if factor_reload {
            info!(factor_count = table.len(), "factor reference changed; recompiling all shipments");
            fresh.extend(
                self.resolver
                    .shipment_ids()
                    .into_iter()
                    .map(|id| EntityRef::new(EntityKind::Shipment, id)),
            );
        }
        self.compiled_with = Some(table.clone());

        let dirty: BTreeSet<EntityRef> = fresh.union(&self.exported).cloned().collect();
        if dirty.is_empty() {
            return None;
        }
        if !self.exported.is_empty() {
            info!(pending = self.exported.len(), "re-sending keys exported during outage");
        }

        let compiler = LedgerCompiler::new(table);
        let batch = self.build_batch(&dirty, compiler.clone(), computed_at);
        let outcome = self
            .adapter
            .write_with_fallback(&batch, || self.build_batch(&fresh, compiler, computed_at));

        match &outcome {
            WriteOutcome::Persisted { .. } => {
                if !self.exported.is_empty() {
                    info!(entities = self.exported.len(), "fallback exports reached the primary store");
                }
                self.exported.clear();
            }
            WriteOutcome::FallbackExported { .. } => {
                self.exported.extend(fresh);
            }
            WriteOutcome::Unpersisted { .. } => {
                warn!(entities = fresh.len(), "commit not persisted; keys re-queued");
                self.resolver.requeue(fresh);
            }
        }
        debug!(
            entities = dirty.len(),
            lines = batch.lines.len(),
            persisted = outcome.is_persisted(),
            pending = self.exported.len(),
            "ledger commit"
        );

        Some(CommitReport {
            entities: dirty.len(),
            lines: batch.lines.len(),
            factor_reload,
            outcome,
        })
    }

    fn build_batch(
        &self,
        dirty: &BTreeSet<EntityRef>,
        compiler: LedgerCompiler,
        computed_at: DateTime<Utc>,
    ) -> CommitBatch {
        let mut batch = CommitBatch::default();
        let mut shipments: BTreeSet<String> = BTreeSet::new();

        for r in dirty {
            match r.kind {
                EntityKind::Shipment => {
                    shipments.insert(r.key.clone());
                }
                EntityKind::Supplier => {
                    if let Some(supplier) = self.resolver.supplier(&r.key) {
                        batch.suppliers.push(supplier);
                    }
                    shipments.extend(self.resolver.shipments_for_supplier(&r.key));
                }
                EntityKind::ElectricityBill => {
                    if let Some(bill) = self.resolver.bill(&r.key) {
                        batch.lines.push(compiler.compile_bill(&bill, computed_at));
                        batch.bills.push(bill);
                    }
                }
            }
        }

        for id in &shipments {
            let Some(shipment) = self.resolver.shipment(id) else {
                continue;
            };
            let supplier = shipment
                .supplier_id
                .as_deref()
                .and_then(|sid| self.resolver.supplier(sid));
            batch
                .lines
                .extend(compiler.compile_shipment(&shipment, supplier.as_ref(), computed_at));
            batch.shipments.push(shipment);
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use carbonledger_core::parse_event_time;
    use carbonledger_emissions::{EmissionFactor, Method};
    use carbonledger_events::{ActivityEvent, ElectricityBillRecord};

    use crate::fallback::JsonlFallbackLog;
    use crate::read_model::InMemoryLedgerStore;
    use crate::store_adapter::RetryPolicy;

    fn road(value: f64, version: &str) -> FactorTable {
        FactorTable::from_factors([EmissionFactor {
            factor_key: "road_diesel".to_string(),
            factor_version: version.to_string(),
            scope: 3,
            category: "transport".to_string(),
            mode: "road".to_string(),
            unit: "kgCO2e/ton-km".to_string(),
            ef_value: value,
            source: "test".to_string(),
        }])
        .unwrap()
    }

    fn bill(id: &str, event_time: &str, kwh: f64) -> ActivityEnvelope {
        let record = ElectricityBillRecord {
            bill_id: id.to_string(),
            event_time: event_time.to_string(),
            period_date: carbonledger_core::parse_date("2025-01-31").unwrap(),
            facility_id: "FAC_1".to_string(),
            state: "MH".to_string(),
            kwh: Some(kwh),
        };
        ActivityEnvelope::from_activity(ActivityEvent::ElectricityBill(record), 0).unwrap()
    }

    fn pipeline(
        store: Arc<InMemoryLedgerStore>,
        dir: &std::path::Path,
    ) -> (LedgerPipeline<Arc<InMemoryLedgerStore>, JsonlFallbackLog>, Arc<FactorReference>) {
        let factors = Arc::new(FactorReference::new(road(0.1, "v1")));
        let adapter = LedgerStoreAdapter::new(
            store,
            JsonlFallbackLog::new(dir),
            RetryPolicy {
                max_attempts: 1,
                base_backoff: Duration::ZERO,
            },
        );
        (LedgerPipeline::new(factors.clone(), adapter), factors)
    }

    #[test]
    fn nothing_to_commit_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let (mut p, _) = pipeline(Arc::new(InMemoryLedgerStore::new()), dir.path());
        assert_eq!(p.commit(Utc::now()), None);
    }

    #[test]
    fn bill_commit_writes_entity_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryLedgerStore::new());
        let (mut p, _) = pipeline(store.clone(), dir.path());

        p.ingest(&bill("B1", "2025-02-01T00:00:00Z", 1000.0));
        let report = p.commit(parse_event_time("2025-02-01T00:00:05Z").unwrap()).unwrap();
        assert_eq!(report.entities, 1);
        assert_eq!(report.lines, 1);
        assert!(report.outcome.is_persisted());

        let line = store.line("electricity_bill:B1:electricity").unwrap();
        assert!((line.kg_co2e - 700.0).abs() < 1e-9);
        assert_eq!(line.method, Method::ActivityFactor);
        assert!(store.bill("B1").is_some());

        // Nothing changed since: the next commit is a no-op.
        assert_eq!(p.commit(Utc::now()), None);
    }

    #[test]
    fn factor_swap_recompiles_on_next_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryLedgerStore::new());
        let (mut p, factors) = pipeline(store.clone(), dir.path());
        assert_eq!(p.commit(Utc::now()), None);

        factors.replace(road(0.2, "v2"));
        // No resolved shipments yet: the swap alone has nothing to recompile.
        assert_eq!(p.commit(Utc::now()), None);
    }
}
