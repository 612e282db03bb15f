//! Postgres-backed ledger store.
//!
//! Entity tables (`shipments`, `suppliers`, `electricity_bills`) and the
//! `carbon_ledger` table are written in one transaction per commit. Reports
//! live in `reports` and are insert-only.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Query` |
//! | Database (check constraint violation) | `23514` | `Query` |
//! | Database (other) | Any other | `Query` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Unavailable` |
//! | ColumnDecode / Decode | N/A | `Corrupt` |
//! | Other | N/A | `Query` |
//!
//! ## Sync access
//!
//! The sync trait impls run the async operations on the runtime handle given
//! at construction. Call them from worker threads (or `spawn_blocking`), never
//! from a task already running on that runtime.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{Span, instrument};

use carbonledger_analytics::{AnalyticsError, LedgerReader, LedgerSnapshot, ReportArtifact};
use carbonledger_core::{DateWindow, ReportId};
use carbonledger_emissions::{
    ActivityType, Category, ElectricityBillState, FactorRef, LedgerLine, LedgerLineId, Method,
    Scope, ShipmentState, SupplierState,
};

use super::ledger_store::{AsyncLedgerStore, CommitBatch, LedgerStore, ReportStore, StoreError};

const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS shipments (
        shipment_id TEXT PRIMARY KEY,
        event_time TIMESTAMPTZ NOT NULL,
        period_date DATE NOT NULL,
        origin_city TEXT NOT NULL,
        origin_state TEXT NOT NULL,
        destination_city TEXT NOT NULL,
        destination_state TEXT NOT NULL,
        mode TEXT NOT NULL,
        lane_id TEXT NOT NULL,
        distance_km DOUBLE PRECISION,
        weight_tons DOUBLE PRECISION,
        sku TEXT,
        quantity DOUBLE PRECISION,
        supplier_id TEXT,
        facility_id TEXT,
        urgent_flag BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS suppliers (
        supplier_id TEXT PRIMARY KEY,
        supplier_name TEXT NOT NULL,
        region TEXT NOT NULL,
        state TEXT NOT NULL,
        emissions_intensity_kgco2e_per_unit DOUBLE PRECISION,
        intensity_version TEXT,
        last_updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS electricity_bills (
        bill_id TEXT PRIMARY KEY,
        event_time TIMESTAMPTZ NOT NULL,
        period_date DATE NOT NULL,
        facility_id TEXT NOT NULL,
        state TEXT NOT NULL,
        kwh DOUBLE PRECISION
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS carbon_ledger (
        ledger_id TEXT PRIMARY KEY,
        activity_id TEXT NOT NULL,
        activity_type TEXT NOT NULL,
        scope SMALLINT NOT NULL CHECK (scope BETWEEN 1 AND 3),
        category TEXT NOT NULL,
        kg_co2e DOUBLE PRECISION NOT NULL CHECK (kg_co2e >= 0),
        method TEXT NOT NULL,
        confidence DOUBLE PRECISION NOT NULL CHECK (confidence BETWEEN 0 AND 1),
        factor_key TEXT,
        factor_version TEXT,
        lineage JSONB NOT NULL,
        assumptions JSONB NOT NULL,
        computed_at TIMESTAMPTZ NOT NULL,
        period_date DATE NOT NULL,
        supplier_id TEXT,
        lane_id TEXT,
        sku TEXT,
        facility_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS carbon_ledger_period_idx ON carbon_ledger (period_date)",
    r#"
    CREATE TABLE IF NOT EXISTS reports (
        report_id UUID PRIMARY KEY,
        period_from DATE NOT NULL,
        period_to DATE NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        narrative_md TEXT NOT NULL,
        annexure JSONB NOT NULL,
        lineage JSONB NOT NULL,
        assumptions JSONB NOT NULL
    )
    "#,
];

/// Postgres-backed ledger, entity and report store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    handle: Handle,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
        }
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, report), fields(report_id = %report.report_id), err)]
    pub async fn insert_report_async(&self, report: &ReportArtifact) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reports
                (report_id, period_from, period_to, created_at, narrative_md, annexure, lineage, assumptions)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(report.report_id.as_uuid())
        .bind(report.period_from)
        .bind(report.period_to)
        .bind(report.created_at)
        .bind(&report.narrative_md)
        .bind(Json(&report.annexure))
        .bind(Json(&report.lineage))
        .bind(Json(&report.assumptions))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_report", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(report_id = %report_id), err)]
    pub async fn get_report_async(&self, report_id: ReportId) -> Result<Option<ReportArtifact>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT report_id, period_from, period_to, created_at, narrative_md, annexure, lineage, assumptions
            FROM reports
            WHERE report_id = $1
            "#,
        )
        .bind(report_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_report", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let annexure: Json<_> = get(&row, "annexure")?;
        let lineage: Json<_> = get(&row, "lineage")?;
        let assumptions: Json<_> = get(&row, "assumptions")?;
        Ok(Some(ReportArtifact {
            report_id: ReportId::from_uuid(get(&row, "report_id")?),
            period_from: get(&row, "period_from")?,
            period_to: get(&row, "period_to")?,
            created_at: get(&row, "created_at")?,
            narrative_md: get(&row, "narrative_md")?,
            annexure: annexure.0,
            lineage: lineage.0,
            assumptions: assumptions.0,
        }))
    }

    fn block_on<T>(&self, fut: impl std::future::Future<Output = T>) -> T {
        self.handle.block_on(fut)
    }
}

async fn upsert_shipment(tx: &mut Transaction<'_, Postgres>, s: &ShipmentState) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO shipments (
            shipment_id, event_time, period_date, origin_city, origin_state, destination_city,
            destination_state, mode, lane_id, distance_km, weight_tons, sku, quantity,
            supplier_id, facility_id, urgent_flag
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (shipment_id) DO UPDATE SET
            event_time = EXCLUDED.event_time,
            period_date = EXCLUDED.period_date,
            origin_city = EXCLUDED.origin_city,
            origin_state = EXCLUDED.origin_state,
            destination_city = EXCLUDED.destination_city,
            destination_state = EXCLUDED.destination_state,
            mode = EXCLUDED.mode,
            lane_id = EXCLUDED.lane_id,
            distance_km = EXCLUDED.distance_km,
            weight_tons = EXCLUDED.weight_tons,
            sku = EXCLUDED.sku,
            quantity = EXCLUDED.quantity,
            supplier_id = EXCLUDED.supplier_id,
            facility_id = EXCLUDED.facility_id,
            urgent_flag = EXCLUDED.urgent_flag
        "#,
    )
    .bind(&s.shipment_id)
    .bind(s.event_time)
    .bind(s.period_date)
    .bind(&s.origin_city)
    .bind(&s.origin_state)
    .bind(&s.destination_city)
    .bind(&s.destination_state)
    .bind(&s.mode)
    .bind(&s.lane_id)
    .bind(s.distance_km)
    .bind(s.weight_tons)
    .bind(&s.sku)
    .bind(s.quantity)
    .bind(&s.supplier_id)
    .bind(&s.facility_id)
    .bind(s.urgent_flag)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_supplier(tx: &mut Transaction<'_, Postgres>, s: &SupplierState) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO suppliers (
            supplier_id, supplier_name, region, state,
            emissions_intensity_kgco2e_per_unit, intensity_version, last_updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (supplier_id) DO UPDATE SET
            supplier_name = EXCLUDED.supplier_name,
            region = EXCLUDED.region,
            state = EXCLUDED.state,
            emissions_intensity_kgco2e_per_unit = EXCLUDED.emissions_intensity_kgco2e_per_unit,
            intensity_version = EXCLUDED.intensity_version,
            last_updated_at = EXCLUDED.last_updated_at
        "#,
    )
    .bind(&s.supplier_id)
    .bind(&s.supplier_name)
    .bind(&s.region)
    .bind(&s.state)
    .bind(s.emissions_intensity_kgco2e_per_unit)
    .bind(&s.intensity_version)
    .bind(s.last_updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_bill(tx: &mut Transaction<'_, Postgres>, b: &ElectricityBillState) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO electricity_bills (bill_id, event_time, period_date, facility_id, state, kwh)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (bill_id) DO UPDATE SET
            event_time = EXCLUDED.event_time,
            period_date = EXCLUDED.period_date,
            facility_id = EXCLUDED.facility_id,
            state = EXCLUDED.state,
            kwh = EXCLUDED.kwh
        "#,
    )
    .bind(&b.bill_id)
    .bind(b.event_time)
    .bind(b.period_date)
    .bind(&b.facility_id)
    .bind(&b.state)
    .bind(b.kwh)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Upsert one line. The `WHERE` clause skips rows whose content is unchanged,
/// which leaves their `computed_at` untouched.
async fn upsert_line(tx: &mut Transaction<'_, Postgres>, l: &LedgerLine) -> Result<(), sqlx::Error> {
    let (factor_key, factor_version) = match &l.factor_ref {
        Some(r) => (Some(r.factor_key.as_str()), Some(r.factor_version.as_str())),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO carbon_ledger (
            ledger_id, activity_id, activity_type, scope, category, kg_co2e, method, confidence,
            factor_key, factor_version, lineage, assumptions, computed_at, period_date,
            supplier_id, lane_id, sku, facility_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT (ledger_id) DO UPDATE SET
            activity_id = EXCLUDED.activity_id,
            activity_type = EXCLUDED.activity_type,
            scope = EXCLUDED.scope,
            category = EXCLUDED.category,
            kg_co2e = EXCLUDED.kg_co2e,
            method = EXCLUDED.method,
            confidence = EXCLUDED.confidence,
            factor_key = EXCLUDED.factor_key,
            factor_version = EXCLUDED.factor_version,
            lineage = EXCLUDED.lineage,
            assumptions = EXCLUDED.assumptions,
            computed_at = EXCLUDED.computed_at,
            period_date = EXCLUDED.period_date,
            supplier_id = EXCLUDED.supplier_id,
            lane_id = EXCLUDED.lane_id,
            sku = EXCLUDED.sku,
            facility_id = EXCLUDED.facility_id
        WHERE (
            carbon_ledger.activity_id, carbon_ledger.activity_type, carbon_ledger.scope,
            carbon_ledger.category, carbon_ledger.kg_co2e, carbon_ledger.method,
            carbon_ledger.confidence, carbon_ledger.factor_key, carbon_ledger.factor_version,
            carbon_ledger.lineage, carbon_ledger.assumptions, carbon_ledger.period_date,
            carbon_ledger.supplier_id, carbon_ledger.lane_id, carbon_ledger.sku,
            carbon_ledger.facility_id
        ) IS DISTINCT FROM (
            EXCLUDED.activity_id, EXCLUDED.activity_type, EXCLUDED.scope,
            EXCLUDED.category, EXCLUDED.kg_co2e, EXCLUDED.method,
            EXCLUDED.confidence, EXCLUDED.factor_key, EXCLUDED.factor_version,
            EXCLUDED.lineage, EXCLUDED.assumptions, EXCLUDED.period_date,
            EXCLUDED.supplier_id, EXCLUDED.lane_id, EXCLUDED.sku,
            EXCLUDED.facility_id
        )
        "#,
    )
    .bind(l.ledger_id.as_str())
    .bind(&l.activity_id)
    .bind(l.activity_type.as_str())
    .bind(i16::from(l.scope.as_u8()))
    .bind(l.category.as_str())
    .bind(l.kg_co2e)
    .bind(l.method.as_str())
    .bind(l.confidence)
    .bind(factor_key)
    .bind(factor_version)
    .bind(Json(&l.lineage))
    .bind(Json(&l.assumptions))
    .bind(l.computed_at)
    .bind(l.period_date)
    .bind(&l.supplier_id)
    .bind(&l.lane_id)
    .bind(&l.sku)
    .bind(&l.facility_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("column {column}: {e}")))
}

fn parse<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = get(row, column)?;
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("column {column}: {e}")))
}

fn line_from_row(row: &PgRow) -> Result<LedgerLine, StoreError> {
    let scope: i16 = get(row, "scope")?;
    let scope = u8::try_from(scope)
        .ok()
        .and_then(|s| Scope::try_from(s).ok())
        .ok_or_else(|| StoreError::Corrupt(format!("column scope: {scope}")))?;

    let factor_key: Option<String> = get(row, "factor_key")?;
    let factor_version: Option<String> = get(row, "factor_version")?;
    let factor_ref = match (factor_key, factor_version) {
        (Some(factor_key), Some(factor_version)) => Some(FactorRef {
            factor_key,
            factor_version,
        }),
        _ => None,
    };
    let lineage: Json<_> = get(row, "lineage")?;
    let assumptions: Json<_> = get(row, "assumptions")?;

    Ok(LedgerLine {
        ledger_id: LedgerLineId::from(get::<String>(row, "ledger_id")?),
        activity_id: get(row, "activity_id")?,
        activity_type: parse::<ActivityType>(row, "activity_type")?,
        scope,
        category: parse::<Category>(row, "category")?,
        kg_co2e: get(row, "kg_co2e")?,
        method: parse::<Method>(row, "method")?,
        confidence: get(row, "confidence")?,
        factor_ref,
        lineage: lineage.0,
        assumptions: assumptions.0,
        computed_at: get(row, "computed_at")?,
        period_date: get(row, "period_date")?,
        supplier_id: get(row, "supplier_id")?,
        lane_id: get(row, "lane_id")?,
        sku: get(row, "sku")?,
        facility_id: get(row, "facility_id")?,
    })
}

fn shipment_from_row(row: &PgRow) -> Result<ShipmentState, StoreError> {
    Ok(ShipmentState {
        shipment_id: get(row, "shipment_id")?,
        event_time: get(row, "event_time")?,
        period_date: get(row, "period_date")?,
        origin_city: get(row, "origin_city")?,
        origin_state: get(row, "origin_state")?,
        destination_city: get(row, "destination_city")?,
        destination_state: get(row, "destination_state")?,
        mode: get(row, "mode")?,
        lane_id: get(row, "lane_id")?,
        distance_km: get(row, "distance_km")?,
        weight_tons: get(row, "weight_tons")?,
        sku: get(row, "sku")?,
        quantity: get(row, "quantity")?,
        supplier_id: get(row, "supplier_id")?,
        facility_id: get(row, "facility_id")?,
        urgent_flag: get(row, "urgent_flag")?,
    })
}

#[async_trait::async_trait]
impl AsyncLedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, batch),
        fields(
            shipments = batch.shipments.len(),
            suppliers = batch.suppliers.len(),
            bills = batch.bills.len(),
            lines = batch.lines.len(),
            operation = tracing::field::Empty
        ),
        err
    )]
    async fn commit_batch(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        let span = Span::current();
        span.record("operation", "commit_batch");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_commit", e))?;

        for s in &batch.shipments {
            upsert_shipment(&mut tx, s)
                .await
                .map_err(|e| map_sqlx_error("upsert_shipment", e))?;
        }
        for s in &batch.suppliers {
            upsert_supplier(&mut tx, s)
                .await
                .map_err(|e| map_sqlx_error("upsert_supplier", e))?;
        }
        for b in &batch.bills {
            upsert_bill(&mut tx, b)
                .await
                .map_err(|e| map_sqlx_error("upsert_bill", e))?;
        }
        for l in &batch.lines {
            upsert_line(&mut tx, l)
                .await
                .map_err(|e| map_sqlx_error("upsert_line", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(line_count = tracing::field::Empty), err)]
    async fn load_snapshot(&self, window: Option<DateWindow>) -> Result<LedgerSnapshot, StoreError> {
        let from: Option<NaiveDate> = window.map(|w| w.from());
        let to: Option<NaiveDate> = window.map(|w| w.to());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_snapshot", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("snapshot_isolation", e))?;

        let line_rows = sqlx::query(
            r#"
            SELECT * FROM carbon_ledger
            WHERE ($1::date IS NULL OR period_date >= $1)
              AND ($2::date IS NULL OR period_date <= $2)
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_ledger", e))?;

        let shipment_rows = sqlx::query(
            r#"
            SELECT * FROM shipments
            WHERE ($1::date IS NULL OR period_date >= $1)
              AND ($2::date IS NULL OR period_date <= $2)
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_shipments", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("end_snapshot", e))?;

        let lines = line_rows.iter().map(line_from_row).collect::<Result<Vec<_>, _>>()?;
        let shipments = shipment_rows
            .iter()
            .map(shipment_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("line_count", lines.len());
        Ok(LedgerSnapshot::new(lines, shipments))
    }

    #[instrument(skip(self), err)]
    async fn max_computed_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT MAX(computed_at) AS last_computed_at FROM carbon_ledger")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("max_computed_at", e))?;
        get(&row, "last_computed_at")
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        self.block_on(self.commit_batch(batch))
    }
}

impl LedgerReader for PostgresLedgerStore {
    fn snapshot(&self, window: Option<&DateWindow>) -> Result<LedgerSnapshot, AnalyticsError> {
        Ok(self.block_on(self.load_snapshot(window.copied()))?)
    }

    fn last_computed_at(&self) -> Result<Option<DateTime<Utc>>, AnalyticsError> {
        Ok(self.block_on(self.max_computed_at())?)
    }
}

impl ReportStore for PostgresLedgerStore {
    fn insert_report(&self, report: &ReportArtifact) -> Result<(), StoreError> {
        self.block_on(self.insert_report_async(report))
    }

    fn get_report(&self, report_id: ReportId) -> Result<Option<ReportArtifact>, StoreError> {
        self.block_on(self.get_report_async(report_id))
    }
}

/// Map SQLx errors to `StoreError`, tagging the failing operation.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Query(format!("{msg} (unique violation)")),
                Some("23514") => StoreError::Query(format!("{msg} (check violation)")),
                _ => StoreError::Query(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {}: {}", operation, e)),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        _ => StoreError::Query(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use sqlx::postgres::PgPoolOptions;
    use tracing::span;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    #[test]
    fn pool_errors_map_to_unavailable() {
        assert!(matches!(
            map_sqlx_error("commit_batch", sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("commit_batch", sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("get_report", sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }

    #[derive(Clone, Default)]
    struct RecordedFields(Arc<Mutex<Vec<(String, String)>>>);

    struct FieldVisitor<'a>(&'a mut Vec<(String, String)>);

    impl tracing::field::Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{value:?}")));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for RecordedFields {
        fn on_record(&self, _id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
            values.record(&mut FieldVisitor(&mut self.0.lock().unwrap()));
        }
    }

    #[test]
    fn commit_span_records_its_operation() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let pool = {
            let _guard = rt.enter();
            PgPoolOptions::new()
                .acquire_timeout(std::time::Duration::from_millis(200))
                .connect_lazy("postgres://nobody@127.0.0.1:1/carbon")
                .unwrap()
        };
        let store = PostgresLedgerStore::new(pool, rt.handle().clone());

        let recorded = RecordedFields::default();
        let subscriber = tracing_subscriber::registry().with(recorded.clone());
        let result = tracing::subscriber::with_default(subscriber, || {
            rt.block_on(store.commit_batch(&CommitBatch::default()))
        });

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        let fields = recorded.0.lock().unwrap();
        assert!(
            fields
                .iter()
                .any(|(name, value)| name == "operation" && value.contains("commit_batch")),
            "{fields:?}"
        );
    }
}
