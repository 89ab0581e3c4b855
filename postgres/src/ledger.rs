//! Rejection ledger in `rejected_intents`.
//!
//! One row per `(kind, correlation_id)`; later rejections of a redelivered
//! intent are ignored by `ON CONFLICT DO NOTHING`.

use crate::PostgresStore;
use crate::error::classify;
use marquee_core::correlation::CorrelationId;
use marquee_core::record::EntityKind;
use marquee_core::store::{
    RejectionLedger, RejectionReason, RejectionRecord, StoreError, StoreFuture,
};
use marquee_core::validator::FieldErrors;
use marquee_runtime::metrics::record_ledger_rejection;
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;

fn rejection_from_row(
    kind: EntityKind,
    correlation_id: CorrelationId,
    row: &PgRow,
) -> Result<RejectionRecord, StoreError> {
    let reason: String = row.try_get("reason").map_err(classify)?;
    let Json(fields): Json<FieldErrors> = row.try_get("fields").map_err(classify)?;
    Ok(RejectionRecord {
        kind,
        correlation_id,
        reason: reason.parse::<RejectionReason>().map_err(StoreError::Backend)?,
        fields,
        rejected_at: row.try_get("rejected_at").map_err(classify)?,
    })
}

impl RejectionLedger for PostgresStore {
    fn record_rejection<'a>(&'a self, rejection: &'a RejectionRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO rejected_intents (kind, correlation_id, reason, fields, rejected_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (kind, correlation_id) DO NOTHING",
            )
            .bind(rejection.kind.as_str())
            .bind(rejection.correlation_id.as_uuid())
            .bind(rejection.reason.as_str())
            .bind(Json(&rejection.fields))
            .bind(rejection.rejected_at)
            .execute(&self.pool)
            .await
            .map_err(classify)?;

            if result.rows_affected() > 0 {
                record_ledger_rejection(rejection.kind.as_str(), rejection.reason.as_str());
            }
            Ok(())
        })
    }

    fn find_rejection(
        &self,
        kind: EntityKind,
        correlation_id: CorrelationId,
    ) -> StoreFuture<'_, Option<RejectionRecord>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT reason, fields, rejected_at FROM rejected_intents \
                 WHERE kind = $1 AND correlation_id = $2",
            )
            .bind(kind.as_str())
            .bind(correlation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

            row.map(|row| rejection_from_row(kind, correlation_id, &row))
                .transpose()
        })
    }
}
