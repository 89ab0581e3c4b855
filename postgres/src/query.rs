//! Shared row mapping and the paginated list query.
//!
//! Filters are pushed as bound parameters. The only text spliced into SQL is
//! the table name, the column list and the sort column, all `&'static str`
//! from this crate or from an entity's sort allow-list.

use crate::error::classify;
use marquee_core::correlation::CorrelationId;
use marquee_core::filters::{Filters, Metadata, Page};
use marquee_core::record::VersionedRecord;
use marquee_core::store::StoreError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

/// Read the shared persistence columns.
pub(crate) fn record_from_row(row: &PgRow) -> Result<VersionedRecord, sqlx::Error> {
    Ok(VersionedRecord {
        id: row.try_get("id")?,
        correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// A filtered listing over one table.
pub(crate) struct ListQuery<'f, F> {
    pub table: &'static str,
    pub columns: &'static str,
    pub push_filters: F,
    pub filters: &'f Filters,
}

impl<F> ListQuery<'_, F>
where
    F: Fn(&mut QueryBuilder<'static, Postgres>),
{
    fn base(&self, select: &str) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {select} FROM {} WHERE deleted_at IS NULL",
            self.table
        ));
        (self.push_filters)(&mut builder);
        builder
    }

    /// Count the filtered set, then fetch the requested page of it.
    pub(crate) async fn fetch<E>(
        &self,
        pool: &PgPool,
        map: fn(&PgRow) -> Result<E, sqlx::Error>,
    ) -> Result<Page<E>, StoreError> {
        let total: i64 = self
            .base("COUNT(*)")
            .build_query_scalar()
            .fetch_one(pool)
            .await
            .map_err(classify)?;
        let total = u64::try_from(total).unwrap_or_default();
        let metadata = Metadata::calculate(total, self.filters.page, self.filters.page_size);
        if total == 0 {
            return Ok(Page {
                items: Vec::new(),
                metadata,
            });
        }

        let sort = self.filters.sort;
        let mut select = self.base(self.columns);
        select.push(format!(
            " ORDER BY {} {}",
            sort.column(),
            sort.direction().as_sql()
        ));
        if sort.column() != "id" {
            select.push(", id ASC");
        }
        select
            .push(" LIMIT ")
            .push_bind(i64::from(self.filters.limit()))
            .push(" OFFSET ")
            .push_bind(i64::try_from(self.filters.offset()).unwrap_or(i64::MAX));

        let rows = select.build().fetch_all(pool).await.map_err(classify)?;
        let items = rows
            .iter()
            .map(map)
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;
        Ok(Page { items, metadata })
    }
}

/// Whole-word match of `terms` against `column`, as the `simple` text search
/// configuration tokenises it.
pub(crate) fn push_text_match(
    builder: &mut QueryBuilder<'static, Postgres>,
    column: &'static str,
    terms: &str,
) {
    builder
        .push(format!(
            " AND to_tsvector('simple', {column}) @@ plainto_tsquery('simple', "
        ))
        .push_bind(terms.to_owned())
        .push(")");
}
