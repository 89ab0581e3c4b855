//! Pagination, sorting and result metadata for list queries.
//!
//! Sort keys are parsed against an explicit allow-list, so the column name that
//! reaches a storage engine is always one of the `&'static str` entries of that
//! list, never caller text.

use crate::validator::{FieldErrors, Validator};
use serde::{Deserialize, Serialize};

/// Largest accepted page number.
pub const MAX_PAGE: u32 = 10_000_000;

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default page size when the caller does not send one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending (`-` prefix).
    Desc,
}

impl SortDirection {
    /// SQL keyword for this direction.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A validated sort column and direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortKey {
    column: &'static str,
    direction: SortDirection,
}

impl SortKey {
    /// Ascending sort on `id`, the default for every entity.
    pub const ID_ASC: Self = Self {
        column: "id",
        direction: SortDirection::Asc,
    };

    /// Parse `raw` (`"year"`, `"-year"`) against an allow-list.
    ///
    /// Returns `None` if the column is not allowed.
    ///
    /// # Example
    ///
    /// ```
    /// use marquee_core::filters::{SortDirection, SortKey};
    ///
    /// let key = SortKey::parse("-year", &["id", "year"]).unwrap();
    /// assert_eq!(key.column(), "year");
    /// assert_eq!(key.direction(), SortDirection::Desc);
    /// assert!(SortKey::parse("password; DROP TABLE movies", &["id"]).is_none());
    /// ```
    #[must_use]
    pub fn parse(raw: &str, safelist: &[&'static str]) -> Option<Self> {
        let (name, direction) = match raw.strip_prefix('-') {
            Some(rest) => (rest, SortDirection::Desc),
            None => (raw, SortDirection::Asc),
        };
        safelist
            .iter()
            .find(|allowed| **allowed == name)
            .map(|column| Self {
                column,
                direction,
            })
    }

    /// The allow-listed column name.
    #[must_use]
    pub const fn column(&self) -> &'static str {
        self.column
    }

    /// The sort direction.
    #[must_use]
    pub const fn direction(&self) -> SortDirection {
        self.direction
    }
}

impl Default for SortKey {
    fn default() -> Self {
        Self::ID_ASC
    }
}

/// Page window and sort order for a list query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Filters {
    /// 1-based page number.
    pub page: u32,
    /// Rows per page.
    pub page_size: u32,
    /// Sort column and direction. Ties always break on `id ASC`.
    pub sort: SortKey,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: SortKey::ID_ASC,
        }
    }
}

impl Filters {
    /// Validate raw request values and build filters.
    ///
    /// `sort` defaults to `id` when absent.
    ///
    /// # Errors
    ///
    /// Returns field errors for out-of-range page values or a sort column
    /// outside `safelist`.
    pub fn parse(
        page: Option<u32>,
        page_size: Option<u32>,
        sort: Option<&str>,
        safelist: &[&'static str],
    ) -> Result<Self, FieldErrors> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);

        let mut v = Validator::new();
        v.check(page > 0, "page", "must be greater than zero");
        v.check(page <= MAX_PAGE, "page", "must be a maximum of 10 million");
        v.check(page_size > 0, "page_size", "must be greater than zero");
        v.check(page_size <= MAX_PAGE_SIZE, "page_size", "must be a maximum of 100");

        let sort = match sort {
            None | Some("") => Some(SortKey::ID_ASC),
            Some(raw) => SortKey::parse(raw, safelist),
        };
        v.check(sort.is_some(), "sort", "invalid sort value");
        v.finish()?;

        Ok(Self {
            page,
            page_size,
            sort: sort.unwrap_or_default(),
        })
    }

    /// Maximum rows to return.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.page_size
    }

    /// Rows to skip before the page starts.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.page_size as u64
    }
}

/// Derived paging information, recomputed on every query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// The requested page.
    pub current_page: u32,
    /// The requested page size.
    pub page_size: u32,
    /// Always 1 when there are results.
    pub first_page: u32,
    /// Number of the last non-empty page.
    pub last_page: u32,
    /// Rows matching the filters before pagination.
    pub total_records: u64,
}

impl Metadata {
    /// Compute metadata from a total count. All-zero when nothing matched.
    ///
    /// ```
    /// use marquee_core::filters::Metadata;
    ///
    /// let meta = Metadata::calculate(15, 2, 10);
    /// assert_eq!(meta.last_page, 2);
    /// assert_eq!(meta.total_records, 15);
    /// ```
    #[must_use]
    pub fn calculate(total_records: u64, page: u32, page_size: u32) -> Self {
        if total_records == 0 || page_size == 0 {
            return Self::default();
        }
        let last_page = total_records.div_ceil(u64::from(page_size));
        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
            total_records,
        }
    }
}

/// One page of results plus its metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows in this page.
    pub items: Vec<T>,
    /// Paging information.
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAFELIST: &[&str] = &["id", "title", "year", "runtime"];

    #[test]
    fn parse_defaults() {
        let filters = Filters::parse(None, None, None, SAFELIST).unwrap();
        assert_eq!(filters, Filters::default());
        assert_eq!(filters.offset(), 0);
    }

    #[test]
    fn parse_rejects_unknown_sort_and_bad_pages() {
        let errors = Filters::parse(Some(0), Some(101), Some("-budget"), SAFELIST).unwrap_err();
        assert_eq!(errors.get("page"), Some("must be greater than zero"));
        assert_eq!(errors.get("page_size"), Some("must be a maximum of 100"));
        assert_eq!(errors.get("sort"), Some("invalid sort value"));
    }

    #[test]
    fn descending_sort_key() {
        let filters = Filters::parse(Some(3), Some(10), Some("-runtime"), SAFELIST).unwrap();
        assert_eq!(filters.sort.column(), "runtime");
        assert_eq!(filters.sort.direction(), SortDirection::Desc);
        assert_eq!(filters.offset(), 20);
    }

    #[test]
    fn metadata_for_empty_result_is_zeroed() {
        assert_eq!(Metadata::calculate(0, 4, 20), Metadata::default());
    }

    #[test]
    fn metadata_second_page_of_fifteen() {
        let meta = Metadata::calculate(15, 2, 10);
        assert_eq!(
            meta,
            Metadata {
                current_page: 2,
                page_size: 10,
                first_page: 1,
                last_page: 2,
                total_records: 15,
            }
        );
    }

    proptest! {
        #[test]
        fn last_page_covers_every_record(total in 1u64..100_000, size in 1u32..=100) {
            let meta = Metadata::calculate(total, 1, size);
            let last = u64::from(meta.last_page);
            prop_assert!(last * u64::from(size) >= total);
            prop_assert!((last - 1) * u64::from(size) < total);
        }
    }
}
