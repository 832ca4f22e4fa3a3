use crate::domains::export::types::{ExportKind, ExportRow, PageCursor};
use crate::errors::{DbError, DbResult};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;

const ROW_COLUMNS: &str = "items.id, items.url, items.title, items.text, \
     item_urls.text AS url_text, item_urls.summary, \
     analyses.keyword, analyses.text_passage, analyses.summary_passage";

const ROW_SOURCE: &str = "FROM items \
     LEFT JOIN item_urls ON items.id = item_urls.item_id \
     LEFT JOIN analyses ON items.id = analyses.item_id";

/// Row fetcher used by the exporter
#[async_trait]
pub trait ExportRepository: Send + Sync {
    /// Number of rows matching the kind's filter
    async fn count_rows(&self, kind: ExportKind) -> DbResult<i64>;

    /// Up to `limit` matching rows at `cursor`, ordered by id descending
    async fn fetch_page(
        &self,
        kind: ExportKind,
        cursor: PageCursor,
        limit: usize,
    ) -> DbResult<Vec<ExportRow>>;
}

/// Postgres implementation over a single connection
pub struct PgExportRepository {
    pool: PgPool,
}

impl PgExportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open the one connection the export runs on
    pub async fn connect(database_url: &str) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Close the connection. Dropping the repository also releases it.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ExportRepository for PgExportRepository {
    async fn count_rows(&self, kind: ExportKind) -> DbResult<i64> {
        let total = count_query(kind)
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn fetch_page(
        &self,
        kind: ExportKind,
        cursor: PageCursor,
        limit: usize,
    ) -> DbResult<Vec<ExportRow>> {
        let rows = page_query(kind, cursor, limit)
            .build_query_as::<ExportRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

fn count_query(kind: ExportKind) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT count(*) ");
    query.push(ROW_SOURCE);
    query.push(" WHERE ");
    query.push(kind.filter_predicate());
    query
}

fn page_query(kind: ExportKind, cursor: PageCursor, limit: usize) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT ");
    query.push(ROW_COLUMNS);
    query.push(" ");
    query.push(ROW_SOURCE);
    query.push(" WHERE ");
    query.push(kind.filter_predicate());

    if let PageCursor::Before(id) = cursor {
        query.push(" AND items.id < ");
        query.push_bind(id);
    }

    query.push(" ORDER BY items.id DESC LIMIT ");
    query.push_bind(limit as i64);

    if let PageCursor::Offset(offset) = cursor {
        query.push(" OFFSET ");
        query.push_bind(offset);
    }
    query
}

/// In-memory repository for exporter tests
#[cfg(test)]
pub struct InMemoryExportRepository {
    rows: std::sync::Mutex<Vec<ExportRow>>,
    // inserted right after the first page is served
    late_rows: std::sync::Mutex<Vec<ExportRow>>,
    apply_filter: bool,
    fetches: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl InMemoryExportRepository {
    pub fn new(rows: Vec<ExportRow>) -> Self {
        Self {
            rows: std::sync::Mutex::new(rows),
            late_rows: std::sync::Mutex::new(Vec::new()),
            apply_filter: true,
            fetches: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_late_rows(self, late_rows: Vec<ExportRow>) -> Self {
        *self.late_rows.lock().unwrap() = late_rows;
        self
    }

    /// Serve every row, as a source whose predicate disagrees with `ExportKind::matches` would
    pub fn without_filter(mut self) -> Self {
        self.apply_filter = false;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn matching(&self, kind: ExportKind) -> Vec<ExportRow> {
        let mut rows: Vec<ExportRow> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| !self.apply_filter || kind.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows
    }
}

#[cfg(test)]
#[async_trait]
impl ExportRepository for InMemoryExportRepository {
    async fn count_rows(&self, kind: ExportKind) -> DbResult<i64> {
        Ok(self.matching(kind).len() as i64)
    }

    async fn fetch_page(
        &self,
        kind: ExportKind,
        cursor: PageCursor,
        limit: usize,
    ) -> DbResult<Vec<ExportRow>> {
        let rows = self.matching(kind);
        let page: Vec<ExportRow> = match cursor {
            PageCursor::Start => rows.into_iter().take(limit).collect(),
            PageCursor::Offset(offset) => rows.into_iter().skip(offset as usize).take(limit).collect(),
            PageCursor::Before(id) => rows.into_iter().filter(|r| r.id < id).take(limit).collect(),
        };

        if self.fetches.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            let late: Vec<ExportRow> = self.late_rows.lock().unwrap().drain(..).collect();
            self.rows.lock().unwrap().extend(late);
        }
        Ok(page)
    }
}
