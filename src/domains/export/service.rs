use crate::domains::export::manifest::{ManifestWriter, MANIFEST_FILE_NAME};
use crate::domains::export::payload::PayloadWriter;
use crate::domains::export::repository::ExportRepository;
use crate::domains::export::types::{ExportKind, ExportStats, PageCursor, PaginationMode};
use crate::errors::ExportResult;
use std::path::Path;
use std::time::Instant;

/// Options for one export run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub page_size: usize,
    pub pagination: PaginationMode,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            page_size: crate::config::DEFAULT_PAGE_SIZE,
            pagination: PaginationMode::default(),
        }
    }
}

/// Pages through the rows of one export kind and writes them out.
pub struct Exporter<'a, R: ExportRepository + ?Sized> {
    repo: &'a R,
    options: ExportOptions,
}

impl<'a, R: ExportRepository + ?Sized> Exporter<'a, R> {
    pub fn new(repo: &'a R, options: ExportOptions) -> Self {
        Self { repo, options }
    }

    /// Export every row matching `kind` into `output_dir`.
    ///
    /// Stops on the first empty page. Any error aborts the run; files
    /// already written stay on disk and the manifest holds every row of
    /// the pages completed so far.
    pub async fn export(&self, kind: ExportKind, output_dir: &Path) -> ExportResult<ExportStats> {
        let start_time = Instant::now();
        let page_size = self.options.page_size.max(1);
        let mut stats = ExportStats::default();

        stats.total_matching = self.repo.count_rows(kind).await?;
        log::info!("Exporting {:?}: {} matching rows", kind, stats.total_matching);

        let mut payloads = PayloadWriter::new(output_dir);
        payloads.prepare(kind.payload_dir()).await?;

        let mut manifest = match kind.manifest_columns() {
            Some(columns) => Some(ManifestWriter::create(&output_dir.join(MANIFEST_FILE_NAME), columns)?),
            None => None,
        };

        let mut cursor = PageCursor::Start;
        let mut page_index = 0usize;
        loop {
            log::info!("page_index={} cursor={:?}", page_index, cursor);
            let page = self.repo.fetch_page(kind, cursor, page_size).await?;
            if page.is_empty() {
                break;
            }

            for row in &page {
                let Some(rendered) = kind.render(row)? else {
                    log::warn!("Skipping item {}: nothing to export for {:?}", row.id, kind);
                    stats.rows_skipped += 1;
                    continue;
                };

                for payload in &rendered.payloads {
                    payloads.write(payload).await?;
                }
                if let (Some(writer), Some(record)) = (manifest.as_mut(), rendered.manifest.as_ref()) {
                    writer.append(record)?;
                }
                stats.rows_exported += 1;
            }

            if let Some(writer) = manifest.as_mut() {
                writer.flush()?;
            }
            log::info!("page_index={} rows={} exported={}", page_index, page.len(), stats.rows_exported);

            stats.pages_fetched += 1;
            cursor = cursor.advance(self.options.pagination, &page);
            page_index += 1;
        }

        if let Some(writer) = manifest {
            let path = writer.path().to_path_buf();
            let rows = writer.finish()?;
            log::info!("Manifest {} has {} rows", path.display(), rows);
        }

        stats.files_written = payloads.files_written();
        stats.bytes_written = payloads.bytes_written();
        stats.duration_ms = start_time.elapsed().as_millis() as u64;
        log::info!(
            "Export of {:?} into {} finished: {} rows, {} skipped, {} files, {} pages, {} ms",
            kind,
            payloads.root().display(),
            stats.rows_exported,
            stats.rows_skipped,
            stats.files_written,
            stats.pages_fetched,
            stats.duration_ms
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::repository::InMemoryExportRepository;
    use crate::domains::export::types::ExportRow;
    use crate::errors::ExportError;
    use std::fs;
    use tempfile::tempdir;

    fn text_row(id: i32) -> ExportRow {
        ExportRow {
            id,
            url: Some(format!("https://news.example/{}", id)),
            title: Some(format!("Item {}", id)),
            url_text: Some(format!("body of {}", id)),
            ..Default::default()
        }
    }

    fn passage_row(id: i32, text_passage: Option<&str>, summary_passage: Option<&str>) -> ExportRow {
        ExportRow {
            id,
            text: Some(format!("text of {}", id)),
            summary: Some(format!("summary of {}", id)),
            text_passage: text_passage.map(str::to_string),
            summary_passage: summary_passage.map(str::to_string),
            ..Default::default()
        }
    }

    fn options(page_size: usize, pagination: PaginationMode) -> ExportOptions {
        ExportOptions { page_size, pagination }
    }

    fn manifest_ids(dir: &Path) -> Vec<String> {
        let text = fs::read_to_string(dir.join(MANIFEST_FILE_NAME)).unwrap();
        text.lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_three_rows_page_size_two() {
        let dir = tempdir().unwrap();
        let repo = InMemoryExportRepository::new(vec![text_row(1), text_row(2), text_row(3)]);

        let stats = Exporter::new(&repo, options(2, PaginationMode::Keyset))
            .export(ExportKind::Texts, dir.path())
            .await
            .unwrap();

        assert_eq!(stats.rows_exported, 3);
        assert_eq!(stats.pages_fetched, 2);
        assert_eq!(stats.total_matching, 3);
        // [3,2], [1], then the empty page
        assert_eq!(repo.fetch_count(), 3);
        assert_eq!(manifest_ids(dir.path()), vec!["3", "2", "1"]);
        assert_eq!(
            fs::read_to_string(dir.path().join(MANIFEST_FILE_NAME)).unwrap().lines().next(),
            Some("id,url,title")
        );
        assert_eq!(fs::read_to_string(dir.path().join("texts/2.txt")).unwrap(), "body of 2");
    }

    #[tokio::test]
    async fn test_every_row_once_in_descending_order() {
        let ids: Vec<i32> = vec![2, 3, 5, 7, 11, 13, 17, 19, 23];
        for pagination in [PaginationMode::Keyset, PaginationMode::Offset] {
            for page_size in 1..=10 {
                let dir = tempdir().unwrap();
                let mut rows: Vec<ExportRow> = ids.iter().copied().map(text_row).collect();
                // a row outside the filter
                rows.push(ExportRow { id: 29, ..Default::default() });
                let repo = InMemoryExportRepository::new(rows);

                let stats = Exporter::new(&repo, options(page_size, pagination))
                    .export(ExportKind::Texts, dir.path())
                    .await
                    .unwrap();

                let expected: Vec<String> = ids.iter().rev().map(|id| id.to_string()).collect();
                assert_eq!(manifest_ids(dir.path()), expected, "page_size={} {:?}", page_size, pagination);
                assert_eq!(stats.rows_exported, ids.len());
                assert_eq!(stats.pages_fetched, (ids.len() + page_size - 1) / page_size);
            }
        }
    }

    #[tokio::test]
    async fn test_exact_multiple_terminates() {
        let dir = tempdir().unwrap();
        let repo = InMemoryExportRepository::new((1..=4).map(text_row).collect());

        let stats = Exporter::new(&repo, options(2, PaginationMode::Offset))
            .export(ExportKind::Texts, dir.path())
            .await
            .unwrap();

        assert_eq!(stats.pages_fetched, 2);
        assert_eq!(repo.fetch_count(), 3);
        assert_eq!(manifest_ids(dir.path()), vec!["4", "3", "2", "1"]);
    }

    #[tokio::test]
    async fn test_empty_source_writes_header_only() {
        let dir = tempdir().unwrap();
        let repo = InMemoryExportRepository::new(vec![]);

        let stats = Exporter::new(&repo, ExportOptions::default())
            .export(ExportKind::Summaries, dir.path())
            .await
            .unwrap();

        assert_eq!(stats.rows_exported, 0);
        assert_eq!(repo.fetch_count(), 1);
        assert_eq!(fs::read_to_string(dir.path().join(MANIFEST_FILE_NAME)).unwrap(), "id,title\r\n");
        assert!(dir.path().join("summaries").is_dir());
    }

    #[tokio::test]
    async fn test_rerun_leaves_payloads_identical() {
        let dir = tempdir().unwrap();
        let rows = vec![
            passage_row(1, Some(r#"{"anchor":["x"]}"#), None),
            passage_row(2, None, Some(r#"{"anchor":["y"]}"#)),
        ];
        let mut queries_rows = rows.clone();
        for row in &mut queries_rows {
            row.keyword = Some("kw".into());
        }
        let repo = InMemoryExportRepository::new(rows);

        let exporter = Exporter::new(&repo, options(1, PaginationMode::Keyset));
        exporter.export(ExportKind::Passages, dir.path()).await.unwrap();
        let first: Vec<Vec<u8>> = ["1.json", "2.json"]
            .iter()
            .map(|f| fs::read(dir.path().join(f)).unwrap())
            .collect();

        exporter.export(ExportKind::Passages, dir.path()).await.unwrap();
        let second: Vec<Vec<u8>> = ["1.json", "2.json"]
            .iter()
            .map(|f| fs::read(dir.path().join(f)).unwrap())
            .collect();
        assert_eq!(first, second);

        let queries_repo = InMemoryExportRepository::new(queries_rows);
        let queries_dir = tempdir().unwrap();
        let exporter = Exporter::new(&queries_repo, options(1, PaginationMode::Keyset));
        exporter.export(ExportKind::Queries, queries_dir.path()).await.unwrap();
        let before = fs::read(queries_dir.path().join("queries/passage_2.json")).unwrap();
        exporter.export(ExportKind::Queries, queries_dir.path()).await.unwrap();
        assert_eq!(fs::read(queries_dir.path().join("queries/passage_2.json")).unwrap(), before);
        // the manifest is rewritten, not appended to
        assert_eq!(manifest_ids(queries_dir.path()), vec!["2"]);
    }

    #[tokio::test]
    async fn test_merged_passages() {
        let dir = tempdir().unwrap();
        let repo = InMemoryExportRepository::new(vec![
            passage_row(8, Some(r#"{"span":[0,5]}"#), None),
            passage_row(6, None, Some(r#"{"span":[1,1]}"#)),
        ]);

        let stats = Exporter::new(&repo, ExportOptions::default())
            .export(ExportKind::Passages, dir.path())
            .await
            .unwrap();

        assert_eq!(stats.rows_exported, 2);
        assert!(!dir.path().join(MANIFEST_FILE_NAME).exists());
        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("8.json")).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"content": "text of 8", "passage": {"span": [0, 5]}}));
        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("6.json")).unwrap()).unwrap();
        assert_eq!(json["content"], "summary of 6");
    }

    #[tokio::test]
    async fn test_queries_tolerates_missing_summary() {
        let dir = tempdir().unwrap();
        let rows = vec![
            ExportRow {
                id: 3,
                summary: Some("s".into()),
                keyword: Some("k".into()),
                summary_passage: Some("{}".into()),
                ..Default::default()
            },
            ExportRow {
                id: 2,
                summary_passage: Some("{}".into()),
                ..Default::default()
            },
        ];
        let repo = InMemoryExportRepository::new(rows);

        let stats = Exporter::new(&repo, options(1, PaginationMode::Keyset))
            .export(ExportKind::Queries, dir.path())
            .await
            .unwrap();

        assert_eq!(stats.rows_exported, 2);
        assert_eq!(stats.files_written, 6);
        assert_eq!(manifest_ids(dir.path()), vec!["3", "2"]);
        assert_eq!(fs::read_to_string(dir.path().join("queries/summary_3.txt")).unwrap(), "s\n");
        assert_eq!(fs::read_to_string(dir.path().join("queries/summary_2.txt")).unwrap(), "\n");
    }

    #[tokio::test]
    async fn test_queries_output_bytes_for_non_ascii_item() {
        let dir = tempdir().unwrap();
        let repo = InMemoryExportRepository::new(vec![ExportRow {
            id: 1,
            title: Some("Café".into()),
            summary: Some("résumé".into()),
            keyword: Some("naïve".into()),
            summary_passage: Some(r#"{"anchor":["naïve"]}"#.into()),
            ..Default::default()
        }]);

        Exporter::new(&repo, ExportOptions::default())
            .export(ExportKind::Queries, dir.path())
            .await
            .unwrap();

        assert_eq!(
            fs::read(dir.path().join(MANIFEST_FILE_NAME)).unwrap(),
            "id,title\r\n1,Café\r\n".as_bytes()
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("queries/passage_1.json")).unwrap(),
            "{\n    \"anchor\": [\n        \"na\\u00efve\"\n    ]\n}"
        );
        assert_eq!(fs::read_to_string(dir.path().join("queries/keyword_1.txt")).unwrap(), "naïve\n");
    }

    #[tokio::test]
    async fn test_row_without_passages_is_skipped() {
        let dir = tempdir().unwrap();
        let repo = InMemoryExportRepository::new(vec![
            passage_row(3, Some(r#"{"span":[0,5]}"#), None),
            passage_row(2, None, None),
            passage_row(1, None, Some("[]")),
        ])
        .without_filter();

        let stats = Exporter::new(&repo, options(2, PaginationMode::Keyset))
            .export(ExportKind::Passages, dir.path())
            .await
            .unwrap();

        assert_eq!(stats.rows_exported, 2);
        assert_eq!(stats.rows_skipped, 1);
        assert!(dir.path().join("3.json").exists());
        assert!(!dir.path().join("2.json").exists());
        assert!(dir.path().join("1.json").exists());
    }

    #[tokio::test]
    async fn test_manifest_count_matches_written_rows() {
        let dir = tempdir().unwrap();
        let mut rows: Vec<ExportRow> = (1..=6).map(text_row).collect();
        rows[2].url_text = None;
        rows[4].url_text = None;
        let repo = InMemoryExportRepository::new(rows).without_filter();

        let stats = Exporter::new(&repo, options(4, PaginationMode::Keyset))
            .export(ExportKind::Texts, dir.path())
            .await
            .unwrap();

        assert_eq!(stats.rows_exported, 4);
        assert_eq!(stats.rows_skipped, 2);
        assert_eq!(manifest_ids(dir.path()), vec!["6", "4", "2", "1"]);
        assert_eq!(fs::read_dir(dir.path().join("texts")).unwrap().count(), stats.rows_exported);
    }

    #[tokio::test]
    async fn test_invalid_passage_aborts_run() {
        let dir = tempdir().unwrap();
        let repo = InMemoryExportRepository::new(vec![
            passage_row(5, Some(r#"{"ok":true}"#), None),
            passage_row(4, Some("{broken"), None),
            passage_row(3, Some(r#"{"ok":true}"#), None),
            passage_row(2, Some(r#"{"ok":true}"#), None),
        ]);

        let err = Exporter::new(&repo, options(2, PaginationMode::Keyset))
            .export(ExportKind::Passages, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::InvalidPassage { id: 4, .. }));
        assert!(dir.path().join("5.json").exists());
        assert!(!dir.path().join("4.json").exists());
        assert!(!dir.path().join("3.json").exists());
        assert!(!dir.path().join("2.json").exists());
        assert_eq!(repo.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_keyset_survives_insert_between_pages() {
        let dir = tempdir().unwrap();
        let repo = InMemoryExportRepository::new((1..=5).map(text_row).collect())
            .with_late_rows(vec![text_row(6)]);

        Exporter::new(&repo, options(2, PaginationMode::Keyset))
            .export(ExportKind::Texts, dir.path())
            .await
            .unwrap();

        assert_eq!(manifest_ids(dir.path()), vec!["5", "4", "3", "2", "1"]);
    }

    #[tokio::test]
    async fn test_offset_duplicates_on_insert_between_pages() {
        let dir = tempdir().unwrap();
        let repo = InMemoryExportRepository::new((1..=5).map(text_row).collect())
            .with_late_rows(vec![text_row(6)]);

        Exporter::new(&repo, options(2, PaginationMode::Offset))
            .export(ExportKind::Texts, dir.path())
            .await
            .unwrap();

        // 6 lands in front of the offset window and pushes 4 into the next page
        assert_eq!(manifest_ids(dir.path()), vec!["5", "4", "4", "3", "2", "1"]);
    }

    #[tokio::test]
    async fn test_unwritable_output_dir_aborts() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        fs::write(&blocker, "not a directory").unwrap();
        let repo = InMemoryExportRepository::new(vec![text_row(1)]);

        let err = Exporter::new(&repo, ExportOptions::default())
            .export(ExportKind::Texts, &blocker)
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Io { .. }));
    }
}
