//! Download/export orchestration with digest-keyed caching
//!
//! Resolves the full id set matching a filter query, then fetches
//! contributions and requested component types in content-addressed batches.
//! Each batch file is named by the digest of the exact id list it holds, so
//! repeated calls with an identical id set are served from disk without a
//! single HTTP request unless `overwrite` is requested.
//!
//! The caller's wall-clock budget is propagated across the nested fetches:
//! contribution ids first, then each component type, decrementing remaining
//! time after every sub-step and aborting further work once exhausted.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::app::client::ApiClient;
use crate::app::digest::digest_ids;
use crate::app::models::{ComponentKind, Resource};
use crate::app::paginate::resolve_values;
use crate::app::query::{split_query, Query};
use crate::app::scheduler::{Fetched, RequestScheduler, TrackedRequest};
use crate::constants::{files, progress};
use crate::errors::{ExportError, ExportResult, Result};

/// Options controlling an export run
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Target directory; defaults to the per-user export directory
    pub outdir: Option<PathBuf>,
    /// Re-fetch batches even when a cached file exists
    pub overwrite: bool,
    /// Component types to export alongside the contributions
    pub include: Vec<ComponentKind>,
    /// Hide the progress bar
    pub quiet: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            outdir: None,
            overwrite: false,
            include: ComponentKind::ALL.to_vec(),
            quiet: false,
        }
    }
}

/// Outcome of an export run
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// Batch files written or reused, in completion order
    pub files: Vec<PathBuf>,
    /// Batches served from the digest-keyed cache without a request
    pub cache_hits: usize,
    /// Records fetched per resource path
    pub records: HashMap<String, usize>,
    /// False when the wall-clock budget ran out before all work finished
    pub complete: bool,
}

/// Download/export orchestrator
pub struct Downloader {
    client: Arc<ApiClient>,
    scheduler: RequestScheduler,
}

impl Downloader {
    pub fn new(client: Arc<ApiClient>, scheduler: RequestScheduler) -> Self {
        Self { client, scheduler }
    }

    /// Export all contributions (and requested components) matching `query`
    pub async fn download(
        &self,
        query: &Query,
        options: &DownloadOptions,
    ) -> Result<DownloadReport> {
        let started = Instant::now();
        let outdir = self.resolve_outdir(options)?;
        tokio::fs::create_dir_all(&outdir)
            .await
            .map_err(|_| ExportError::DirectoryNotAccessible {
                path: outdir.clone(),
            })?;

        let mut report = DownloadReport {
            complete: true,
            ..Default::default()
        };

        // Step 1: resolve the contribution id set under the current budget
        let step = self.step_scheduler(started);
        if step.timeout().is_zero() {
            return Err(ExportError::BudgetExhausted {
                seconds: self.scheduler.timeout().as_secs(),
            }
            .into());
        }
        let contribution_ids = resolve_values(
            &self.client,
            &step,
            Resource::Contributions,
            query,
            "id",
            None,
        )
        .await?;
        if contribution_ids.is_empty() {
            info!("no contributions match the query, nothing to export");
            return Ok(report);
        }
        debug!(ids = contribution_ids.len(), "resolved contribution id set");

        // Step 2: contribution batches
        self.export_resource(
            Resource::Contributions,
            "id__in",
            &contribution_ids,
            &outdir,
            options,
            started,
            &mut report,
        )
        .await?;

        // Step 3: each requested component type, budget decremented per step
        for kind in &options.include {
            if self.step_scheduler(started).timeout().is_zero() {
                warn!(kind = %kind, "budget exhausted, skipping remaining component types");
                report.complete = false;
                break;
            }

            let mut component_query = Query::new();
            component_query.insert("contribution__in".to_string(), json!(contribution_ids));
            let component_ids = resolve_values(
                &self.client,
                &self.step_scheduler(started),
                kind.resource(),
                &component_query,
                "id",
                None,
            )
            .await?;
            if component_ids.is_empty() {
                continue;
            }

            self.export_resource(
                kind.resource(),
                "id__in",
                &component_ids,
                &outdir,
                options,
                started,
                &mut report,
            )
            .await?;
        }

        info!(
            files = report.files.len(),
            cache_hits = report.cache_hits,
            complete = report.complete,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "export finished"
        );
        Ok(report)
    }

    /// Delete all contributions matching `query`, chunking oversize filters
    pub async fn delete(&self, query: &Query) -> Result<usize> {
        let subqueries = split_query(query, Resource::Contributions.max_per_page(), None)?;

        let mut requests = Vec::with_capacity(subqueries.len());
        for (slot, sub) in subqueries.into_iter().enumerate() {
            let client = self.client.clone();
            requests.push(TrackedRequest::new(format!("delete:{}", slot), async move {
                let count = client.delete_contributions(&sub).await?;
                Ok(Fetched::new(json!({ "count": count }), count))
            }));
        }

        let outcomes = self.scheduler.run(requests, None).await;
        Ok(outcomes.values().map(|fetched| fetched.count).sum())
    }

    /// Fetch one resource's id set as digest-named gzip batch files
    #[allow(clippy::too_many_arguments)]
    async fn export_resource(
        &self,
        resource: Resource,
        id_field: &str,
        ids: &[String],
        outdir: &Path,
        options: &DownloadOptions,
        started: Instant,
        report: &mut DownloadReport,
    ) -> Result<()> {
        let mut query = Query::new();
        query.insert(id_field.to_string(), json!(ids));
        let subqueries = split_query(&query, resource.max_per_page(), None)?;

        let mut requests = Vec::new();
        for sub in subqueries {
            let chunk_ids: Vec<String> = sub
                .get(id_field)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();

            let digest = digest_ids(&chunk_ids);
            let path = outdir.join(format!(
                "{}_{}{}",
                resource.path(),
                digest,
                files::GZ_SUFFIX
            ));

            if path.exists() && !options.overwrite {
                debug!(path = %path.display(), "cache hit, skipping fetch");
                report.cache_hits += 1;
                report.files.push(path);
                continue;
            }

            let client = self.client.clone();
            let expected = chunk_ids.len();
            let track_id = format!("{}:{}", resource.path(), digest);
            requests.push(TrackedRequest::new(track_id, async move {
                let bytes = client.download_gz(resource, &sub).await?;
                let count = gz_record_count(&bytes).unwrap_or(expected);
                write_atomic(&path, &bytes).await?;
                Ok(Fetched::new(json!({ "path": path }), count))
            }));
        }

        let total = requests.len();
        if total == 0 {
            return Ok(());
        }

        let bar = self.progress_bar(ids.len(), resource.path(), options.quiet);
        let step = self.step_scheduler(started);
        let outcomes = step.run(requests, bar).await;

        if outcomes.len() < total {
            report.complete = false;
        }
        let mut fetched_records = 0;
        for fetched in outcomes.values() {
            fetched_records += fetched.count;
            if let Some(path) = fetched.value.get("path").and_then(Value::as_str) {
                report.files.push(PathBuf::from(path));
            }
        }
        *report.records.entry(resource.path().to_string()).or_insert(0) += fetched_records;

        Ok(())
    }

    /// Scheduler for the next sub-step, carrying whatever budget remains
    fn step_scheduler(&self, started: Instant) -> RequestScheduler {
        RequestScheduler::new(
            self.scheduler.max_workers(),
            self.scheduler.remaining_budget(started.elapsed()),
        )
    }

    fn resolve_outdir(&self, options: &DownloadOptions) -> Result<PathBuf> {
        if let Some(outdir) = &options.outdir {
            return Ok(outdir.clone());
        }
        let base = dirs::config_dir().ok_or_else(|| ExportError::DirectoryNotAccessible {
            path: PathBuf::from("system config directory"),
        })?;
        Ok(base.join("contribs-client").join(files::EXPORT_DIR_NAME))
    }

    fn progress_bar(&self, len: usize, message: &str, quiet: bool) -> Option<ProgressBar> {
        if quiet || len == 0 {
            return None;
        }
        let bar = ProgressBar::new(len as u64);
        bar.set_style(
            ProgressStyle::with_template(progress::BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars(progress::BAR_CHARS),
        );
        bar.set_message(message.to_string());
        Some(bar)
    }
}

/// Record count of a gzipped JSON batch, `None` when it cannot be decoded
fn gz_record_count(bytes: &[u8]) -> Option<usize> {
    let mut decoder = GzDecoder::new(bytes);
    let mut decompressed = String::new();
    decoder.read_to_string(&mut decompressed).ok()?;
    let value: Value = serde_json::from_str(&decompressed).ok()?;
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => map.get("data").and_then(Value::as_array).map(Vec::len),
        _ => None,
    }
}

/// Write bytes through a temp file and atomic rename
async fn write_atomic(path: &Path, bytes: &[u8]) -> ExportResult<()> {
    let temp_path = path.with_extension(format!("gz{}", files::TEMP_FILE_SUFFIX));
    tokio::fs::write(&temp_path, bytes).await?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|_| ExportError::AtomicOperationFailed {
            temp_path,
            final_path: path.to_path_buf(),
        })?;
    Ok(())
}
