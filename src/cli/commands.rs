//! Command handlers for the contributions client CLI
//!
//! This module implements the command handlers that coordinate between
//! CLI arguments and the core application functionality.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app::models::ComponentKind;
use crate::app::{
    ApiClient, ContributionPayload, DownloadOptions, Downloader, Query, RequestScheduler,
    SubmissionPipeline, SubmitOptions,
};
use crate::cli::{DeleteArgs, DownloadArgs, GlobalArgs, SubmitArgs};
use crate::config::AppConfig;
use crate::errors::{ClientError, Result};

/// Handle the submit command
///
/// Reads a batch of contributions from a JSON file, validates and digests
/// them locally, then submits create and update requests concurrently.
pub async fn handle_submit(args: SubmitArgs, global: &GlobalArgs) -> Result<()> {
    let started = Instant::now();
    let (client, scheduler) = build_runtime(global, args.workers, args.timeout)?;

    let mut batch = read_batch(&args.input)?;
    if let Some(project) = &args.project {
        for contribution in &mut batch {
            if contribution.project.is_empty() {
                contribution.project = project.clone();
            }
        }
    }
    info!(
        count = batch.len(),
        input = %args.input.display(),
        "loaded contribution batch"
    );

    let options = SubmitOptions {
        skip_dedupe: args.no_dedupe,
        ignore_dupes: args.ignore_dupes,
        quiet: global.quiet,
    };

    let pipeline = SubmissionPipeline::new(client, scheduler)?;
    let report = pipeline.submit(batch, &options).await?;

    if !global.quiet {
        println!(
            "Submitted {}/{} contributions in {:.1}s ({} created, {} updated, {} skipped)",
            report.processed(),
            report.total,
            started.elapsed().as_secs_f64(),
            report.created,
            report.updated,
            report.skipped
        );
    }
    Ok(())
}

/// Handle the download command
///
/// Resolves the matching contribution ids, then exports contributions and
/// their components to gzipped JSON files under the output directory.
pub async fn handle_download(args: DownloadArgs, global: &GlobalArgs) -> Result<()> {
    let started = Instant::now();
    let (client, scheduler) = build_runtime(global, args.workers, args.timeout)?;

    let query = build_query(&args.project, &args.filters)?;
    let include = if args.components.is_empty() {
        ComponentKind::ALL.to_vec()
    } else {
        args.components.clone()
    };

    let options = DownloadOptions {
        outdir: args.outdir.clone(),
        overwrite: args.overwrite,
        include,
        quiet: global.quiet,
    };

    let downloader = Downloader::new(client, scheduler);
    let report = downloader.download(&query, &options).await?;

    if !global.quiet {
        println!(
            "Exported {} files ({} cache hits) in {:.1}s",
            report.files.len(),
            report.cache_hits,
            started.elapsed().as_secs_f64()
        );
        for (resource, count) in &report.records {
            println!("  {}: {} records", resource, count);
        }
        if !report.complete {
            println!("Time budget ran out before all steps finished; rerun to resume.");
        }
    }
    Ok(())
}

/// Handle the delete command
///
/// Deletes all contributions matching the query, splitting oversize id
/// lists across concurrent requests. Prompts for confirmation unless
/// `--yes` is given.
pub async fn handle_delete(args: DeleteArgs, global: &GlobalArgs) -> Result<()> {
    let (client, scheduler) = build_runtime(global, None, args.timeout)?;
    let query = build_query(&args.project, &args.filters)?;

    if !args.yes && !confirm_delete(&args.project)? {
        println!("Aborted.");
        return Ok(());
    }

    let downloader = Downloader::new(client, scheduler);
    let deleted = downloader.delete(&query).await?;

    if !global.quiet {
        println!("Deleted {} contributions from {}", deleted, args.project);
    }
    Ok(())
}

/// Build the API client and scheduler from config, env and CLI overrides
fn build_runtime(
    global: &GlobalArgs,
    workers: Option<usize>,
    timeout: Option<u64>,
) -> Result<(Arc<ApiClient>, RequestScheduler)> {
    let config = AppConfig::load(global.config.as_deref())?;
    let client = Arc::new(ApiClient::with_config(config.client_config()?)?);

    let mut scheduler = config.scheduler();
    if workers.is_some() || timeout.is_some() {
        scheduler = RequestScheduler::new(
            workers.unwrap_or_else(|| scheduler.max_workers()),
            timeout.map(Duration::from_secs).unwrap_or_else(|| scheduler.timeout()),
        );
    }
    debug!(
        workers = scheduler.max_workers(),
        timeout_secs = scheduler.timeout().as_secs(),
        "runtime configured"
    );
    Ok((client, scheduler))
}

/// Read and deserialize a contribution batch from a JSON file
fn read_batch(path: &Path) -> Result<Vec<ContributionPayload>> {
    let raw = std::fs::read_to_string(path)?;
    let batch: Vec<ContributionPayload> = serde_json::from_str(&raw)
        .map_err(|e| ClientError::generic(format!("Invalid batch file {}: {}", path.display(), e)))?;
    if batch.is_empty() {
        warn!(path = %path.display(), "batch file contains no contributions");
    }
    Ok(batch)
}

/// Build a query map from a project name and key=value filter pairs
fn build_query(project: &str, filters: &[String]) -> Result<Query> {
    let mut query = Query::new();
    query.insert("project".to_string(), Value::String(project.to_string()));
    for filter in filters {
        let (key, value) = filter.split_once('=').ok_or_else(|| {
            ClientError::generic(format!("Invalid filter '{}': expected KEY=VALUE", filter))
        })?;
        let value = if value.contains(',') {
            Value::Array(
                value
                    .split(',')
                    .map(|part| Value::String(part.trim().to_string()))
                    .collect(),
            )
        } else {
            Value::String(value.to_string())
        };
        query.insert(key.to_string(), value);
    }
    Ok(query)
}

/// Ask the user to confirm a bulk deletion
fn confirm_delete(project: &str) -> Result<bool> {
    print!(
        "Delete ALL matching contributions from project '{}'? [y/N] ",
        project
    );
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_scalar_and_list() {
        let query = build_query(
            "sandbox",
            &[
                "formula__contains=Fe".to_string(),
                "identifier__in=mp-1,mp-2".to_string(),
            ],
        )
        .unwrap();

        assert_eq!(query["project"], Value::String("sandbox".to_string()));
        assert_eq!(
            query["formula__contains"],
            Value::String("Fe".to_string())
        );
        assert_eq!(
            query["identifier__in"],
            Value::Array(vec![
                Value::String("mp-1".to_string()),
                Value::String("mp-2".to_string())
            ])
        );
    }

    #[test]
    fn test_build_query_rejects_malformed_filter() {
        let result = build_query("sandbox", &["formula".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_batch_missing_file() {
        let result = read_batch(Path::new("/nonexistent/batch.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_read_batch_round_trip() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[{"project": "sandbox", "identifier": "mp-1", "data": {"x": 1}}]"#)
            .unwrap();

        let batch = read_batch(file.path()).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].identifier, "mp-1");
    }
}
