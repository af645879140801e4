//! Submission pipeline: validate, dedupe, batch, send, retry
//!
//! Contributions move through a fixed sequence of stages before anything
//! touches the network: schema validation, deduplication against server-known
//! and in-batch identity, greedy packing into bounded chunks, concurrent
//! dispatch through the scheduler, and a create-path-only retry loop.
//!
//! Partial application is the normal case: individual chunk failures are
//! logged and counted, and the pipeline raises only for hard validation
//! problems, unsuppressed duplicates, or an unrecoverable shortfall on a
//! project that enforces unique identifiers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::app::client::ApiClient;
use crate::app::digest::Digest;
use crate::app::models::{
    data_depth, flatten_columns, Column, ComponentKind, ContributionPayload, Project, Resource,
};
use crate::app::paginate::resolve_values;
use crate::app::query::Query;
use crate::app::scheduler::{Fetched, RequestScheduler, TrackedRequest};
use crate::constants::{batching, limits, progress};
use crate::errors::{
    ApiError, ClientError, Result, SubmitError, ValidationError,
};

/// Options controlling a submission run
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Skip the dedupe stage entirely (no identifier/digest snapshots)
    pub skip_dedupe: bool,
    /// Permit component digest collisions instead of raising
    pub ignore_dupes: bool,
    /// Hide the progress bar
    pub quiet: bool,
}

/// Outcome tally of a submission run
///
/// The pipeline reports processed/total rather than raising on partial
/// success; callers compare `processed()` against `total`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Contributions created through the bulk path
    pub created: usize,
    /// Contributions updated through the per-id path
    pub updated: usize,
    /// Create-path contributions skipped as already present (idempotent)
    pub skipped: usize,
    /// Contributions accepted into the run after validation
    pub total: usize,
}

impl SubmissionReport {
    /// Contributions that actually landed server-side this run
    pub fn processed(&self) -> usize {
        self.created + self.updated
    }
}

/// The submission pipeline
///
/// Holds its compiled payload schema and dedupe state per instance; nothing
/// is cached at module level, so independent pipelines never share state.
pub struct SubmissionPipeline {
    client: Arc<ApiClient>,
    scheduler: RequestScheduler,
    schema: jsonschema::Validator,
}

impl SubmissionPipeline {
    /// Create a pipeline over the given client and scheduler
    pub fn new(client: Arc<ApiClient>, scheduler: RequestScheduler) -> Result<Self> {
        let schema = jsonschema::validator_for(&contribution_schema()).map_err(|e| {
            ClientError::Submit(SubmitError::SchemaCompile {
                reason: e.to_string(),
            })
        })?;

        Ok(Self {
            client,
            scheduler,
            schema,
        })
    }

    /// Submit a batch of contributions
    ///
    /// Contributions may target multiple projects; each project group is
    /// deduped, batched, and retried independently so one project's failure
    /// never blocks another's progress.
    pub async fn submit(
        &self,
        mut contributions: Vec<ContributionPayload>,
        options: &SubmitOptions,
    ) -> Result<SubmissionReport> {
        let started = Instant::now();
        self.validate(&mut contributions)?;

        let mut report = SubmissionReport::default();
        let mut groups: HashMap<String, Vec<ContributionPayload>> = HashMap::new();
        for contribution in contributions {
            groups
                .entry(contribution.project.clone())
                .or_default()
                .push(contribution);
        }

        for (project_name, group) in groups {
            let project = self.fetch_project(&project_name).await?;
            let group_report = self
                .submit_project(&project, group, options, started)
                .await?;
            report.created += group_report.created;
            report.updated += group_report.updated;
            report.skipped += group_report.skipped;
            report.total += group_report.total;
        }

        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            total = report.total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "submission finished"
        );
        Ok(report)
    }

    /// Validate every contribution before any network call
    ///
    /// Oversize components are skipped with a logged error rather than
    /// failing the call; every other violation is fatal and names the
    /// offending index.
    fn validate(&self, contributions: &mut [ContributionPayload]) -> Result<()> {
        if contributions.is_empty() {
            return Err(SubmitError::EmptyBatch.into());
        }

        for (index, contribution) in contributions.iter_mut().enumerate() {
            if contribution.project.is_empty() {
                return Err(ValidationError::EmptyField {
                    index,
                    field: "project".to_string(),
                }
                .into());
            }

            let has_components = ComponentKind::ALL
                .iter()
                .any(|kind| contribution.components(*kind).is_some());
            if contribution.data.is_empty() && !has_components {
                return Err(ValidationError::EmptyContribution { index }.into());
            }

            for kind in ComponentKind::ALL {
                if let Some(list) = contribution.components(kind) {
                    if list.is_empty() {
                        return Err(ValidationError::EmptyField {
                            index,
                            field: kind.field().to_string(),
                        }
                        .into());
                    }
                }
            }

            if data_depth(&contribution.data) > batching::MAX_NESTING_DEPTH {
                return Err(ValidationError::TooDeep {
                    index,
                    max: batching::MAX_NESTING_DEPTH,
                }
                .into());
            }

            if contribution.component_count() > batching::MAX_COMPONENTS {
                return Err(ValidationError::TooManyComponents {
                    index,
                    count: contribution.component_count(),
                    max: batching::MAX_COMPONENTS,
                }
                .into());
            }

            let instance = serde_json::to_value(&*contribution).map_err(ApiError::Json)?;
            if let Some(first_error) = self.schema.iter_errors(&instance).next() {
                return Err(ValidationError::Schema {
                    index,
                    detail: first_error.to_string(),
                }
                .into());
            }

            // Oversize components are dropped here, not raised
            for kind in ComponentKind::ALL {
                let mut emptied = false;
                if let Some(list) = contribution.components_mut(kind) {
                    list.retain(|component| {
                        let size = component.serialized_size();
                        if size > batching::MAX_COMPONENT_BYTES {
                            error!(
                                index,
                                name = %component.name,
                                kind = %kind,
                                size,
                                max = batching::MAX_COMPONENT_BYTES,
                                "component exceeds size ceiling, skipping"
                            );
                            false
                        } else {
                            true
                        }
                    });
                    for component in list.iter_mut() {
                        component.ensure_digest();
                    }
                    emptied = list.is_empty();
                }
                if emptied {
                    // A fully skipped list must not read as "clear on update"
                    match kind {
                        ComponentKind::Structure => contribution.structures = None,
                        ComponentKind::Table => contribution.tables = None,
                        ComponentKind::Attachment => contribution.attachments = None,
                    }
                }
            }
        }

        Ok(())
    }

    async fn fetch_project(&self, name: &str) -> Result<Project> {
        match self.client.get_project(name).await {
            Ok(project) => Ok(project),
            Err(ApiError::Status { status: 404, .. }) => Err(SubmitError::ProjectNotFound {
                project: name.to_string(),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Dedupe, batch, send, and retry one project's contributions
    async fn submit_project(
        &self,
        project: &Project,
        group: Vec<ContributionPayload>,
        options: &SubmitOptions,
        started: Instant,
    ) -> Result<SubmissionReport> {
        let total = group.len();
        let mut report = SubmissionReport {
            total,
            ..Default::default()
        };

        // Read-mostly snapshots, refreshed explicitly before retries
        let mut known_identifiers = if options.skip_dedupe || !project.unique_identifiers {
            HashSet::new()
        } else {
            self.snapshot_identifiers(&project.name).await?
        };
        let known_digests = if options.skip_dedupe {
            HashSet::new()
        } else {
            self.snapshot_digests(&project.name).await?
        };

        let mut updates = Vec::new();
        let mut creates = Vec::new();
        let mut batch_digests: HashSet<Digest> = HashSet::new();

        for contribution in group {
            // The skip decision comes first: a skipped contribution is never
            // submitted, so its components must not count as duplicate
            // digest submissions and fail the batch.
            if !contribution.is_update()
                && project.unique_identifiers
                && !options.skip_dedupe
                && known_identifiers.contains(&contribution.identifier)
            {
                // Idempotent submit: silently skip already-known identifiers
                debug!(
                    project = %project.name,
                    identifier = %contribution.identifier,
                    "skipping duplicate create"
                );
                report.skipped += 1;
                continue;
            }

            for kind in ComponentKind::ALL {
                if let Some(list) = contribution.components(kind) {
                    for component in list {
                        let digest = component.digest();
                        let collides =
                            known_digests.contains(&digest) || !batch_digests.insert(digest);
                        if collides && !options.ignore_dupes {
                            return Err(ValidationError::DuplicateComponent {
                                kind: kind.field().to_string(),
                                digest: digest.to_hex(),
                                project: project.name.clone(),
                            }
                            .into());
                        }
                    }
                }
            }

            if contribution.is_update() {
                updates.push(contribution);
            } else {
                known_identifiers.insert(contribution.identifier.clone());
                creates.push(contribution);
            }
        }

        let submitted_columns = collect_columns(updates.iter().chain(creates.iter()));

        // Update path: one request per addressed resource
        report.updated = self.send_updates(&project.name, updates, options).await;

        // Create path: bulk chunks with retry for unique-identifier projects
        report.created = self
            .send_creates(project, creates, options, started)
            .await?;

        self.refresh_columns(project, submitted_columns).await;

        Ok(report)
    }

    async fn snapshot_identifiers(&self, project: &str) -> Result<HashSet<String>> {
        let mut query = Query::new();
        query.insert("project".to_string(), json!(project));
        let values = resolve_values(
            &self.client,
            &self.scheduler,
            Resource::Contributions,
            &query,
            "identifier",
            None,
        )
        .await?;
        debug!(project, identifiers = values.len(), "identifier snapshot");
        Ok(values.into_iter().collect())
    }

    async fn snapshot_digests(&self, project: &str) -> Result<HashSet<Digest>> {
        let mut digests = HashSet::new();
        for kind in ComponentKind::ALL {
            let mut query = Query::new();
            query.insert("contribution__project".to_string(), json!(project));
            let values = resolve_values(
                &self.client,
                &self.scheduler,
                kind.resource(),
                &query,
                "md5",
                None,
            )
            .await?;
            for value in values {
                if let Ok(digest) = Digest::from_hex(&value) {
                    digests.insert(digest);
                }
            }
        }
        debug!(project, digests = digests.len(), "component digest snapshot");
        Ok(digests)
    }

    /// Send update-path contributions one request per id
    async fn send_updates(
        &self,
        project: &str,
        updates: Vec<ContributionPayload>,
        options: &SubmitOptions,
    ) -> usize {
        if updates.is_empty() {
            return 0;
        }

        let bar = self.progress_bar(updates.len(), "updating", options.quiet);
        let mut requests = Vec::with_capacity(updates.len());
        for contribution in updates {
            // Addressed resource: id is guaranteed by is_update()
            let Some(id) = contribution.id.clone() else {
                continue;
            };
            let client = self.client.clone();
            let track_id = format!("update:{}:{}", project, id);
            requests.push(TrackedRequest::new(track_id, async move {
                let mut payload = serde_json::to_value(&contribution).map_err(ApiError::Json)?;
                if let Some(map) = payload.as_object_mut() {
                    // The URL addresses the record; the body must not
                    map.remove("id");
                    map.remove("project");
                }
                let count = client.update_contribution(&id, &payload).await?;
                Ok(Fetched::new(json!({ "id": id }), count))
            }));
        }

        let outcomes = self.scheduler.run(requests, bar).await;
        outcomes.values().map(|fetched| fetched.count).sum()
    }

    /// Send create-path contributions as bulk chunks, retrying the shortfall
    ///
    /// Retries apply only to projects with unique identifiers: without them
    /// there is no way to tell which contributions already landed, and a
    /// blind retry would double-submit. Those projects get a warning and a
    /// truthful tally instead.
    async fn send_creates(
        &self,
        project: &Project,
        mut pending: Vec<ContributionPayload>,
        options: &SubmitOptions,
        started: Instant,
    ) -> Result<usize> {
        let mut created = 0;
        let mut attempt: u32 = 0;

        while !pending.is_empty() {
            let scheduler = RequestScheduler::new(
                self.scheduler.max_workers(),
                self.scheduler.remaining_budget(started.elapsed()),
            );
            let submitted = pending.len();
            let bar = self.progress_bar(submitted, "creating", options.quiet);

            let chunks = pack_chunks(&pending)?;
            debug!(
                project = %project.name,
                contributions = submitted,
                chunks = chunks.len(),
                attempt,
                "dispatching create chunks"
            );

            let mut requests = Vec::with_capacity(chunks.len());
            for (slot, chunk) in chunks.into_iter().enumerate() {
                let client = self.client.clone();
                let track_id = format!("create:{}:{}:{}", project.name, attempt, slot);
                requests.push(TrackedRequest::new(track_id, async move {
                    let count = client.create_contributions(&chunk).await?;
                    Ok(Fetched::new(json!({ "count": count }), count))
                }));
            }

            let outcomes = scheduler.run(requests, bar).await;
            let processed: usize = outcomes.values().map(|fetched| fetched.count).sum();
            created += processed;

            if processed >= submitted {
                break;
            }

            if !project.unique_identifiers {
                // Policy gap carried over deliberately: without unique
                // identifiers there is no safe retry, only a truthful tally
                warn!(
                    project = %project.name,
                    processed,
                    submitted,
                    "shortfall on project without unique identifiers; not retrying"
                );
                break;
            }

            attempt += 1;
            if attempt > limits::MAX_RETRIES {
                return Err(SubmitError::Shortfall {
                    project: project.name.clone(),
                    processed: created,
                    total: created + (submitted - processed),
                    retries: limits::MAX_RETRIES,
                }
                .into());
            }

            // Refresh the snapshot and resubmit only what has not landed
            let landed = self.snapshot_identifiers(&project.name).await?;
            pending.retain(|contribution| !landed.contains(&contribution.identifier));
            info!(
                project = %project.name,
                remaining = pending.len(),
                attempt,
                "retrying unprocessed create subset"
            );
        }

        Ok(created)
    }

    /// Refresh the project's column order/units if the data paths changed
    async fn refresh_columns(&self, project: &Project, submitted: Vec<Column>) {
        if submitted.is_empty() {
            return;
        }

        let existing: HashSet<&String> = project.columns.iter().map(|c| &c.path).collect();
        let new_paths: Vec<Column> = submitted
            .into_iter()
            .filter(|column| !existing.contains(&column.path))
            .collect();
        if new_paths.is_empty() {
            return;
        }

        let mut columns = project.columns.clone();
        columns.extend(new_paths);

        // Best effort: a failed refresh never undoes a finished submission
        if let Err(e) = self
            .client
            .update_project_columns(&project.name, &columns)
            .await
        {
            warn!(project = %project.name, error = %e, "column refresh failed");
        } else {
            info!(project = %project.name, columns = columns.len(), "columns refreshed");
        }
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

/// Greedily pack contributions into chunks bounded by both item count and
/// serialized payload size
fn pack_chunks(contributions: &[ContributionPayload]) -> Result<Vec<Vec<Value>>> {
    let mut chunks: Vec<Vec<Value>> = Vec::new();
    let mut current: Vec<Value> = Vec::new();
    let mut current_bytes = 0;

    for contribution in contributions {
        let value = serde_json::to_value(contribution).map_err(ApiError::Json)?;
        let size = contribution.serialized_size();

        if size > batching::MAX_PAYLOAD_BYTES {
            // One record past the payload ceiling still ships alone; the
            // server is the final arbiter of acceptance
            warn!(
                identifier = %contribution.identifier,
                size,
                max = batching::MAX_PAYLOAD_BYTES,
                "single contribution exceeds payload ceiling"
            );
        }

        let would_overflow = !current.is_empty()
            && (current.len() >= batching::MAX_BATCH_SIZE
                || current_bytes + size > batching::MAX_PAYLOAD_BYTES);
        if would_overflow {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current.push(value);
        current_bytes += size;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    Ok(chunks)
}

/// Union of flattened data columns across a batch, first-seen order
fn collect_columns<'a>(
    contributions: impl Iterator<Item = &'a ContributionPayload>,
) -> Vec<Column> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for contribution in contributions {
        for column in flatten_columns(&contribution.data) {
            if seen.insert(column.path.clone()) {
                columns.push(column);
            }
        }
    }
    columns
}

/// The payload schema every contribution must satisfy before submission
fn contribution_schema() -> Value {
    let component = json!({
        "type": "object",
        "required": ["name", "content"],
        "properties": {
            "name": {"type": "string", "minLength": 1},
            "mime": {"type": "string"},
            "content": {},
            "md5": {"type": "string", "pattern": "^[a-f0-9]{32}$"}
        },
        "additionalProperties": false
    });

    json!({
        "type": "object",
        "required": ["project", "identifier"],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "project": {"type": "string", "pattern": "^[a-zA-Z0-9_]{3,31}$"},
            "identifier": {"type": "string", "minLength": 1, "maxLength": 255},
            "data": {"type": "object"},
            "structures": {"type": "array", "items": component},
            "tables": {"type": "array", "items": component},
            "attachments": {"type": "array", "items": component}
        },
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::ComponentPayload;
    use serde_json::Map;

    fn pipeline() -> SubmissionPipeline {
        let client = Arc::new(ApiClient::new("https://api.example.org", "key").unwrap());
        SubmissionPipeline::new(client, RequestScheduler::default()).unwrap()
    }

    fn contribution(identifier: &str) -> ContributionPayload {
        let mut data = Map::new();
        data.insert("bandgap".into(), json!("1.2 eV"));
        ContributionPayload {
            project: "sandbox".into(),
            identifier: identifier.into(),
            data,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_rejects_empty_contribution() {
        let pipeline = pipeline();
        let mut batch = vec![contribution("mp-1"), ContributionPayload {
            project: "sandbox".into(),
            identifier: "mp-2".into(),
            ..Default::default()
        }];

        match pipeline.validate(&mut batch) {
            Err(ClientError::Validation(ValidationError::EmptyContribution { index })) => {
                assert_eq!(index, 1)
            }
            other => panic!("expected EmptyContribution, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_present_but_empty_list() {
        let pipeline = pipeline();
        let mut entry = contribution("mp-1");
        entry.structures = Some(vec![]);

        match pipeline.validate(&mut [entry]) {
            Err(ClientError::Validation(ValidationError::EmptyField { index, field })) => {
                assert_eq!(index, 0);
                assert_eq!(field, "structures");
            }
            other => panic!("expected EmptyField, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_project_name() {
        let pipeline = pipeline();
        let mut entry = contribution("mp-1");
        entry.project = "no spaces allowed".into();

        match pipeline.validate(&mut [entry]) {
            Err(ClientError::Validation(ValidationError::Schema { index, .. })) => {
                assert_eq!(index, 0)
            }
            other => panic!("expected Schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_deep_nesting() {
        let pipeline = pipeline();
        let mut entry = contribution("mp-1");
        entry.data = json!({"a": {"b": {"c": {"d": {"e": 1}}}}})
            .as_object()
            .cloned()
            .unwrap();

        match pipeline.validate(&mut [entry]) {
            Err(ClientError::Validation(ValidationError::TooDeep { index, .. })) => {
                assert_eq!(index, 0)
            }
            other => panic!("expected TooDeep, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_skips_oversize_component() {
        let pipeline = pipeline();
        let mut entry = contribution("mp-1");
        entry.attachments = Some(vec![
            ComponentPayload {
                name: "huge".into(),
                mime: Some("application/json".into()),
                content: json!("x".repeat(batching::MAX_COMPONENT_BYTES + 1)),
                md5: None,
            },
            ComponentPayload {
                name: "small".into(),
                mime: Some("application/json".into()),
                content: json!({"ok": true}),
                md5: None,
            },
        ]);

        let mut batch = vec![entry];
        pipeline.validate(&mut batch).unwrap();

        let attachments = batch[0].attachments.as_ref().unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "small");
        assert!(attachments[0].md5.is_some());
    }

    #[test]
    fn test_validate_nones_out_fully_skipped_list() {
        let pipeline = pipeline();
        let mut entry = contribution("mp-1");
        entry.tables = Some(vec![ComponentPayload {
            name: "huge".into(),
            mime: None,
            content: json!("x".repeat(batching::MAX_COMPONENT_BYTES + 1)),
            md5: None,
        }]);

        let mut batch = vec![entry];
        pipeline.validate(&mut batch).unwrap();
        assert!(batch[0].tables.is_none());
    }

    #[test]
    fn test_empty_batch_rejected() {
        let pipeline = pipeline();
        match pipeline.validate(&mut []) {
            Err(ClientError::Submit(SubmitError::EmptyBatch)) => {}
            other => panic!("expected EmptyBatch, got {:?}", other),
        }
    }

    #[test]
    fn test_pack_chunks_respects_item_ceiling() {
        let batch: Vec<ContributionPayload> = (0..2500)
            .map(|i| contribution(&format!("mp-{}", i)))
            .collect();
        let chunks = pack_chunks(&batch).unwrap();

        assert_eq!(chunks.len(), 3); // ceil(2500 / 1000)
        assert!(chunks.iter().all(|chunk| chunk.len() <= batching::MAX_BATCH_SIZE));
        let total: usize = chunks.iter().map(Vec::len).sum();
        assert_eq!(total, 2500);
    }

    #[test]
    fn test_pack_chunks_respects_byte_ceiling() {
        let batch: Vec<ContributionPayload> = (0..4)
            .map(|i| {
                let mut entry = contribution(&format!("mp-{}", i));
                entry.data.insert(
                    "blob".into(),
                    json!("y".repeat(batching::MAX_PAYLOAD_BYTES / 2)),
                );
                entry
            })
            .collect();

        let chunks = pack_chunks(&batch).unwrap();
        // Each record is just over half the ceiling, so no two fit together
        assert_eq!(chunks.len(), 4);
        for chunk in &chunks {
            let bytes: usize = chunk
                .iter()
                .map(|v| serde_json::to_string(v).unwrap().len())
                .sum();
            assert!(bytes <= batching::MAX_PAYLOAD_BYTES + batching::MAX_PAYLOAD_BYTES / 2);
        }
    }

    #[test]
    fn test_collect_columns_first_seen_order() {
        let mut a = contribution("mp-1");
        a.data = json!({"z": "1 eV", "a": 2}).as_object().cloned().unwrap();
        let mut b = contribution("mp-2");
        b.data = json!({"a": 3, "m": "4 K"}).as_object().cloned().unwrap();

        let columns = collect_columns([a, b].iter());
        let paths: Vec<&str> = columns.iter().map(|c| c.path.as_str()).collect();
        // serde_json maps are key-sorted, so per-contribution order is sorted
        assert_eq!(paths, vec!["a", "z", "m"]);
        assert_eq!(
            columns.iter().find(|c| c.path == "m").unwrap().unit.as_deref(),
            Some("K")
        );
    }
}
