//! Sub-pipeline executor — buffers input rows into groups and runs a nested
//! pipeline per group.
//!
//! The nested run is synchronous from this step's own thread; sibling steps
//! of the parent pipeline keep running. A nested failure is contained: it
//! shows up in that group's metrics row and never aborts the parent. A
//! parent stop is forwarded into a running nested pipeline through the
//! linked stop signal, so no nested thread survives the parent's shutdown.
//!
//! Grouping modes, highest priority first:
//! 1. `group_size` — flush once the buffer reaches the size; the row that
//!    reaches the threshold is included.
//! 2. `group_field` — break detection: a change in the named column's value
//!    flushes the previous group; the changed row starts the next one.
//!    Comparison is raw value equality; `group_case_insensitive` switches
//!    string keys to ASCII-case-insensitive comparison.
//! 3. `group_time_ms` — flush when the elapsed time since the current
//!    group's first row exceeds the window.
//! 4. none configured — buffer everything, one group at upstream exhaustion.
//!
//! A trailing non-empty group always executes when input ends.
//!
//! Emissions are routed to addressed target steps (hops from this step to
//! the named consumers), reserved out of plain distribution: one metrics row
//! per group, one row per captured result file, and every row the nested
//! capture step wrote. Independently, each input row passes through to the
//! primary output immediately on arrival, preserving the original order
//! regardless of group boundaries.

use crate::pipeline::error::{StepError, StepResult};
use crate::pipeline::executor::Pipeline;
use crate::pipeline::graph::{PipelineDef, StepDef};
use crate::pipeline::result::PipelineResult;
use crate::pipeline::step::{StepContext, StepPlugin};
use crate::pipeline::variables::VariableScope;
use crate::row::{Column, Row, Schema, Value, ValueType};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Named parameter handed to a non-inheriting nested scope. Exactly one of
/// `field` (read from the first row of the group) or `value` (literal,
/// substituted against the parent scope) supplies the value.
#[derive(Debug, Clone, Deserialize)]
struct ParameterMapping {
    name: String,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// Target step names for the executor's emissions.
#[derive(Debug, Clone, Default, Deserialize)]
struct Targets {
    #[serde(default)]
    metrics: Option<String>,
    #[serde(default)]
    files: Option<String>,
    #[serde(default)]
    rows: Option<String>,
}

/// Column names for the per-group execution metrics row. Only configured
/// fields are emitted, in the declaration order below.
#[derive(Debug, Clone, Default, Deserialize)]
struct MetricsFields {
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    errors: Option<String>,
    #[serde(default)]
    lines_read: Option<String>,
    #[serde(default)]
    lines_written: Option<String>,
    #[serde(default)]
    lines_input: Option<String>,
    #[serde(default)]
    lines_output: Option<String>,
    #[serde(default)]
    lines_updated: Option<String>,
    #[serde(default)]
    lines_deleted: Option<String>,
    #[serde(default)]
    lines_rejected: Option<String>,
    #[serde(default)]
    files_retrieved: Option<String>,
    #[serde(default)]
    exit_status: Option<String>,
    #[serde(default)]
    log_text: Option<String>,
    #[serde(default)]
    log_channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubPipelineSettings {
    /// The nested pipeline definition, validated once at init and cached.
    pipeline: PipelineDef,
    /// Injector-style step in the nested pipeline that receives the group's
    /// seed rows.
    entry_step: String,
    /// Nested step whose written rows are captured via a row listener.
    #[serde(default)]
    capture_step: Option<String>,
    #[serde(default)]
    group_size: Option<usize>,
    #[serde(default)]
    group_field: Option<String>,
    #[serde(default)]
    group_time_ms: Option<u64>,
    #[serde(default)]
    group_case_insensitive: bool,
    /// Share the parent's variable scope by reference instead of seeding a
    /// fresh scope from `parameters`.
    #[serde(default)]
    inherit_variables: bool,
    #[serde(default)]
    parameters: Vec<ParameterMapping>,
    #[serde(default)]
    targets: Targets,
    #[serde(default)]
    metrics_fields: MetricsFields,
    /// Column name for emitted result-file rows.
    #[serde(default = "default_file_name_field")]
    file_name_field: String,
}

fn default_file_name_field() -> String {
    "file_name".to_string()
}

type CapturedRows = Arc<Mutex<Vec<(Arc<Schema>, Row)>>>;

pub struct SubPipelineExecutorStep {
    settings: Option<SubPipelineSettings>,
    nested_def: Option<Arc<PipelineDef>>,
    io_ready: bool,
    buffer: Vec<Row>,
    buffer_schema: Option<Arc<Schema>>,
    group_field_index: Option<usize>,
    prev_group_value: Option<Value>,
    group_started_at: Option<Instant>,
    metrics_schema: Option<Arc<Schema>>,
    files_schema: Option<Arc<Schema>>,
}

impl Default for SubPipelineExecutorStep {
    fn default() -> Self {
        Self::new()
    }
}

impl SubPipelineExecutorStep {
    pub fn new() -> Self {
        Self {
            settings: None,
            nested_def: None,
            io_ready: false,
            buffer: Vec::new(),
            buffer_schema: None,
            group_field_index: None,
            prev_group_value: None,
            group_started_at: None,
            metrics_schema: None,
            files_schema: None,
        }
    }

    fn settings(&self) -> &SubPipelineSettings {
        self.settings.as_ref().expect("initialized")
    }

    /// Resolve and cache the grouping column index on the first row.
    fn resolve_first_row(&mut self, schema: &Arc<Schema>) -> StepResult<()> {
        if self.buffer_schema.is_some() {
            return Ok(());
        }
        if let Some(field) = &self.settings().group_field {
            let idx = schema.index_of(field).ok_or_else(|| {
                StepError::fatal(format!(
                    "grouping field '{field}' not present in input schema"
                ))
            })?;
            self.group_field_index = Some(idx);
        }
        self.buffer_schema = Some(Arc::clone(schema));
        Ok(())
    }

    /// Apply the grouping policy to one buffered-candidate row; flushes the
    /// buffer through a nested execution when a boundary is crossed.
    fn buffer_row(&mut self, ctx: &mut StepContext, row: Row) -> StepResult<()> {
        let settings = self.settings();
        if let Some(size) = settings.group_size {
            self.buffer.push(row);
            if self.buffer.len() >= size {
                self.execute_group(ctx)?;
            }
        } else if let Some(idx) = self.group_field_index {
            let case_insensitive = settings.group_case_insensitive;
            let current = row.get(idx).cloned().unwrap_or(Value::None);
            let changed = match &self.prev_group_value {
                Some(prev) => !prev.group_eq(&current, case_insensitive),
                None => false,
            };
            if changed && !self.buffer.is_empty() {
                self.execute_group(ctx)?;
            }
            self.prev_group_value = Some(current);
            self.push_with_clock(row);
        } else if let Some(window_ms) = settings.group_time_ms {
            let window = Duration::from_millis(window_ms);
            let expired = self
                .group_started_at
                .map(|t| t.elapsed() >= window)
                .unwrap_or(false);
            if expired && !self.buffer.is_empty() {
                self.execute_group(ctx)?;
            }
            self.push_with_clock(row);
        } else {
            // No grouping configured: everything is one group, executed at
            // upstream exhaustion.
            self.buffer.push(row);
        }
        Ok(())
    }

    fn push_with_clock(&mut self, row: Row) {
        if self.buffer.is_empty() {
            self.group_started_at = Some(Instant::now());
        }
        self.buffer.push(row);
    }

    /// Freeze the buffer and run one nested pipeline over it.
    fn execute_group(&mut self, ctx: &mut StepContext) -> StepResult<()> {
        let rows = std::mem::take(&mut self.buffer);
        self.group_started_at = None;
        if rows.is_empty() {
            return Ok(());
        }
        let schema = Arc::clone(self.buffer_schema.as_ref().expect("first row resolved"));

        let started = Instant::now();
        let (result, captured) = self.run_nested(ctx, &schema, &rows);
        let elapsed = started.elapsed();

        self.emit_metrics_row(ctx, &result, elapsed)?;
        self.emit_file_rows(ctx, &result)?;
        self.emit_captured_rows(ctx, captured)?;
        Ok(())
    }

    /// Run the nested pipeline for one group. Failures are contained: any
    /// error becomes a failed `PipelineResult` for this group.
    fn run_nested(
        &mut self,
        ctx: &mut StepContext,
        schema: &Arc<Schema>,
        rows: &[Row],
    ) -> (PipelineResult, Vec<(Arc<Schema>, Row)>) {
        let settings = self.settings();
        let scope = if settings.inherit_variables {
            Arc::clone(ctx.scope())
        } else {
            let scope = VariableScope::root();
            for mapping in &settings.parameters {
                let value = match (&mapping.field, &mapping.value) {
                    (Some(field), _) => {
                        // Taken from the first row of the group.
                        match schema.index_of(field) {
                            Some(idx) => rows[0]
                                .get(idx)
                                .map(Value::to_display_string)
                                .unwrap_or_default(),
                            None => String::new(),
                        }
                    }
                    (None, Some(literal)) => ctx.substitute(literal),
                    (None, None) => String::new(),
                };
                scope.set(&mapping.name, value);
            }
            scope
        };

        let mut nested = Pipeline::new(
            Arc::clone(self.nested_def.as_ref().expect("initialized")),
            Arc::clone(ctx.registry()),
        )
        .with_scope(scope)
        .with_log_registry(Arc::clone(ctx.log_registry()))
        .with_parent_stop(ctx.stop_signal());

        let captured: CapturedRows = Arc::new(Mutex::new(Vec::new()));
        let entry = self.settings().entry_step.clone();
        let capture_step = self.settings().capture_step.clone();

        let outcome = (|| -> crate::error::Result<PipelineResult> {
            nested.prepare()?;
            let producer = nested.row_producer(&entry)?;
            if let Some(capture) = &capture_step {
                let sink = Arc::clone(&captured);
                nested.add_row_listener(
                    capture,
                    Box::new(move |s: &Arc<Schema>, r: &Row| {
                        sink.lock()
                            .expect("capture lock poisoned")
                            .push((Arc::clone(s), r.clone()));
                    }),
                )?;
            }
            nested.start()?;
            for row in rows {
                use crate::pipeline::channel::PutResult;
                if producer.put_row(Arc::clone(schema), row.clone()) == PutResult::Closed {
                    break;
                }
            }
            producer.finished();
            nested.wait_until_finished()
        })();

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                // Contained: the group failed, the parent carries on. Any
                // nested threads that did start exit via the stop signal.
                nested.stop_all();
                ctx.log(&format!("nested pipeline failed to run: {e}"));
                PipelineResult {
                    errors: 1,
                    log_channel_id: nested.log_channel_id().to_string(),
                    ..Default::default()
                }
            }
        };

        // Take the nested log out of the registry so memory stays bounded
        // across many groups.
        if let Some(text) = ctx.log_registry().remove(nested.log_channel_id()) {
            result.log_text = text;
        }

        let rows_captured = std::mem::take(
            &mut *captured.lock().expect("capture lock poisoned"),
        );
        (result, rows_captured)
    }

    fn metrics_schema(&mut self) -> Arc<Schema> {
        if let Some(schema) = &self.metrics_schema {
            return Arc::clone(schema);
        }
        let f = &self.settings().metrics_fields;
        let mut columns = Vec::new();
        let mut add = |name: &Option<String>, value_type: ValueType| {
            if let Some(name) = name {
                columns.push(Column::new(name, value_type));
            }
        };
        add(&f.time, ValueType::Integer);
        add(&f.result, ValueType::Boolean);
        add(&f.errors, ValueType::Integer);
        add(&f.lines_read, ValueType::Integer);
        add(&f.lines_written, ValueType::Integer);
        add(&f.lines_input, ValueType::Integer);
        add(&f.lines_output, ValueType::Integer);
        add(&f.lines_updated, ValueType::Integer);
        add(&f.lines_deleted, ValueType::Integer);
        add(&f.lines_rejected, ValueType::Integer);
        add(&f.files_retrieved, ValueType::Integer);
        add(&f.exit_status, ValueType::Integer);
        add(&f.log_text, ValueType::String);
        add(&f.log_channel_id, ValueType::String);
        let schema = Arc::new(Schema::new(columns));
        self.metrics_schema = Some(Arc::clone(&schema));
        schema
    }

    fn emit_metrics_row(
        &mut self,
        ctx: &mut StepContext,
        result: &PipelineResult,
        elapsed: Duration,
    ) -> StepResult<()> {
        let Some(target) = self.settings().targets.metrics.clone() else {
            return Ok(());
        };
        let schema = self.metrics_schema();
        let f = &self.settings().metrics_fields;
        let mut values = Vec::with_capacity(schema.len());
        let mut add = |name: &Option<String>, value: Value| {
            if name.is_some() {
                values.push(value);
            }
        };
        add(&f.time, Value::Integer(elapsed.as_millis() as i64));
        add(&f.result, Value::Boolean(result.success()));
        add(&f.errors, Value::Integer(result.errors as i64));
        add(&f.lines_read, Value::Integer(result.counts.read as i64));
        add(&f.lines_written, Value::Integer(result.counts.written as i64));
        add(&f.lines_input, Value::Integer(result.counts.input as i64));
        add(&f.lines_output, Value::Integer(result.counts.output as i64));
        add(&f.lines_updated, Value::Integer(result.counts.updated as i64));
        add(&f.lines_deleted, Value::Integer(result.counts.deleted as i64));
        add(&f.lines_rejected, Value::Integer(result.counts.rejected as i64));
        add(
            &f.files_retrieved,
            Value::Integer(result.counts.files_retrieved as i64),
        );
        add(
            &f.exit_status,
            Value::Integer(result.exit_code().code() as i64),
        );
        add(&f.log_text, Value::String(result.log_text.clone()));
        add(
            &f.log_channel_id,
            Value::String(result.log_channel_id.clone()),
        );
        ctx.put_row_to(&target, schema, Row::from_values(values))
    }

    fn emit_file_rows(
        &mut self,
        ctx: &mut StepContext,
        result: &PipelineResult,
    ) -> StepResult<()> {
        let Some(target) = self.settings().targets.files.clone() else {
            return Ok(());
        };
        let schema = match &self.files_schema {
            Some(schema) => Arc::clone(schema),
            None => {
                let schema = Arc::new(Schema::new(vec![
                    Column::new(&self.settings().file_name_field, ValueType::String),
                    Column::new("origin", ValueType::String),
                ]));
                self.files_schema = Some(Arc::clone(&schema));
                schema
            }
        };
        for file in &result.files {
            let row = Row::from_values(vec![
                Value::String(file.path.display().to_string()),
                Value::String(file.origin.clone()),
            ]);
            ctx.put_row_to(&target, Arc::clone(&schema), row)?;
        }
        Ok(())
    }

    fn emit_captured_rows(
        &mut self,
        ctx: &mut StepContext,
        captured: Vec<(Arc<Schema>, Row)>,
    ) -> StepResult<()> {
        let Some(target) = self.settings().targets.rows.clone() else {
            return Ok(());
        };
        for (schema, row) in captured {
            ctx.put_row_to(&target, schema, row)?;
        }
        Ok(())
    }
}

impl StepPlugin for SubPipelineExecutorStep {
    fn init(&mut self, def: &StepDef, _scope: &Arc<VariableScope>) -> StepResult<()> {
        let settings: SubPipelineSettings = serde_json::from_value(def.settings.clone())
            .map_err(|e| StepError::config(format!("invalid sub-pipeline settings: {e}")))?;

        settings
            .pipeline
            .validate()
            .map_err(|e| StepError::config(format!("nested pipeline invalid: {e}")))?;
        if settings.pipeline.step(&settings.entry_step).is_none() {
            return Err(StepError::config(format!(
                "entry step '{}' not in nested pipeline",
                settings.entry_step
            )));
        }
        if let Some(capture) = &settings.capture_step {
            if settings.pipeline.step(capture).is_none() {
                return Err(StepError::config(format!(
                    "capture step '{capture}' not in nested pipeline"
                )));
            }
        }
        if settings.group_size == Some(0) {
            return Err(StepError::config("group_size must be positive"));
        }
        for mapping in &settings.parameters {
            if mapping.name.is_empty() {
                return Err(StepError::config("parameter mapping with empty name"));
            }
        }

        self.nested_def = Some(Arc::new(settings.pipeline.clone()));
        self.settings = Some(settings);
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<bool> {
        if !self.io_ready {
            let targets = self.settings().targets.clone();
            let reserved: Vec<String> = [targets.metrics, targets.files, targets.rows]
                .into_iter()
                .flatten()
                .collect();
            ctx.reserve_targets(reserved.iter().map(String::as_str));
            self.io_ready = true;
        }

        match ctx.get_row() {
            Some((schema, row)) => {
                self.resolve_first_row(&schema)?;
                // Pass-through happens immediately per arrival, independent
                // of grouping, so the primary output preserves input order.
                ctx.put_row(Arc::clone(&schema), row.clone());
                self.buffer_row(ctx, row)?;
                Ok(true)
            }
            None => {
                // Upstream exhausted: a trailing partial group still runs.
                if !self.buffer.is_empty() {
                    self.execute_group(ctx)?;
                }
                Ok(false)
            }
        }
    }
}
