//! Step runtime — plugin contract, per-copy I/O context, and the thread
//! main loop.
//!
//! A step pairs an immutable shared configuration (the [`StepDef`], set at
//! graph-build time) with private per-copy mutable state (the plugin value
//! and its [`StepContext`]), which is owned by exactly one thread.
//!
//! Lifecycle: `Created → Initialized → Running → {Finished | Failed |
//! Stopped}`. `init` runs on the preparing thread, before any step thread
//! spawns; a failed `init` keeps the whole pipeline from starting.

use crate::pipeline::channel::{RowChannel, StopSignal, POLL_INTERVAL};
use crate::pipeline::error::{StepError, StepResult};
use crate::pipeline::graph::{HopKind, RowDistribution, StepDef};
use crate::pipeline::logging::{LogChannelId, LogRegistry};
use crate::pipeline::registry::StepRegistry;
use crate::pipeline::result::{ResultFile, RowCounts};
use crate::pipeline::variables::VariableScope;
use crate::row::{Column, Row, Schema, Value, ValueType};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Diagnostic columns appended to rows diverted to an error hop.
const ERROR_CODE_COLUMN: &str = "error_code";
const ERROR_MESSAGE_COLUMN: &str = "error_message";

/// Contract every step type implements. The engine never looks inside these
/// calls; business logic is the plugin's own concern.
pub trait StepPlugin: Send {
    /// Validate configuration and capture what the run loop needs. Runs on
    /// the preparing thread. Returning an error keeps the step out of
    /// `Running` and fails pipeline preparation.
    fn init(&mut self, def: &StepDef, scope: &Arc<VariableScope>) -> StepResult<()>;

    /// Process one unit of work. `Ok(true)` keeps the loop going,
    /// `Ok(false)` signals natural completion (upstream exhausted or the
    /// step produced everything it will).
    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<bool>;

    /// Release step-owned resources. Called exactly once, on every exit
    /// path.
    fn dispose(&mut self) {}
}

/// Synchronous observer of every row a step writes.
pub type RowListener = Box<dyn Fn(&Arc<Schema>, &Row) + Send + Sync>;

/// Listener list shared by all copies of one step.
pub type SharedListeners = Arc<Mutex<Vec<RowListener>>>;

/// Step lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepState {
    #[default]
    Created,
    Initialized,
    Running,
    Finished,
    Failed,
    Stopped,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepState::Finished | StepState::Failed | StepState::Stopped
        )
    }
}

/// Per-copy counters and state, shared with the owning pipeline for
/// aggregation. Counter updates are relaxed; they are read for reporting,
/// never for synchronization.
#[derive(Debug, Default)]
pub struct StepMetrics {
    pub read: AtomicU64,
    pub written: AtomicU64,
    pub input: AtomicU64,
    pub output: AtomicU64,
    pub updated: AtomicU64,
    pub deleted: AtomicU64,
    pub rejected: AtomicU64,
    pub files_retrieved: AtomicU64,
    pub errors: AtomicU64,
    state: Mutex<StepState>,
}

impl StepMetrics {
    pub fn state(&self) -> StepState {
        *self.state.lock().expect("step state lock poisoned")
    }

    pub fn set_state(&self, state: StepState) {
        *self.state.lock().expect("step state lock poisoned") = state;
    }

    pub fn counts(&self) -> RowCounts {
        RowCounts {
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            input: self.input.load(Ordering::Relaxed),
            output: self.output.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            files_retrieved: self.files_retrieved.load(Ordering::Relaxed),
        }
    }
}

/// One output channel plus routing metadata.
pub(crate) struct OutputSlot {
    pub channel: RowChannel,
    pub consumer: String,
    pub kind: HopKind,
}

/// Rows promoted into the pipeline result by steps.
#[derive(Default)]
pub(crate) struct ResultRows {
    pub schema: Option<Arc<Schema>>,
    pub rows: Vec<Row>,
}

/// Everything one step copy touches at runtime: its channels, counters, the
/// variable scope, the log channel, and the shared stop signal. Exclusively
/// owned by the copy's thread.
pub struct StepContext {
    step_name: String,
    copy: usize,
    distribution: RowDistribution,
    inputs: Vec<RowChannel>,
    input_cursor: usize,
    outputs: Vec<OutputSlot>,
    /// Indices into `outputs` used by plain `put_row`.
    default_targets: Vec<usize>,
    /// Rotation cursors for addressed targets, keyed by consumer step name.
    addressed: HashMap<String, (Vec<usize>, usize)>,
    error_targets: Vec<usize>,
    out_cursor: usize,
    reserved: HashSet<String>,
    listeners: SharedListeners,
    metrics: Arc<StepMetrics>,
    stop: Arc<StopSignal>,
    scope: Arc<VariableScope>,
    registry: Arc<StepRegistry>,
    log: Arc<LogRegistry>,
    log_channel: LogChannelId,
    files: Arc<Mutex<Vec<ResultFile>>>,
    result_rows: Arc<Mutex<ResultRows>>,
    /// Cached (input schema, derived error schema) pair.
    error_schema: Option<(Arc<Schema>, Arc<Schema>)>,
}

#[allow(clippy::too_many_arguments)]
impl StepContext {
    pub(crate) fn new(
        step_name: String,
        copy: usize,
        distribution: RowDistribution,
        inputs: Vec<RowChannel>,
        outputs: Vec<OutputSlot>,
        listeners: SharedListeners,
        metrics: Arc<StepMetrics>,
        stop: Arc<StopSignal>,
        scope: Arc<VariableScope>,
        registry: Arc<StepRegistry>,
        log: Arc<LogRegistry>,
        log_channel: LogChannelId,
        files: Arc<Mutex<Vec<ResultFile>>>,
        result_rows: Arc<Mutex<ResultRows>>,
    ) -> Self {
        let mut ctx = Self {
            step_name,
            copy,
            distribution,
            inputs,
            input_cursor: 0,
            outputs,
            default_targets: Vec::new(),
            addressed: HashMap::new(),
            error_targets: Vec::new(),
            out_cursor: 0,
            reserved: HashSet::new(),
            listeners,
            metrics,
            stop,
            scope,
            registry,
            log,
            log_channel,
            files,
            result_rows,
            error_schema: None,
        };
        ctx.rebuild_routing();
        ctx
    }

    fn rebuild_routing(&mut self) {
        self.default_targets = self
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.kind == HopKind::Main && !self.reserved.contains(&slot.consumer)
            })
            .map(|(i, _)| i)
            .collect();
        self.error_targets = self
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.kind == HopKind::Error)
            .map(|(i, _)| i)
            .collect();
        self.addressed.clear();
        for (i, slot) in self.outputs.iter().enumerate() {
            if slot.kind == HopKind::Main {
                self.addressed
                    .entry(slot.consumer.clone())
                    .or_insert_with(|| (Vec::new(), 0))
                    .0
                    .push(i);
            }
        }
    }

    // ── Identity & environment ──

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn copy(&self) -> usize {
        self.copy
    }

    pub fn scope(&self) -> &Arc<VariableScope> {
        &self.scope
    }

    /// Resolve `${name}` references in a configuration string.
    pub fn substitute(&self, input: &str) -> String {
        self.scope.substitute(input)
    }

    /// The registry this pipeline was built from; used by steps that spawn
    /// nested pipelines.
    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    /// Whether a pipeline-wide stop has been requested. Checked by the run
    /// loop between iterations; long-running plugins should check it inside
    /// their own inner loops too.
    pub fn stopped(&self) -> bool {
        self.stop.is_requested()
    }

    pub(crate) fn stop_signal(&self) -> &Arc<StopSignal> {
        &self.stop
    }

    /// Request pipeline-wide cooperative cancellation.
    pub fn request_stop(&self) {
        self.stop.request();
    }

    // ── Reading ──

    /// Next row from the merged input channels, rotating across them.
    /// `None` means every upstream producer finished and all queues are
    /// drained — or a stop was requested.
    pub fn get_row(&mut self) -> Option<(Arc<Schema>, Row)> {
        loop {
            if self.stop.is_requested() || self.inputs.is_empty() {
                return None;
            }
            let n = self.inputs.len();
            for offset in 0..n {
                let idx = (self.input_cursor + offset) % n;
                if let Some(pair) = self.inputs[idx].try_get() {
                    self.input_cursor = (idx + 1) % n;
                    self.metrics.read.fetch_add(1, Ordering::Relaxed);
                    return Some(pair);
                }
            }
            self.inputs.retain(|c| !c.is_exhausted());
            if self.inputs.is_empty() {
                return None;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Whether this copy has any input channels at all (false for source
    /// steps that were not given an injection channel).
    pub fn has_inputs(&self) -> bool {
        !self.inputs.is_empty()
    }

    // ── Writing ──

    /// Write a row to the step's primary output, honoring the configured
    /// distribution over all non-reserved downstream channels. Listeners
    /// fire exactly once per call.
    pub fn put_row(&mut self, schema: Arc<Schema>, row: Row) {
        self.notify_listeners(&schema, &row);
        self.metrics.written.fetch_add(1, Ordering::Relaxed);
        match self.distribution {
            RowDistribution::Replicate => {
                for &idx in &self.default_targets {
                    self.outputs[idx]
                        .channel
                        .put(Arc::clone(&schema), row.clone());
                }
            }
            RowDistribution::RoundRobin => {
                if self.default_targets.is_empty() {
                    return;
                }
                let pick = self.default_targets[self.out_cursor % self.default_targets.len()];
                self.out_cursor = self.out_cursor.wrapping_add(1);
                self.outputs[pick].channel.put(schema, row);
            }
        }
    }

    /// Write a row to the hop(s) leading to one named downstream step,
    /// rotating over that step's copies. Used by steps with addressed
    /// targets (the sub-pipeline executor's metrics/files/rows outputs).
    pub fn put_row_to(&mut self, target: &str, schema: Arc<Schema>, row: Row) -> StepResult<()> {
        self.notify_listeners(&schema, &row);
        let (indices, cursor) = self.addressed.get_mut(target).ok_or_else(|| {
            StepError::fatal(format!(
                "step '{}' has no hop to target step '{target}'",
                self.step_name
            ))
        })?;
        let pick = indices[*cursor % indices.len()];
        *cursor = cursor.wrapping_add(1);
        self.metrics.written.fetch_add(1, Ordering::Relaxed);
        self.outputs[pick].channel.put(schema, row);
        Ok(())
    }

    /// Divert a failed row to the error hop(s), appending the diagnostic
    /// code and message columns. Errors out when no error hop exists.
    pub fn put_error_row(
        &mut self,
        schema: Arc<Schema>,
        row: Row,
        code: &str,
        message: &str,
    ) -> StepResult<()> {
        if self.error_targets.is_empty() {
            return Err(StepError::fatal(format!(
                "step '{}' has no error hop for row error [{code}]: {message}",
                self.step_name
            )));
        }
        let error_schema = self.error_schema_for(&schema);
        let error_row = row.with_extended([
            Value::String(code.to_string()),
            Value::String(message.to_string()),
        ]);
        self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
        for &idx in &self.error_targets {
            self.outputs[idx]
                .channel
                .put(Arc::clone(&error_schema), error_row.clone());
        }
        Ok(())
    }

    fn error_schema_for(&mut self, input: &Arc<Schema>) -> Arc<Schema> {
        match &self.error_schema {
            Some((cached_input, derived)) if Arc::ptr_eq(cached_input, input) => {
                Arc::clone(derived)
            }
            _ => {
                let derived = Arc::new(input.with_columns([
                    Column::new(ERROR_CODE_COLUMN, ValueType::String),
                    Column::new(ERROR_MESSAGE_COLUMN, ValueType::String),
                ]));
                self.error_schema = Some((Arc::clone(input), Arc::clone(&derived)));
                derived
            }
        }
    }

    pub fn has_error_hop(&self) -> bool {
        !self.error_targets.is_empty()
    }

    /// Exclude the hops to the named consumers from plain `put_row`
    /// distribution; they stay reachable through `put_row_to`.
    pub fn reserve_targets<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.reserved.insert(name.to_string());
        }
        self.rebuild_routing();
    }

    /// Consumer step names reachable from this step's main hops.
    pub fn output_target_names(&self) -> Vec<String> {
        self.addressed.keys().cloned().collect()
    }

    fn notify_listeners(&self, schema: &Arc<Schema>, row: &Row) {
        let listeners = self.listeners.lock().expect("listener lock poisoned");
        for listener in listeners.iter() {
            listener(schema, row);
        }
    }

    // ── Counters & result contributions ──

    pub fn metrics(&self) -> &Arc<StepMetrics> {
        &self.metrics
    }

    pub fn inc_input(&self, n: u64) {
        self.metrics.input.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_output(&self, n: u64) {
        self.metrics.output.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_updated(&self, n: u64) {
        self.metrics.updated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_deleted(&self, n: u64) {
        self.metrics.deleted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_files_retrieved(&self, n: u64) {
        self.metrics.files_retrieved.fetch_add(n, Ordering::Relaxed);
    }

    /// Register a file as part of the run's result.
    pub fn add_result_file(&self, path: PathBuf) {
        self.files
            .lock()
            .expect("result files lock poisoned")
            .push(ResultFile {
                path,
                origin: self.step_name.clone(),
            });
    }

    /// Promote rows into the pipeline result's carried row list.
    pub fn add_result_rows(&self, schema: Arc<Schema>, rows: impl IntoIterator<Item = Row>) {
        let mut slot = self.result_rows.lock().expect("result rows lock poisoned");
        if slot.schema.is_none() {
            slot.schema = Some(schema);
        }
        slot.rows.extend(rows);
    }

    // ── Logging ──

    pub fn log(&self, message: &str) {
        tracing::debug!(step = %self.step_name, copy = self.copy, "{message}");
        self.log.append(
            &self.log_channel,
            &format!("{}.{}: {message}", self.step_name, self.copy),
        );
    }

    pub(crate) fn log_registry(&self) -> &Arc<LogRegistry> {
        &self.log
    }

    // ── Shutdown ──

    /// Flush-close all output channels and detach from the inputs. Called by
    /// the run loop after the plugin's last `process_row`.
    pub(crate) fn close_io(&mut self) {
        for slot in &self.outputs {
            slot.channel.finished();
        }
        for input in &self.inputs {
            input.consumer_finished();
        }
    }
}

fn run_loop(plugin: &mut dyn StepPlugin, ctx: &mut StepContext) -> StepState {
    loop {
        if ctx.stopped() {
            return StepState::Stopped;
        }
        match plugin.process_row(ctx) {
            Ok(true) => {}
            Ok(false) => return StepState::Finished,
            Err(StepError::Row {
                schema,
                row,
                code,
                message,
            }) if ctx.has_error_hop() => {
                // Recoverable: divert and keep going.
                if let Err(e) = ctx.put_error_row(schema, row, &code, &message) {
                    ctx.metrics().errors.fetch_add(1, Ordering::Relaxed);
                    ctx.log(&format!("error: {e}"));
                    ctx.request_stop();
                    return StepState::Failed;
                }
            }
            Err(e) => {
                ctx.metrics().errors.fetch_add(1, Ordering::Relaxed);
                ctx.log(&format!("error: {e}"));
                tracing::error!(step = %ctx.step_name(), copy = ctx.copy(), "step failed: {e}");
                ctx.request_stop();
                return StepState::Failed;
            }
        }
    }
}

/// Thread main for one (step, copy) pair. Owns the plugin and context for
/// the duration of the run and reports the terminal state through the shared
/// metrics. Channels are closed and `dispose` runs on every exit path,
/// including a panicking plugin — a silently unclosed channel would wedge
/// the downstream step.
pub(crate) fn run_step(mut plugin: Box<dyn StepPlugin>, mut ctx: StepContext) {
    ctx.metrics().set_state(StepState::Running);
    ctx.log("started");

    let terminal = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        run_loop(plugin.as_mut(), &mut ctx)
    })) {
        Ok(state) => state,
        Err(_) => {
            ctx.metrics().errors.fetch_add(1, Ordering::Relaxed);
            ctx.log("panicked");
            tracing::error!(step = %ctx.step_name(), copy = ctx.copy(), "step panicked");
            ctx.request_stop();
            StepState::Failed
        }
    };

    ctx.close_io();
    plugin.dispose();

    let counts = ctx.metrics().counts();
    ctx.log(&format!(
        "finished ({:?}, read={}, written={}, rejected={})",
        terminal, counts.read, counts.written, counts.rejected
    ));
    ctx.metrics().set_state(terminal);
}
