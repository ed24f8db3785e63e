//! Pipeline runtime — channel allocation, thread orchestration, and result
//! aggregation.
//!
//! A `Pipeline` takes an immutable [`PipelineDef`], prepares it (validation,
//! plugin instantiation, `init`, channel allocation — all on the caller's
//! thread), then spawns one OS thread per (step, copy) pair. Completion is
//! observed by joining every thread; cancellation is cooperative through the
//! shared [`StopSignal`] that every run loop and channel poll observes.
//!
//! Channel fan-out follows the copy counts on each hop: equal counts wire
//! copy `i` to copy `i`; unequal counts wire the full cross product, with
//! the consumer merging round-robin.

use crate::error::{EngineError, Result};
use crate::pipeline::channel::{
    PutResult, RowChannel, StopSignal, DEFAULT_CHANNEL_CAPACITY,
};
use crate::pipeline::graph::PipelineDef;
use crate::pipeline::logging::{LogChannelId, LogRegistry};
use crate::pipeline::registry::StepRegistry;
use crate::pipeline::result::{PipelineResult, ResultFile, RowCounts};
use crate::pipeline::step::{
    run_step, OutputSlot, ResultRows, RowListener, SharedListeners, StepContext, StepMetrics,
    StepPlugin, StepState,
};
use crate::pipeline::variables::VariableScope;
use crate::row::{Row, Schema};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

/// Pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PipelineState {
    #[default]
    Created,
    Prepared,
    Running,
    Finished,
}

/// One (step, copy) ready to run: the initialized plugin plus its wiring.
struct PreparedUnit {
    step_name: String,
    copy: usize,
    plugin: Box<dyn StepPlugin>,
    inputs: Vec<RowChannel>,
    outputs: Vec<OutputSlot>,
    metrics: Arc<StepMetrics>,
}

/// Live view of one (step, copy) after start.
pub struct StepHandle {
    pub step_name: String,
    pub copy: usize,
    pub metrics: Arc<StepMetrics>,
}

/// Injection handle for externally driven pipelines: lets a caller feed a
/// designated source step's input channel and signal end-of-stream.
pub struct RowProducer {
    channel: RowChannel,
}

impl RowProducer {
    /// Queue a row, blocking under backpressure. Returns
    /// [`PutResult::Closed`] once the pipeline is stopping or the consumer
    /// is gone.
    pub fn put_row(&self, schema: Arc<Schema>, row: Row) -> PutResult {
        self.channel.put(schema, row)
    }

    /// End of injected input; queued rows still flush to the consumer.
    pub fn finished(&self) {
        self.channel.finished();
    }
}

impl Drop for RowProducer {
    // A producer dropped without `finished()` would leave the fed step
    // blocked forever.
    fn drop(&mut self) {
        self.channel.finished();
    }
}

/// The runtime graph of steps and hops plus orchestration.
pub struct Pipeline {
    def: Arc<PipelineDef>,
    registry: Arc<StepRegistry>,
    scope: Arc<VariableScope>,
    log: Arc<LogRegistry>,
    log_channel: LogChannelId,
    stop: Arc<StopSignal>,
    state: PipelineState,
    units: Vec<PreparedUnit>,
    handles: Vec<StepHandle>,
    listeners: HashMap<String, SharedListeners>,
    files: Arc<Mutex<Vec<ResultFile>>>,
    result_rows: Arc<Mutex<ResultRows>>,
    threads: Vec<JoinHandle<()>>,
    started_at: Option<Instant>,
    result: Option<PipelineResult>,
}

impl Pipeline {
    /// A pipeline with its own fresh scope, log registry, and stop signal.
    pub fn new(def: Arc<PipelineDef>, registry: Arc<StepRegistry>) -> Self {
        Self::build(def, registry, VariableScope::root(), LogRegistry::new(), StopSignal::new())
    }

    fn build(
        def: Arc<PipelineDef>,
        registry: Arc<StepRegistry>,
        scope: Arc<VariableScope>,
        log: Arc<LogRegistry>,
        stop: Arc<StopSignal>,
    ) -> Self {
        Self {
            def,
            registry,
            scope,
            log,
            log_channel: String::new(),
            stop,
            state: PipelineState::Created,
            units: Vec::new(),
            handles: Vec::new(),
            listeners: HashMap::new(),
            files: Arc::new(Mutex::new(Vec::new())),
            result_rows: Arc::new(Mutex::new(ResultRows::default())),
            threads: Vec::new(),
            started_at: None,
            result: None,
        }
    }

    /// Use `scope` instead of a fresh root (e.g. a parent's scope shared by
    /// reference).
    pub fn with_scope(mut self, scope: Arc<VariableScope>) -> Self {
        self.scope = scope;
        self
    }

    /// Accumulate log text in `log` instead of a private registry.
    pub fn with_log_registry(mut self, log: Arc<LogRegistry>) -> Self {
        self.log = log;
        self
    }

    /// Link this pipeline's stop signal to a parent's: a parent stop is
    /// observed here, a stop here does not touch the parent.
    pub fn with_parent_stop(mut self, parent: &Arc<StopSignal>) -> Self {
        self.stop = StopSignal::child_of(parent);
        self
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn scope(&self) -> &Arc<VariableScope> {
        &self.scope
    }

    pub fn log_registry(&self) -> &Arc<LogRegistry> {
        &self.log
    }

    /// Log channel id of this run. Empty before `prepare`.
    pub fn log_channel_id(&self) -> &str {
        &self.log_channel
    }

    pub fn stop_signal(&self) -> &Arc<StopSignal> {
        &self.stop
    }

    // ── Preparation ──

    /// Validate the graph, apply declared parameter defaults, instantiate
    /// and `init` every plugin, and allocate all hop channels. Any failure
    /// here surfaces before a single thread is spawned.
    pub fn prepare(&mut self) -> Result<()> {
        if self.state != PipelineState::Created {
            return Err(EngineError::Lifecycle(format!(
                "prepare() called twice on pipeline '{}'",
                self.def.name
            )));
        }
        self.def.validate()?;

        for param in &self.def.parameters {
            if self.scope.get(&param.name).is_none() {
                if let Some(default) = &param.default {
                    self.scope.set(&param.name, default.clone());
                }
            }
        }

        self.log_channel = self.log.open_channel(&self.def.name);
        self.log
            .append(&self.log_channel, &format!("pipeline '{}' preparing", self.def.name));

        // One input/output channel list per (step, copy).
        let mut inputs: HashMap<(usize, usize), Vec<RowChannel>> = HashMap::new();
        let mut outputs: HashMap<(usize, usize), Vec<OutputSlot>> = HashMap::new();
        let index_of = |name: &str| {
            self.def
                .steps
                .iter()
                .position(|s| s.name == name)
                .expect("validated hop endpoint")
        };
        let capacity = if self.def.channel_capacity > 0 {
            self.def.channel_capacity
        } else {
            DEFAULT_CHANNEL_CAPACITY
        };

        for hop in &self.def.hops {
            let from = index_of(&hop.from);
            let to = index_of(&hop.to);
            let from_copies = self.def.steps[from].copies;
            let to_copies = self.def.steps[to].copies;

            let mut wire = |fc: usize, tc: usize| {
                let channel = RowChannel::new(capacity, Arc::clone(&self.stop));
                outputs.entry((from, fc)).or_default().push(OutputSlot {
                    channel: channel.clone(),
                    consumer: hop.to.clone(),
                    kind: hop.kind,
                });
                inputs.entry((to, tc)).or_default().push(channel);
            };

            if from_copies == to_copies {
                for c in 0..from_copies {
                    wire(c, c);
                }
            } else {
                for fc in 0..from_copies {
                    for tc in 0..to_copies {
                        wire(fc, tc);
                    }
                }
            }
        }

        for (idx, step) in self.def.steps.iter().enumerate() {
            self.listeners
                .insert(step.name.clone(), Arc::new(Mutex::new(Vec::new())));
            for copy in 0..step.copies {
                let mut plugin = self.registry.create(&step.step_type).ok_or_else(|| {
                    EngineError::Definition(format!(
                        "step '{}' has unknown type '{}'",
                        step.name, step.step_type
                    ))
                })?;
                plugin
                    .init(step, &self.scope)
                    .map_err(|e| EngineError::StepInit {
                        step: step.name.clone(),
                        message: e.to_string(),
                    })?;
                let metrics = Arc::new(StepMetrics::default());
                metrics.set_state(StepState::Initialized);
                self.units.push(PreparedUnit {
                    step_name: step.name.clone(),
                    copy,
                    plugin,
                    inputs: inputs.remove(&(idx, copy)).unwrap_or_default(),
                    outputs: outputs.remove(&(idx, copy)).unwrap_or_default(),
                    metrics,
                });
            }
        }

        self.state = PipelineState::Prepared;
        tracing::debug!(pipeline = %self.def.name, steps = self.units.len(), "prepared");
        Ok(())
    }

    // ── External feeding & observation ──

    /// Create an injection channel into `step` (copy 0) and return the
    /// producer handle. Must be called after `prepare` and before `start`.
    pub fn row_producer(&mut self, step: &str) -> Result<RowProducer> {
        self.row_producer_for_copy(step, 0)
    }

    pub fn row_producer_for_copy(&mut self, step: &str, copy: usize) -> Result<RowProducer> {
        if self.state != PipelineState::Prepared {
            return Err(EngineError::Lifecycle(
                "row_producer() requires a prepared, not yet started pipeline".into(),
            ));
        }
        let capacity = if self.def.channel_capacity > 0 {
            self.def.channel_capacity
        } else {
            DEFAULT_CHANNEL_CAPACITY
        };
        let unit = self
            .units
            .iter_mut()
            .find(|u| u.step_name == step && u.copy == copy)
            .ok_or_else(|| {
                EngineError::Definition(format!("no step '{step}' (copy {copy}) to inject into"))
            })?;
        let channel = RowChannel::new(capacity, Arc::clone(&self.stop));
        unit.inputs.push(channel.clone());
        Ok(RowProducer { channel })
    }

    /// Register a synchronous listener on every row `step` writes. Valid on
    /// a prepared or running pipeline.
    pub fn add_row_listener(&mut self, step: &str, listener: RowListener) -> Result<()> {
        let slot = self.listeners.get(step).ok_or_else(|| {
            EngineError::Definition(format!("no step '{step}' to observe"))
        })?;
        slot.lock().expect("listener lock poisoned").push(listener);
        Ok(())
    }

    // ── Execution ──

    /// Spawn one thread per (step, copy).
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Prepared {
            return Err(EngineError::Lifecycle(
                "start() requires a prepared pipeline".into(),
            ));
        }
        self.started_at = Some(Instant::now());
        self.log
            .append(&self.log_channel, &format!("pipeline '{}' starting", self.def.name));

        for unit in self.units.drain(..) {
            let listeners = Arc::clone(
                self.listeners
                    .get(&unit.step_name)
                    .expect("listeners prepared per step"),
            );
            let ctx = StepContext::new(
                unit.step_name.clone(),
                unit.copy,
                self.def
                    .step(&unit.step_name)
                    .expect("unit from validated def")
                    .distribution,
                unit.inputs,
                unit.outputs,
                listeners,
                Arc::clone(&unit.metrics),
                Arc::clone(&self.stop),
                Arc::clone(&self.scope),
                Arc::clone(&self.registry),
                Arc::clone(&self.log),
                self.log_channel.clone(),
                Arc::clone(&self.files),
                Arc::clone(&self.result_rows),
            );
            self.handles.push(StepHandle {
                step_name: unit.step_name.clone(),
                copy: unit.copy,
                metrics: unit.metrics,
            });
            let plugin = unit.plugin;
            let thread_name = format!("{}.{}", unit.step_name, unit.copy);
            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || run_step(plugin, ctx))?;
            self.threads.push(handle);
        }

        self.state = PipelineState::Running;
        tracing::info!(pipeline = %self.def.name, "started");
        Ok(())
    }

    /// Block until every step thread reached a terminal state, then
    /// aggregate the outcome. Idempotent: later calls return the cached
    /// result.
    pub fn wait_until_finished(&mut self) -> Result<PipelineResult> {
        match self.state {
            PipelineState::Running => {}
            PipelineState::Finished => {
                return Ok(self.result.clone().expect("finished pipeline has result"));
            }
            _ => {
                return Err(EngineError::Lifecycle(
                    "wait_until_finished() requires a started pipeline".into(),
                ));
            }
        }

        for handle in self.threads.drain(..) {
            // A panicking step thread is a bug in the plugin; surface it as
            // a pipeline error rather than unwinding the caller.
            if handle.join().is_err() {
                self.log
                    .append(&self.log_channel, "a step thread panicked");
                self.stop.request();
            }
        }

        let mut counts = RowCounts::default();
        let mut errors = 0u64;
        for handle in &self.handles {
            let c = handle.metrics.counts();
            counts.read = counts.read.max(c.read);
            counts.written = counts.written.max(c.written);
            counts.input = counts.input.max(c.input);
            counts.output = counts.output.max(c.output);
            counts.updated = counts.updated.max(c.updated);
            counts.deleted = counts.deleted.max(c.deleted);
            counts.rejected = counts.rejected.max(c.rejected);
            counts.files_retrieved = counts.files_retrieved.max(c.files_retrieved);
            errors += handle.metrics.errors.load(std::sync::atomic::Ordering::Relaxed);
        }

        self.log.append(
            &self.log_channel,
            &format!(
                "pipeline '{}' finished (errors={}, stopped={})",
                self.def.name, errors, self.stop.is_requested()
            ),
        );

        let rows_slot = self.result_rows.lock().expect("result rows lock poisoned");
        let result = PipelineResult {
            counts,
            errors,
            stopped: self.stop.is_requested(),
            duration: self
                .started_at
                .map(|t| t.elapsed())
                .unwrap_or_default(),
            files: self.files.lock().expect("result files lock poisoned").clone(),
            rows: rows_slot.rows.clone(),
            rows_schema: rows_slot.schema.clone(),
            log_text: self.log.text(&self.log_channel).unwrap_or_default(),
            log_channel_id: self.log_channel.clone(),
        };
        drop(rows_slot);

        tracing::info!(
            pipeline = %self.def.name,
            errors = result.errors,
            stopped = result.stopped,
            "finished"
        );

        self.state = PipelineState::Finished;
        self.result = Some(result.clone());
        Ok(result)
    }

    /// Cooperative pipeline-wide cancellation. Safe from any thread,
    /// idempotent; unblocks channel waits in bounded time and discards
    /// queued rows.
    pub fn stop_all(&self) {
        if !self.stop.is_requested() {
            tracing::info!(pipeline = %self.def.name, "stop requested");
            self.log
                .append(&self.log_channel, &format!("pipeline '{}' stop requested", self.def.name));
        }
        self.stop.request();
    }

    /// Convenience: prepare, start, and wait in one call.
    pub fn execute(&mut self) -> Result<PipelineResult> {
        self.prepare()?;
        self.start()?;
        self.wait_until_finished()
    }

    // ── Introspection ──

    /// Metrics handles of all copies of `step`, in copy order. Empty before
    /// `start`.
    pub fn step_metrics(&self, step: &str) -> Vec<Arc<StepMetrics>> {
        self.handles
            .iter()
            .filter(|h| h.step_name == step)
            .map(|h| Arc::clone(&h.metrics))
            .collect()
    }

    pub fn handles(&self) -> &[StepHandle] {
        &self.handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::{HopDef, RowDistribution, StepDef};

    fn def_json(json: &str) -> Arc<PipelineDef> {
        Arc::new(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_prepare_rejects_unknown_step_type() {
        let def = def_json(
            r#"{"name":"p","steps":[{"name":"a","type":"no-such-type"}],"hops":[]}"#,
        );
        let mut pipeline = Pipeline::new(def, Arc::new(StepRegistry::with_builtins()));
        let err = pipeline.prepare().unwrap_err();
        assert!(err.to_string().contains("no-such-type"));
    }

    #[test]
    fn test_prepare_applies_parameter_defaults() {
        let def = def_json(
            r#"{
                "name": "p",
                "steps": [{"name":"a","type":"dummy"}],
                "parameters": [{"name":"DIR","default":"/tmp"}]
            }"#,
        );
        let mut pipeline = Pipeline::new(def, Arc::new(StepRegistry::with_builtins()));
        pipeline.scope().set("PRESET", "kept");
        pipeline.prepare().unwrap();
        assert_eq!(pipeline.scope().get("DIR").as_deref(), Some("/tmp"));
        assert_eq!(pipeline.scope().get("PRESET").as_deref(), Some("kept"));
    }

    #[test]
    fn test_parameter_default_does_not_override_caller() {
        let def = def_json(
            r#"{
                "name": "p",
                "steps": [{"name":"a","type":"dummy"}],
                "parameters": [{"name":"DIR","default":"/tmp"}]
            }"#,
        );
        let mut pipeline = Pipeline::new(def, Arc::new(StepRegistry::with_builtins()));
        pipeline.scope().set("DIR", "/override");
        pipeline.prepare().unwrap();
        assert_eq!(pipeline.scope().get("DIR").as_deref(), Some("/override"));
    }

    #[test]
    fn test_lifecycle_order_enforced() {
        let def = Arc::new(PipelineDef {
            name: "p".into(),
            steps: vec![StepDef {
                name: "a".into(),
                step_type: "dummy".into(),
                copies: 1,
                distribution: RowDistribution::default(),
                settings: serde_json::Value::Null,
            }],
            hops: Vec::<HopDef>::new(),
            parameters: Vec::new(),
            channel_capacity: 0,
        });
        let mut pipeline = Pipeline::new(def, Arc::new(StepRegistry::with_builtins()));
        assert!(pipeline.start().is_err());
        assert!(pipeline.wait_until_finished().is_err());
        pipeline.prepare().unwrap();
        assert!(pipeline.prepare().is_err());
    }
}
