//! Test-only step plugins exercising the plugin contract from outside the
//! crate.

use rowflow::pipeline::{StepContext, StepDef, StepError, StepPlugin, StepResult, VariableScope};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Forwards rows after a cooperative sleep, so tests can hold a pipeline
/// mid-flight long enough to stop it.
pub struct SleeperStep {
    per_row: Duration,
}

#[derive(Deserialize)]
struct SleeperSettings {
    sleep_ms: u64,
}

impl Default for SleeperStep {
    fn default() -> Self {
        Self::new()
    }
}

impl SleeperStep {
    pub fn new() -> Self {
        Self {
            per_row: Duration::ZERO,
        }
    }
}

impl StepPlugin for SleeperStep {
    fn init(&mut self, def: &StepDef, _scope: &Arc<VariableScope>) -> StepResult<()> {
        let settings: SleeperSettings = serde_json::from_value(def.settings.clone())
            .map_err(|e| StepError::config(format!("invalid sleeper settings: {e}")))?;
        self.per_row = Duration::from_millis(settings.sleep_ms);
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<bool> {
        let Some((schema, row)) = ctx.get_row() else {
            return Ok(false);
        };
        // Sleep in slices so a stop request interrupts promptly.
        let slice = Duration::from_millis(5);
        let mut remaining = self.per_row;
        while remaining > Duration::ZERO && !ctx.stopped() {
            let nap = remaining.min(slice);
            std::thread::sleep(nap);
            remaining -= nap;
        }
        ctx.put_row(schema, row);
        Ok(true)
    }
}

/// Writes each row as one line to a file, registers the file in the result,
/// and releases the handle in `dispose`.
pub struct FileWriterStep {
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

#[derive(Deserialize)]
struct FileWriterSettings {
    path: String,
}

impl Default for FileWriterStep {
    fn default() -> Self {
        Self::new()
    }
}

impl FileWriterStep {
    pub fn new() -> Self {
        Self {
            path: None,
            writer: None,
        }
    }
}

impl StepPlugin for FileWriterStep {
    fn init(&mut self, def: &StepDef, scope: &Arc<VariableScope>) -> StepResult<()> {
        let settings: FileWriterSettings = serde_json::from_value(def.settings.clone())
            .map_err(|e| StepError::config(format!("invalid file-writer settings: {e}")))?;
        if settings.path.is_empty() {
            return Err(StepError::config("file-writer path is empty"));
        }
        self.path = Some(PathBuf::from(scope.substitute(&settings.path)));
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<bool> {
        let Some((_, row)) = ctx.get_row() else {
            return Ok(false);
        };
        if self.writer.is_none() {
            let path = self.path.clone().expect("initialized");
            let file = File::create(&path)
                .map_err(|e| StepError::fatal(format!("creating {}: {e}", path.display())))?;
            self.writer = Some(BufWriter::new(file));
            ctx.add_result_file(path);
        }
        let writer = self.writer.as_mut().expect("opened above");
        let line: Vec<String> = row.iter().map(|v| v.to_display_string()).collect();
        writeln!(writer, "{}", line.join(","))
            .map_err(|e| StepError::fatal(format!("write failed: {e}")))?;
        ctx.inc_output(1);
        Ok(true)
    }

    fn dispose(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}
