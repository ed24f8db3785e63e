//! Declarative pipeline graph — steps, hops, parameters.
//!
//! A `PipelineDef` is the already-validated in-memory form of an external
//! definition document (JSON or TOML via serde). It is immutable and shared
//! (`Arc`) between a pipeline run and any cached copies the sub-pipeline
//! executor holds; per-step business settings are an opaque
//! `serde_json::Value` the owning plugin parses itself.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// How a step spreads output rows over multiple downstream channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowDistribution {
    /// Rotate over output channels, one row each.
    #[default]
    RoundRobin,
    /// Copy every row to every output channel.
    Replicate,
}

/// Main data hop or error-diversion hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopKind {
    #[default]
    Main,
    Error,
}

/// One node of the processing graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    pub name: String,
    /// Registry type tag, e.g. `"generator"` or `"sub-pipeline"`.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Number of parallel copies. Each copy runs on its own thread.
    #[serde(default = "default_copies")]
    pub copies: usize,
    #[serde(default)]
    pub distribution: RowDistribution,
    /// Opaque per-step settings, parsed by the plugin in `init`.
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_copies() -> usize {
    1
}

/// A directed edge between two steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopDef {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: HopKind,
}

/// A parameter the pipeline declares, with an optional default applied to
/// the scope at prepare time when the caller did not set it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    #[serde(default)]
    pub default: Option<String>,
}

/// The full declarative graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDef {
    pub name: String,
    pub steps: Vec<StepDef>,
    #[serde(default)]
    pub hops: Vec<HopDef>,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    /// Hop capacity in rows. Zero means the engine default.
    #[serde(default)]
    pub channel_capacity: usize,
}

impl PipelineDef {
    pub fn step(&self, name: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Hops leaving `name`, in declaration order.
    pub fn hops_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HopDef> {
        self.hops.iter().filter(move |h| h.from == name)
    }

    /// Hops entering `name`, in declaration order.
    pub fn hops_into<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HopDef> {
        self.hops.iter().filter(move |h| h.to == name)
    }

    /// Structural validation: unique step names, no dangling hops, no
    /// self-loops, acyclic main-flow graph.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(EngineError::Definition(format!(
                "pipeline '{}' declares no steps",
                self.name
            )));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if self.steps[..i].iter().any(|s| s.name == step.name) {
                return Err(EngineError::Definition(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            if step.copies == 0 {
                return Err(EngineError::Definition(format!(
                    "step '{}' declares zero copies",
                    step.name
                )));
            }
        }
        for hop in &self.hops {
            if hop.from == hop.to {
                return Err(EngineError::Definition(format!(
                    "hop connects step '{}' to itself",
                    hop.from
                )));
            }
            for end in [&hop.from, &hop.to] {
                if self.step(end).is_none() {
                    return Err(EngineError::Definition(format!(
                        "hop references unknown step '{end}'"
                    )));
                }
            }
        }
        self.check_acyclic()
    }

    // Kahn's algorithm; a leftover node means a cycle.
    fn check_acyclic(&self) -> Result<()> {
        let n = self.steps.len();
        let index = |name: &str| self.steps.iter().position(|s| s.name == name).unwrap();
        let mut in_degree = vec![0u32; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for hop in &self.hops {
            let from = index(&hop.from);
            let to = index(&hop.to);
            adj[from].push(to);
            in_degree[to] += 1;
        }

        let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut scheduled = 0;
        while let Some(node) = queue.pop() {
            scheduled += 1;
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push(next);
                }
            }
        }
        if scheduled != n {
            return Err(EngineError::Definition(format!(
                "pipeline '{}' contains a cycle",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str) -> StepDef {
        StepDef {
            name: name.into(),
            step_type: "dummy".into(),
            copies: 1,
            distribution: RowDistribution::default(),
            settings: serde_json::Value::Null,
        }
    }

    fn hop(from: &str, to: &str) -> HopDef {
        HopDef {
            from: from.into(),
            to: to.into(),
            kind: HopKind::Main,
        }
    }

    fn def(steps: Vec<StepDef>, hops: Vec<HopDef>) -> PipelineDef {
        PipelineDef {
            name: "t".into(),
            steps,
            hops,
            parameters: Vec::new(),
            channel_capacity: 0,
        }
    }

    #[test]
    fn test_valid_linear_graph() {
        let d = def(
            vec![step("a"), step("b"), step("c")],
            vec![hop("a", "b"), hop("b", "c")],
        );
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_dangling_hop_rejected() {
        let d = def(vec![step("a")], vec![hop("a", "ghost")]);
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_step_name_rejected() {
        let d = def(vec![step("a"), step("a")], vec![]);
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_cycle_rejected() {
        let d = def(
            vec![step("a"), step("b")],
            vec![hop("a", "b"), hop("b", "a")],
        );
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_loop_rejected() {
        let d = def(vec![step("a")], vec![hop("a", "a")]);
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_deserialize_minimal_json() {
        let json = r#"{
            "name": "demo",
            "steps": [
                {"name": "gen", "type": "generator", "settings": {"limit": 3}},
                {"name": "out", "type": "dummy", "distribution": "replicate"}
            ],
            "hops": [{"from": "gen", "to": "out"}]
        }"#;
        let d: PipelineDef = serde_json::from_str(json).unwrap();
        assert_eq!(d.steps.len(), 2);
        assert_eq!(d.steps[0].copies, 1);
        assert_eq!(d.steps[1].distribution, RowDistribution::Replicate);
        assert!(d.validate().is_ok());
    }
}
