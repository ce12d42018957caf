// src/transform/registry.rs
//! Name → step factory registry. Steps are compiled (and their arguments
//! validated) once, when a `Transformer` is built.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{frame, record, summary, Frame, StepSpec};
use crate::error::TransformError;
use crate::model::Record;

pub type RecordFn = Arc<dyn Fn(Value) -> Result<Value, TransformError> + Send + Sync>;
pub type FrameFn = Arc<dyn Fn(Frame) -> Result<Frame, TransformError> + Send + Sync>;
pub type SummaryFn = Arc<dyn Fn(&Frame, Record) -> Result<Record, TransformError> + Send + Sync>;

/// A compiled, pure step.
#[derive(Clone)]
pub enum Step {
    /// One nested record in, one out. Applied row-wise inside frame pipelines.
    Record(RecordFn),
    /// Whole tabular batch in, batch out.
    Frame(FrameFn),
    /// Reads the working frame, extends the summary record.
    Summary(SummaryFn),
}

impl Step {
    pub fn family(&self) -> &'static str {
        match self {
            Step::Record(_) => "record",
            Step::Frame(_) => "frame",
            Step::Summary(_) => "summary",
        }
    }
}

pub type StepFactory = fn(&Args<'_>, &StepRegistry) -> Result<Step, TransformError>;

#[derive(Clone)]
pub struct StepRegistry {
    factories: BTreeMap<&'static str, StepFactory>,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StepRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in step.
    pub fn builtin() -> Self {
        let mut r = Self::empty();
        record::register(&mut r);
        frame::register(&mut r);
        summary::register(&mut r);
        r
    }

    pub fn register(&mut self, name: &'static str, factory: StepFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn compile(&self, spec: &StepSpec) -> Result<Step, TransformError> {
        let factory = self
            .factories
            .get(spec.step.as_str())
            .ok_or_else(|| TransformError::UnknownStep {
                name: spec.step.clone(),
                suggestion: self.closest(&spec.step),
            })?;
        let args = Args {
            step: &spec.step,
            map: &spec.args,
        };
        factory(&args, self)
    }

    fn closest(&self, name: &str) -> Option<String> {
        self.factories
            .keys()
            .map(|k| (strsim::jaro_winkler(name, k), *k))
            .filter(|(score, _)| *score >= 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, k)| k.to_string())
    }
}

/// Typed accessors over a step's raw argument map.
pub struct Args<'a> {
    pub step: &'a str,
    pub map: &'a Map<String, Value>,
}

impl<'a> Args<'a> {
    pub fn err(&self, reason: impl Into<String>) -> TransformError {
        TransformError::args(self.step, reason)
    }

    pub fn value(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key)
    }

    pub fn str(&self, key: &str) -> Result<String, TransformError> {
        self.opt_str(key)?
            .ok_or_else(|| self.err(format!("missing string argument `{key}`")))
    }

    pub fn opt_str(&self, key: &str) -> Result<Option<String>, TransformError> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.err(format!("`{key}` must be a string"))),
        }
    }

    pub fn str_list(&self, key: &str) -> Result<Vec<String>, TransformError> {
        match self.map.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.err(format!("`{key}` must contain only strings")))
                })
                .collect(),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            _ => Err(self.err(format!("missing list argument `{key}`"))),
        }
    }

    /// A `{ from = "to" }` table as ordered pairs.
    pub fn str_map(&self, key: &str) -> Result<Vec<(String, String)>, TransformError> {
        let Some(Value::Object(m)) = self.map.get(key) else {
            return Err(self.err(format!("missing table argument `{key}`")));
        };
        m.iter()
            .map(|(k, v)| {
                v.as_str()
                    .map(|s| (k.clone(), s.to_string()))
                    .ok_or_else(|| self.err(format!("`{key}.{k}` must be a string")))
            })
            .collect()
    }

    pub fn object(&self, key: &str) -> Result<Map<String, Value>, TransformError> {
        match self.map.get(key) {
            Some(Value::Object(m)) => Ok(m.clone()),
            _ => Err(self.err(format!("missing table argument `{key}`"))),
        }
    }
}
