// src/transform/mod.rs
//! Declarative transform pipeline.
//!
//! A `Transformer` is compiled from an ordered list of `StepSpec`s for one
//! `PipelineKind`. Steps run strictly left to right: step *i+1* always sees
//! exactly the output of step *i*. Compiled steps are pure and hold no
//! mutable state, so one `Transformer` can be shared across threads.
//!
//! Modes follow the pipeline kind:
//! - `contacts`, `recording` → record mode (`run_transforms`)
//! - `transcripts` → frame mode (`run_df_transforms`)
//! - `transcript_summary` → summary mode (`run_meta_df_transforms`)

pub mod frame;
pub mod record;
pub mod registry;
pub mod summary;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::transforms::TransformsConfig;
use crate::error::TransformError;
use crate::model::Record;

pub use registry::{Step, StepRegistry};

/// A tabular batch: every element is one flat row.
pub type Frame = Vec<Record>;

/// One entry of a pipeline definition, e.g. `{ step = "rename", args = { map = { A = "a" } } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub step: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl StepSpec {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            args: Map::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: Value) -> Self {
        self.args.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Contacts,
    Recording,
    Transcripts,
    TranscriptSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Record,
    Frame,
    Summary,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Mode::Record => "record",
            Mode::Frame => "frame",
            Mode::Summary => "summary",
        }
    }

    fn accepts(&self, step: &Step) -> bool {
        match (self, step) {
            (_, Step::Record(_)) => true,
            (Mode::Frame | Mode::Summary, Step::Frame(_)) => true,
            (Mode::Summary, Step::Summary(_)) => true,
            _ => false,
        }
    }
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 4] = [
        PipelineKind::Contacts,
        PipelineKind::Recording,
        PipelineKind::Transcripts,
        PipelineKind::TranscriptSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Contacts => "contacts",
            PipelineKind::Recording => "recording",
            PipelineKind::Transcripts => "transcripts",
            PipelineKind::TranscriptSummary => "transcript_summary",
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            PipelineKind::Contacts | PipelineKind::Recording => Mode::Record,
            PipelineKind::Transcripts => Mode::Frame,
            PipelineKind::TranscriptSummary => Mode::Summary,
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
struct CompiledStep {
    name: String,
    step: Step,
}

#[derive(Clone)]
pub struct Transformer {
    kind: PipelineKind,
    steps: Vec<CompiledStep>,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("kind", &self.kind)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Transformer {
    /// Compile and validate every step up front.
    pub fn new(
        kind: PipelineKind,
        specs: &[StepSpec],
        registry: &StepRegistry,
    ) -> Result<Self, TransformError> {
        let mode = kind.mode();
        let mut steps = Vec::with_capacity(specs.len());
        for spec in specs {
            let step = registry.compile(spec)?;
            if !mode.accepts(&step) {
                return Err(TransformError::StepNotApplicable {
                    step: spec.step.clone(),
                    mode: mode.as_str(),
                });
            }
            steps.push(CompiledStep {
                name: spec.step.clone(),
                step,
            });
        }
        Ok(Self { kind, steps })
    }

    pub fn from_config(
        kind: PipelineKind,
        config: &TransformsConfig,
        registry: &StepRegistry,
    ) -> Result<Self, TransformError> {
        let specs = config
            .pipeline(kind)
            .ok_or_else(|| TransformError::MissingPipeline(kind.to_string()))?;
        Self::new(kind, specs, registry)
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Apply the record steps to one nested record.
    pub fn run_transforms(&self, record: Value) -> Result<Value, TransformError> {
        self.steps.iter().try_fold(record, |acc, s| match &s.step {
            Step::Record(f) => f(acc),
            _ => Err(TransformError::StepNotApplicable {
                step: s.name.clone(),
                mode: Mode::Record.as_str(),
            }),
        })
    }

    /// Apply the pipeline to a tabular batch; record steps run row by row.
    pub fn run_df_transforms(&self, frame: Frame) -> Result<Frame, TransformError> {
        self.steps.iter().try_fold(frame, |acc, s| match &s.step {
            Step::Record(f) => map_rows(&s.name, f, acc),
            Step::Frame(f) => f(acc),
            Step::Summary(_) => Err(TransformError::StepNotApplicable {
                step: s.name.clone(),
                mode: Mode::Frame.as_str(),
            }),
        })
    }

    /// Fold a batch into one summary record. Record and frame steps reshape
    /// the working frame; summary steps add fields computed from it.
    pub fn run_meta_df_transforms(&self, frame: Frame) -> Result<Record, TransformError> {
        let (_, summary) = self.steps.iter().try_fold(
            (frame, Record::new()),
            |(frame, summary), s| match &s.step {
                Step::Record(f) => Ok((map_rows(&s.name, f, frame)?, summary)),
                Step::Frame(f) => Ok((f(frame)?, summary)),
                Step::Summary(f) => {
                    let next = f(&frame, summary)?;
                    Ok((frame, next))
                }
            },
        )?;
        Ok(summary)
    }

    /// One summary per distinct value of `key`, in first-seen order. The key
    /// column is written into each summary.
    pub fn summarize_groups(&self, frame: Frame, key: &str) -> Result<Vec<Record>, TransformError> {
        let mut groups: Vec<(Value, Frame)> = Vec::new();
        for row in frame {
            let k = row.get(key).cloned().unwrap_or(Value::Null);
            match groups.iter_mut().find(|(g, _)| *g == k) {
                Some((_, rows)) => rows.push(row),
                None => groups.push((k, vec![row])),
            }
        }
        groups
            .into_iter()
            .map(|(k, rows)| {
                let mut summary = self.run_meta_df_transforms(rows)?;
                summary.insert(key.to_string(), k);
                Ok(summary)
            })
            .collect()
    }
}

fn map_rows(
    name: &str,
    f: &registry::RecordFn,
    frame: Frame,
) -> Result<Frame, TransformError> {
    frame
        .into_iter()
        .map(|row| match f(Value::Object(row))? {
            Value::Object(out) => Ok(out),
            _ => Err(TransformError::shape(name, "row steps to return objects")),
        })
        .collect()
}
