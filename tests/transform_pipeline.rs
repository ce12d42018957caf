// tests/transform_pipeline.rs
mod common;

use interaction_sync::transform::Frame;
use interaction_sync::{PipelineKind, StepRegistry, StepSpec, TransformError, Transformer};
use serde_json::{json, Value};

fn specs(v: Value) -> Vec<StepSpec> {
    serde_json::from_value(v).unwrap()
}

#[test]
fn shipped_config_compiles_every_pipeline() {
    let p = common::shipped_pipelines();
    assert_eq!(p.contacts.kind(), PipelineKind::Contacts);
    assert_eq!(p.transcript_summary.kind(), PipelineKind::TranscriptSummary);
    assert!(p.recording.step_names().contains(&"explode"));
}

#[test]
fn recording_pipeline_yields_flat_messages() {
    let p = common::shipped_pipelines();
    let out = p
        .recording
        .run_transforms(common::json(common::TRANSCRIPT_101))
        .unwrap();
    let messages = out["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    let first = messages[0].as_object().unwrap();
    let keys: Vec<&str> = first.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["contact_id", "dt", "party", "sender", "text"]);
    assert_eq!(first["contact_id"], json!(101));
    assert_eq!(first["dt"], json!("2019-01-01 10:00:05.000000"));
    assert!(messages[1]["text"].as_str().unwrap().contains("I'm"));
}

#[test]
fn contacts_pipeline_keeps_a_fixed_column_set() {
    let p = common::shipped_pipelines();
    let contacts = common::json(common::CONTACTS_IM);
    let rows: Vec<Value> = contacts
        .as_array()
        .unwrap()
        .iter()
        .map(|c| p.contacts.run_transforms(c.clone()).unwrap())
        .collect();
    let cols = |v: &Value| v.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
    assert!(rows.iter().all(|r| cols(r) == cols(&rows[0])));
    assert_eq!(rows[0]["queue_name"], json!("Youth Chat"));
    assert_eq!(rows[0]["start_time"], json!("2019-01-01 10:00:00.000000"));
    assert!(rows[2]["agent_id"].is_null());
}

#[test]
fn same_input_same_output() {
    let p = common::shipped_pipelines();
    let input = common::json(common::TRANSCRIPT_101);
    let a = p.recording.run_transforms(input.clone()).unwrap();
    let b = p.recording.run_transforms(input.clone()).unwrap();
    assert_eq!(a, b);
    assert_eq!(input, common::json(common::TRANSCRIPT_101));
}

#[test]
fn step_order_matters_and_is_deterministic() {
    let reg = StepRegistry::builtin();
    let rename_first = Transformer::new(
        PipelineKind::Contacts,
        &specs(json!([
            {"step": "rename", "args": {"map": {"A": "a"}}},
            {"step": "select", "args": {"keys": ["a"]}}
        ])),
        &reg,
    )
    .unwrap();
    let select_first = Transformer::new(
        PipelineKind::Contacts,
        &specs(json!([
            {"step": "select", "args": {"keys": ["a"]}},
            {"step": "rename", "args": {"map": {"A": "a"}}}
        ])),
        &reg,
    )
    .unwrap();
    let input = json!({"A": 1, "b": 2});
    let x = rename_first.run_transforms(input.clone()).unwrap();
    let y = select_first.run_transforms(input.clone()).unwrap();
    assert_eq!(x, json!({"a": 1}));
    assert_eq!(y, json!({"a": null}));
    assert_eq!(y, select_first.run_transforms(input).unwrap());
}

#[test]
fn unknown_steps_fail_at_construction() {
    let err = Transformer::new(
        PipelineKind::Transcripts,
        &specs(json!([{"step": "sort_by", "args": {"columns": ["dt"]}}, {"step": "gap_second"}])),
        &StepRegistry::builtin(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        TransformError::UnknownStep {
            name: "gap_second".into(),
            suggestion: Some("gap_seconds".into())
        }
    );
}

#[test]
fn frame_pipeline_runs_row_steps_row_wise() {
    let t = Transformer::new(
        PipelineKind::Transcripts,
        &specs(json!([
            {"step": "snake_case_keys"},
            {"step": "sort_by", "args": {"columns": ["dt"]}},
            {"step": "gap_seconds", "args": {"time_column": "dt", "into": "gap"}}
        ])),
        &StepRegistry::builtin(),
    )
    .unwrap();
    let frame: Frame = vec![
        json!({"DT": "2019-01-01 10:00:10"}),
        json!({"DT": "2019-01-01 10:00:00"}),
    ]
    .into_iter()
    .map(|v| v.as_object().unwrap().clone())
    .collect();
    // `DT` snake-cases to `dt`.
    let out = t.run_df_transforms(frame).unwrap();
    assert!(out[0]["gap"].is_null());
    assert_eq!(out[1]["gap"], json!(10.0));
}
