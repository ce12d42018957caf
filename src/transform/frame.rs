// src/transform/frame.rs
//! Frame steps over a tabular batch (`Vec<Record>`), plus the value helpers
//! shared with summary steps.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use super::registry::{Args, Step, StepRegistry};
use super::Frame;
use crate::error::TransformError;
use crate::model::Record;

pub(crate) fn register(r: &mut StepRegistry) {
    r.register("sort_by", sort_by);
    r.register("filter_not_null", filter_not_null);
    r.register("filter_equals", filter_equals);
    r.register("elapsed_seconds", elapsed_seconds);
    r.register("gap_seconds", gap_seconds);
    r.register("text_length", text_length);
}

const TS_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Accepts the service format, the canonical store format, and RFC 3339.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    TS_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

/// Fixed-width so that lexical order matches time order.
pub fn canonical_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

pub(crate) fn value_timestamp(v: &Value) -> Option<NaiveDateTime> {
    v.as_str().and_then(parse_timestamp)
}

pub(crate) fn value_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Total order: null < bool < number < string < array < object.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => x
                .as_f64()
                .unwrap_or(f64::NAN)
                .total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn frame_step<F>(f: F) -> Step
where
    F: Fn(Frame) -> Result<Frame, TransformError> + Send + Sync + 'static,
{
    Step::Frame(Arc::new(f))
}

fn sort_by(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let columns = args.str_list("columns")?;
    if columns.is_empty() {
        return Err(args.err("`columns` must not be empty"));
    }
    Ok(frame_step(move |mut frame| {
        frame.sort_by(|a, b| {
            columns.iter().fold(Ordering::Equal, |acc, c| {
                acc.then_with(|| {
                    cmp_values(
                        a.get(c).unwrap_or(&Value::Null),
                        b.get(c).unwrap_or(&Value::Null),
                    )
                })
            })
        });
        Ok(frame)
    }))
}

fn filter_not_null(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let column = args.str("column")?;
    Ok(frame_step(move |frame| {
        Ok(frame
            .into_iter()
            .filter(|r| r.get(&column).is_some_and(|v| !v.is_null()))
            .collect())
    }))
}

fn filter_equals(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let column = args.str("column")?;
    let value = args
        .value("value")
        .cloned()
        .ok_or_else(|| args.err("missing `value`"))?;
    Ok(frame_step(move |frame| {
        Ok(frame
            .into_iter()
            .filter(|r| r.get(&column) == Some(&value))
            .collect())
    }))
}

/// Group key of a row, rendered as text so any scalar can be a key.
fn group_key(row: &Record, group_by: &Option<String>) -> String {
    match group_by {
        Some(g) => row.get(g).map(|v| v.to_string()).unwrap_or_default(),
        None => String::new(),
    }
}

/// Shared shape of `elapsed_seconds` and `gap_seconds`: the reference time is
/// either the group's first timestamp or the previous row's.
fn time_delta_step(args: &Args<'_>, since_previous: bool) -> Result<Step, TransformError> {
    let time_column = args.str("time_column")?;
    let into = args.str("into")?;
    let group_by = args.opt_str("group_by")?;
    Ok(frame_step(move |mut frame| {
        let mut reference: HashMap<String, NaiveDateTime> = HashMap::new();
        for row in frame.iter_mut() {
            let key = group_key(row, &group_by);
            let ts = row.get(&time_column).and_then(value_timestamp);
            let delta = match (ts, reference.get(&key)) {
                (Some(t), Some(r)) => {
                    Value::from((t - *r).num_milliseconds() as f64 / 1_000.0)
                }
                (Some(_), None) if !since_previous => Value::from(0.0),
                _ => Value::Null,
            };
            if let Some(t) = ts {
                if since_previous || !reference.contains_key(&key) {
                    reference.insert(key, t);
                }
            }
            row.insert(into.clone(), delta);
        }
        Ok(frame)
    }))
}

fn elapsed_seconds(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    time_delta_step(args, false)
}

fn gap_seconds(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    time_delta_step(args, true)
}

fn text_length(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let column = args.str("column")?;
    let into = args.str("into")?;
    let words = match args.opt_str("unit")?.as_deref() {
        None | Some("chars") => false,
        Some("words") => true,
        Some(other) => return Err(args.err(format!("unknown unit `{other}`"))),
    };
    Ok(frame_step(move |mut frame| {
        for row in frame.iter_mut() {
            let len = match row.get(&column) {
                Some(Value::String(s)) if words => Value::from(s.split_whitespace().count()),
                Some(Value::String(s)) => Value::from(s.chars().count()),
                _ => Value::Null,
            };
            row.insert(into.clone(), len);
        }
        Ok(frame)
    }))
}
