// src/transform/summary.rs
//! Summary steps: fold the working frame into fields of one summary record.
//! Undefined results (mean of nothing, division by zero) are written as null.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use super::frame::{value_f64, value_timestamp};
use super::registry::{Args, Step, StepRegistry};
use super::Frame;
use crate::error::TransformError;
use crate::model::Record;

pub(crate) fn register(r: &mut StepRegistry) {
    r.register("count", count);
    r.register("aggregate", aggregate);
    r.register("duration_seconds", duration_seconds);
    r.register("ratio", ratio);
}

fn summary_step<F>(f: F) -> Step
where
    F: Fn(&Frame, Record) -> Result<Record, TransformError> + Send + Sync + 'static,
{
    Step::Summary(Arc::new(f))
}

fn count(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let into = args.str("into")?;
    let column = args.opt_str("column")?;
    let equals = args.value("equals").cloned();
    if equals.is_some() && column.is_none() {
        return Err(args.err("`equals` requires `column`"));
    }
    Ok(summary_step(move |frame, mut summary| {
        let n = frame
            .iter()
            .filter(|row| match (&column, &equals) {
                (None, _) => true,
                (Some(c), None) => row.get(c).is_some_and(|v| !v.is_null()),
                (Some(c), Some(e)) => row.get(c) == Some(e),
            })
            .count();
        summary.insert(into.clone(), Value::from(n));
        Ok(summary)
    }))
}

#[derive(Debug, Clone, Copy)]
enum AggFn {
    Sum,
    Mean,
    Min,
    Max,
    First,
    Last,
    CountDistinct,
}

fn aggregate(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let column = args.str("column")?;
    let into = args.str("into")?;
    let func = match args.str("func")?.as_str() {
        "sum" => AggFn::Sum,
        "mean" => AggFn::Mean,
        "min" => AggFn::Min,
        "max" => AggFn::Max,
        "first" => AggFn::First,
        "last" => AggFn::Last,
        "count_distinct" => AggFn::CountDistinct,
        other => return Err(args.err(format!("unknown aggregate `{other}`"))),
    };
    Ok(summary_step(move |frame, mut summary| {
        let mut present = frame
            .iter()
            .filter_map(|row| row.get(&column))
            .filter(|v| !v.is_null());
        let value = match func {
            AggFn::First => present.next().cloned().unwrap_or(Value::Null),
            AggFn::Last => present.last().cloned().unwrap_or(Value::Null),
            AggFn::CountDistinct => {
                let distinct: BTreeSet<String> = present.map(|v| v.to_string()).collect();
                Value::from(distinct.len())
            }
            numeric => {
                let nums: Vec<f64> = present.filter_map(value_f64).collect();
                fold_numeric(numeric, &nums)
            }
        };
        summary.insert(into.clone(), value);
        Ok(summary)
    }))
}

fn fold_numeric(func: AggFn, nums: &[f64]) -> Value {
    match func {
        // Sum of nothing is zero; everything else is undefined.
        AggFn::Sum => Value::from(nums.iter().sum::<f64>()),
        _ if nums.is_empty() => Value::Null,
        AggFn::Mean => Value::from(nums.iter().sum::<f64>() / nums.len() as f64),
        AggFn::Min => Value::from(nums.iter().copied().fold(f64::INFINITY, f64::min)),
        AggFn::Max => Value::from(nums.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        _ => Value::Null,
    }
}

fn duration_seconds(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let time_column = args.str("time_column")?;
    let into = args.str("into")?;
    Ok(summary_step(move |frame, mut summary| {
        let times: Vec<_> = frame
            .iter()
            .filter_map(|row| row.get(&time_column).and_then(value_timestamp))
            .collect();
        let value = match (times.iter().min(), times.iter().max()) {
            (Some(lo), Some(hi)) => Value::from((*hi - *lo).num_milliseconds() as f64 / 1_000.0),
            _ => Value::Null,
        };
        summary.insert(into.clone(), value);
        Ok(summary)
    }))
}

fn ratio(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let numerator = args.str("numerator")?;
    let denominator = args.str("denominator")?;
    let into = args.str("into")?;
    Ok(summary_step(move |_frame, mut summary| {
        let num = summary.get(&numerator).and_then(value_f64);
        let den = summary.get(&denominator).and_then(value_f64);
        let value = match (num, den) {
            (Some(n), Some(d)) if d != 0.0 => Value::from(n / d),
            _ => Value::Null,
        };
        summary.insert(into.clone(), value);
        Ok(summary)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::StepSpec;
    use serde_json::json;

    fn apply(specs: Value, frame: Frame) -> Record {
        let specs: Vec<StepSpec> = serde_json::from_value(specs).unwrap();
        let reg = StepRegistry::builtin();
        specs.iter().fold(Record::new(), |acc, s| match reg.compile(s).ok().unwrap() {
            Step::Summary(f) => f(&frame, acc).unwrap(),
            _ => panic!("not a summary step"),
        })
    }

    fn frame(v: Value) -> Frame {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn aggregates_over_present_values() {
        let f = frame(json!([
            {"who": "agent", "len": 4, "dt": "2019-01-01 10:00:00"},
            {"who": "visitor", "len": null, "dt": "2019-01-01 10:02:00"},
            {"who": "agent", "len": 8, "dt": "2019-01-01 10:01:00"}
        ]));
        let s = apply(
            json!([
                {"step": "count", "args": {"into": "n"}},
                {"step": "count", "args": {"into": "agent_n", "column": "who", "equals": "agent"}},
                {"step": "aggregate", "args": {"column": "len", "func": "mean", "into": "mean_len"}},
                {"step": "aggregate", "args": {"column": "len", "func": "max", "into": "max_len"}},
                {"step": "aggregate", "args": {"column": "who", "func": "count_distinct", "into": "parties"}},
                {"step": "aggregate", "args": {"column": "who", "func": "last", "into": "last_who"}},
                {"step": "duration_seconds", "args": {"time_column": "dt", "into": "duration"}},
                {"step": "ratio", "args": {"numerator": "agent_n", "denominator": "n", "into": "agent_share"}}
            ]),
            f,
        );
        assert_eq!(s["n"], json!(3));
        assert_eq!(s["agent_n"], json!(2));
        assert_eq!(s["mean_len"], json!(6.0));
        assert_eq!(s["max_len"], json!(8.0));
        assert_eq!(s["parties"], json!(2));
        assert_eq!(s["last_who"], json!("agent"));
        assert_eq!(s["duration"], json!(120.0));
        assert!((s["agent_share"].as_f64().unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn undefined_results_are_null() {
        let s = apply(
            json!([
                {"step": "aggregate", "args": {"column": "len", "func": "mean", "into": "mean_len"}},
                {"step": "aggregate", "args": {"column": "len", "func": "sum", "into": "total"}},
                {"step": "duration_seconds", "args": {"time_column": "dt", "into": "duration"}},
                {"step": "ratio", "args": {"numerator": "total", "denominator": "total", "into": "r"}}
            ]),
            Vec::new(),
        );
        assert!(s["mean_len"].is_null());
        assert_eq!(s["total"], json!(0.0));
        assert!(s["duration"].is_null());
        assert!(s["r"].is_null());
    }
}
