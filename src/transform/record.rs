// src/transform/record.rs
//! Record steps: pure `Value -> Value` functions over one nested record.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{Map, Value};

use super::frame::{canonical_timestamp, parse_timestamp};
use super::registry::{Args, Step, StepRegistry};
use super::StepSpec;
use crate::error::TransformError;

pub(crate) fn register(r: &mut StepRegistry) {
    r.register("flatten", flatten);
    r.register("rename", rename);
    r.register("select", select);
    r.register("drop", drop_keys);
    r.register("snake_case_keys", snake_case_keys);
    r.register("cast", cast);
    r.register("defaults", defaults);
    r.register("decode_html", decode_html);
    r.register("explode", explode);
    r.register("map_each", map_each);
}

fn object_step<F>(name: &str, f: F) -> Step
where
    F: Fn(Map<String, Value>) -> Result<Map<String, Value>, TransformError> + Send + Sync + 'static,
{
    let name = name.to_string();
    Step::Record(Arc::new(move |v: Value| match v {
        Value::Object(m) => f(m).map(Value::Object),
        _ => Err(TransformError::shape(&name, "an object record")),
    }))
}

fn flatten(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let sep = args.opt_str("separator")?.unwrap_or_else(|| "_".into());
    Ok(object_step(args.step, move |m| {
        let mut out = Map::new();
        flatten_into(&mut out, None, m, &sep);
        Ok(out)
    }))
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, m: Map<String, Value>, sep: &str) {
    for (k, v) in m {
        let key = match prefix {
            Some(p) => format!("{p}{sep}{k}"),
            None => k,
        };
        match v {
            Value::Object(inner) if !inner.is_empty() => flatten_into(out, Some(&key), inner, sep),
            Value::Object(_) => {
                out.insert(key, Value::Null);
            }
            other => {
                out.insert(key, other);
            }
        }
    }
}

fn rename(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let pairs = args.str_map("map")?;
    Ok(object_step(args.step, move |mut m| {
        let mut moved = Vec::with_capacity(pairs.len());
        for (from, to) in &pairs {
            if let Some(v) = m.remove(from) {
                moved.push((to.clone(), v));
            }
        }
        m.extend(moved);
        Ok(m)
    }))
}

fn select(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let keys = args.str_list("keys")?;
    Ok(object_step(args.step, move |mut m| {
        Ok(keys
            .iter()
            .map(|k| (k.clone(), m.remove(k).unwrap_or(Value::Null)))
            .collect())
    }))
}

fn drop_keys(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let keys = args.str_list("keys")?;
    Ok(object_step(args.step, move |mut m| {
        for k in &keys {
            m.remove(k);
        }
        Ok(m)
    }))
}

fn snake_case_keys(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    Ok(object_step(args.step, |m| {
        Ok(m.into_iter().map(|(k, v)| (to_snake_case(&k), v)).collect())
    }))
}

/// `ContactID` → `contact_id`, `StartTime` → `start_time`, `IMText` → `im_text`.
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' || c == '.' {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if (prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower))
                && !out.ends_with('_')
            {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[derive(Debug, Clone, Copy)]
enum CastTo {
    Int,
    Float,
    Bool,
    Text,
    Timestamp,
}

fn cast(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let columns = args
        .str_map("columns")?
        .into_iter()
        .map(|(k, t)| {
            let to = match t.as_str() {
                "int" => CastTo::Int,
                "float" => CastTo::Float,
                "bool" => CastTo::Bool,
                "string" => CastTo::Text,
                "timestamp" => CastTo::Timestamp,
                other => return Err(args.err(format!("unknown cast target `{other}` for `{k}`"))),
            };
            Ok((k, to))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(object_step(args.step, move |mut m| {
        for (k, to) in &columns {
            if let Some(v) = m.get_mut(k) {
                *v = cast_value(std::mem::take(v), *to);
            }
        }
        Ok(m)
    }))
}

/// Coercing cast: values that cannot be converted become null.
fn cast_value(v: Value, to: CastTo) -> Value {
    match (to, v) {
        (_, Value::Null) => Value::Null,
        (CastTo::Int, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(whole_f64_to_i64))
            .map(Value::from)
            .unwrap_or(Value::Null),
        (CastTo::Int, Value::String(s)) => s.trim().parse::<i64>().map(Value::from).unwrap_or(Value::Null),
        (CastTo::Int, Value::Bool(b)) => Value::from(b as i64),
        (CastTo::Float, Value::Number(n)) => n.as_f64().map(Value::from).unwrap_or(Value::Null),
        (CastTo::Float, Value::String(s)) => s.trim().parse::<f64>().map(Value::from).unwrap_or(Value::Null),
        (CastTo::Bool, Value::Bool(b)) => Value::Bool(b),
        (CastTo::Bool, Value::Number(n)) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        (CastTo::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => Value::Bool(true),
            "false" | "f" | "no" | "0" => Value::Bool(false),
            _ => Value::Null,
        },
        (CastTo::Text, Value::String(s)) => Value::String(s),
        (CastTo::Text, other) => Value::String(other.to_string()),
        (CastTo::Timestamp, Value::String(s)) => parse_timestamp(&s)
            .map(|ts| Value::String(canonical_timestamp(&ts)))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Whole floats inside the i64 range; anything else has no integer value.
fn whole_f64_to_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

fn defaults(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let values = args.object("values")?;
    Ok(object_step(args.step, move |mut m| {
        for (k, d) in &values {
            let slot = m.entry(k.clone()).or_insert(Value::Null);
            if slot.is_null() {
                *slot = d.clone();
            }
        }
        Ok(m)
    }))
}

fn decode_html(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let keys = args.str_list("keys")?;
    Ok(object_step(args.step, move |mut m| {
        for k in &keys {
            if let Some(Value::String(s)) = m.get_mut(k) {
                *s = clean_html(s);
            }
        }
        Ok(m)
    }))
}

/// Entity decode, tag strip, whitespace collapse.
pub fn clean_html(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));

    let stripped = re_tags.replace_all(s, " ");
    let decoded = html_escape::decode_html_entities(&stripped).replace('\u{a0}', " ");
    re_ws.replace_all(&decoded, " ").trim().to_string()
}

fn path_of(args: &Args<'_>, key: &str) -> Result<Vec<String>, TransformError> {
    let raw = args.str(key)?;
    let parts: Vec<String> = raw.split('.').map(str::to_string).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(args.err(format!("`{key}` is not a valid dotted path: {raw}")));
    }
    Ok(parts)
}

fn take_path(m: &mut Map<String, Value>, path: &[String]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut cur = m;
    for p in parents {
        cur = cur.get_mut(p)?.as_object_mut()?;
    }
    cur.remove(last)
}

fn lookup_path<'v>(m: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    let mut parts = path.split('.');
    let first = m.get(parts.next()?)?;
    parts.try_fold(first, |cur, p| cur.get(p))
}

fn explode(args: &Args<'_>, _: &StepRegistry) -> Result<Step, TransformError> {
    let path = path_of(args, "path")?;
    let into = args.str("into")?;
    let carry = match args.value("carry") {
        None => Vec::new(),
        Some(_) => args.str_map("carry")?,
    };
    let step = args.step.to_string();
    Ok(object_step(args.step, move |mut m| {
        let carried: Vec<(String, Value)> = carry
            .iter()
            .map(|(from, to)| (to.clone(), lookup_path(&m, from).cloned().unwrap_or(Value::Null)))
            .collect();
        let items = match take_path(&mut m, &path) {
            Some(Value::Array(items)) => items,
            None | Some(Value::Null) => Vec::new(),
            Some(_) => return Err(TransformError::shape(&step, "an array at the explode path")),
        };
        let exploded = items
            .into_iter()
            .map(|item| match item {
                Value::Object(mut obj) => {
                    for (k, v) in &carried {
                        obj.insert(k.clone(), v.clone());
                    }
                    Ok(Value::Object(obj))
                }
                _ => Err(TransformError::shape(&step, "array elements to be objects")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        m.insert(into.clone(), Value::Array(exploded));
        Ok(m)
    }))
}

fn map_each(args: &Args<'_>, registry: &StepRegistry) -> Result<Step, TransformError> {
    let key = args.str("path")?;
    let specs: Vec<StepSpec> = match args.value("steps") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| args.err(format!("`steps` is not a step list: {e}")))?,
        None => return Err(args.err("missing `steps`")),
    };
    let mut inner = Vec::with_capacity(specs.len());
    for spec in &specs {
        match registry.compile(spec)? {
            Step::Record(f) => inner.push(f),
            _ => {
                return Err(TransformError::StepNotApplicable {
                    step: spec.step.clone(),
                    mode: "map_each",
                })
            }
        }
    }
    let step = args.step.to_string();
    Ok(object_step(args.step, move |mut m| {
        let items = match m.remove(&key) {
            Some(Value::Array(items)) => items,
            None | Some(Value::Null) => Vec::new(),
            Some(_) => return Err(TransformError::shape(&step, "an array at `path`")),
        };
        let mapped = items
            .into_iter()
            .map(|item| inner.iter().try_fold(item, |acc, f| f(acc)))
            .collect::<Result<Vec<_>, _>>()?;
        m.insert(key.clone(), Value::Array(mapped));
        Ok(m)
    }))
}
