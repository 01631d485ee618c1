//! Key Serialization Module
//!
//! Turns an argument list into a single deterministic string.
//!
//! The output is JSON-like text: lists as `[..]`, maps as `{..}` with keys
//! in sorted order, strings escaped as JSON strings. Values JSON cannot
//! express get a quoted marker instead:
//! - functions: `"[Function name]"`
//! - symbols: `"Symbol(description)"`
//! - a list or map that contains itself: `"[ref=<path>]"`, where `<path>`
//!   points at the first occurrence (`.` is the argument list, `.0.k` is
//!   field `k` of the first argument)
//! - opaque host objects: `"[unserializable=<path>]"`

use std::fmt::Write;

use crate::key::Value;

// == Serialize ==
/// Serializes a full argument list.
pub fn serialize_args(args: &[Value]) -> String {
    let mut out = String::new();
    let mut ancestors = Vec::new();
    let mut path = Vec::new();
    write_seq(&mut out, args, &mut ancestors, &mut path);
    out
}

/// Serializes a single value, with paths relative to that value.
pub fn serialize_value(value: &Value) -> String {
    let mut out = String::new();
    let mut ancestors = Vec::new();
    let mut path = Vec::new();
    write_value(&mut out, value, &mut ancestors, &mut path);
    out
}

fn write_value(out: &mut String, value: &Value, ancestors: &mut Vec<(usize, String)>, path: &mut Vec<String>) {
    match value {
        Value::Undefined => out.push_str("undefined"),
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Float(f) => write_float(out, *f),
        Value::Str(s) => write_string(out, s),
        Value::Symbol(sym) => {
            write_string(out, &format!("Symbol({})", sym.description().unwrap_or("")))
        }
        Value::Function(func) => write_string(out, &format!("[Function {}]", func.name())),
        Value::Opaque(_) => write_string(out, &format!("[unserializable={}]", render_path(path))),
        Value::List(list) => {
            let Some(addr) = value.ref_addr() else { return };
            if let Some(marker) = back_reference(addr, ancestors) {
                write_string(out, &marker);
                return;
            }
            ancestors.push((addr, render_path(path)));
            write_seq(out, &list.items(), ancestors, path);
            ancestors.pop();
        }
        Value::Map(map) => {
            let Some(addr) = value.ref_addr() else { return };
            if let Some(marker) = back_reference(addr, ancestors) {
                write_string(out, &marker);
                return;
            }
            ancestors.push((addr, render_path(path)));
            out.push('{');
            for (i, (name, field)) in map.fields().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, name);
                out.push(':');
                path.push(name.clone());
                write_value(out, field, ancestors, path);
                path.pop();
            }
            out.push('}');
            ancestors.pop();
        }
    }
}

fn write_seq(out: &mut String, items: &[Value], ancestors: &mut Vec<(usize, String)>, path: &mut Vec<String>) {
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        path.push(i.to_string());
        write_value(out, item, ancestors, path);
        path.pop();
    }
    out.push(']');
}

/// Returns the marker for `addr` when it is already being serialized
/// further up the current path.
fn back_reference(addr: usize, ancestors: &[(usize, String)]) -> Option<String> {
    ancestors
        .iter()
        .find(|(a, _)| *a == addr)
        .map(|(_, at)| format!("[ref={}]", at))
}

fn render_path(path: &[String]) -> String {
    if path.is_empty() {
        ".".to_string()
    } else {
        path.iter().fold(String::new(), |mut acc, seg| {
            acc.push('.');
            acc.push_str(seg);
            acc
        })
    }
}

fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("NaN");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "Infinity" } else { "-Infinity" });
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        // Integral floats serialize like integers, matching identity equality.
        let _ = write!(out, "{}", f as i64);
    } else {
        let _ = write!(out, "{}", f);
    }
}

fn write_string(out: &mut String, s: &str) {
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}
