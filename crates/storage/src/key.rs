//! Storage key encoding for value sequences.
//!
//! Stateful operators key their persisted state by row values: the dedup
//! operator by its key columns, joins by (correlation key, primary key)
//! tuples. The encoding must be injective and component-delimited so that a
//! prefix scan over the first k components matches exactly the keys whose
//! first k values are equal and nothing more.
//!
//! Layout: each value is encoded with a type tag and an escaped payload,
//! then terminated by the unit separator. The separator never appears
//! unescaped inside a component, so component boundaries are unambiguous.

use alloc::string::String;
use core::fmt::Write as _;
use eddy_core::{JsonValue, Value};

/// Component terminator. Escaped wherever it occurs inside a payload.
const SEP: char = '\u{1f}';

/// Encodes a sequence of values into a storage key.
///
/// `encode_values(&vals[..k])` is a prefix of `encode_values(&vals)` for
/// every `k`, which is what makes correlation-prefix scans exact.
pub fn encode_values(values: &[Value]) -> String {
    let mut out = String::new();
    for value in values {
        encode_value_into(value, &mut out);
        out.push(SEP);
    }
    out
}

/// Encodes a single value (with its terminator), for single-column keys.
pub fn encode_value(value: &Value) -> String {
    encode_values(core::slice::from_ref(value))
}

fn encode_value_into(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push('n'),
        Value::Bool(false) => out.push_str("b0"),
        Value::Bool(true) => out.push_str("b1"),
        Value::Int(i) => {
            out.push('i');
            let _ = write!(out, "{}", i);
        }
        Value::Float(f) => {
            out.push('f');
            push_float(*f, out);
        }
        Value::String(s) => {
            out.push('s');
            push_escaped(s, out);
        }
        Value::Bytes(b) => {
            out.push('x');
            for byte in b {
                let _ = write!(out, "{:02x}", byte);
            }
        }
        Value::Json(j) => {
            out.push('j');
            let mut canon = String::new();
            push_json(j, &mut canon);
            push_escaped(&canon, out);
        }
    }
}

/// Floats canonicalized so that values equal under `Value`'s equality map
/// to the same key: every NaN collapses, and -0.0 collapses into 0.0.
fn push_float(f: f64, out: &mut String) {
    if f.is_nan() {
        out.push_str("nan");
    } else if f == 0.0 {
        out.push('0');
    } else {
        let _ = write!(out, "{:016x}", f.to_bits());
    }
}

fn push_escaped(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '%' => out.push_str("%%"),
            SEP => out.push_str("%."),
            c => out.push(c),
        }
    }
}

/// Canonical, injective JSON rendering. Strings are length-prefixed so no
/// delimiter ambiguity exists; numbers reuse the float canonicalization.
fn push_json(j: &JsonValue, out: &mut String) {
    match j {
        JsonValue::Null => out.push('z'),
        JsonValue::Bool(false) => out.push('f'),
        JsonValue::Bool(true) => out.push('t'),
        JsonValue::Number(n) => {
            out.push('d');
            push_float(*n, out);
        }
        JsonValue::String(s) => push_json_str(s, out),
        JsonValue::Array(items) => {
            out.push('[');
            for item in items {
                push_json(item, out);
            }
            out.push(']');
        }
        JsonValue::Object(entries) => {
            out.push('{');
            for (k, v) in entries {
                push_json_str(k, out);
                push_json(v, out);
            }
            out.push('}');
        }
    }
}

fn push_json_str(s: &str, out: &mut String) {
    let _ = write!(out, "q{}:", s.len());
    out.push_str(s);
}
