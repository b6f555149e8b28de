//! Michelson expressions and annotation-driven value extraction.
//!
//! An oracle contract's storage type names its fields with `%annotations`.
//! Walking the type and a value side by side yields a flat
//! `field name → JSON value` map:
//!
//! ```text
//! type:  pair(address %admin, big_map %requests (nat) (…))
//! value: Pair("tz1…", 17)
//!   ──▶  { "admin": "tz1…", "requests": 17 }
//! ```
//!
//! Values fetched in `Optimized` unparsing mode may flatten nested pairs
//! (`Pair(a, b, c)` instead of `Pair(a, Pair(b, c))`) or arrive as bare JSON
//! arrays. Both shapes are normalized before walking.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const PRIM_PAIR_TYPE: &str = "pair";
const PRIM_PAIR: &str = "Pair";
const PRIM_MAP: &str = "map";
const PRIM_ELT: &str = "Elt";
const PRIM_TRUE: &str = "True";
const PRIM_FALSE: &str = "False";

/// Scalar-like types whose value is read with [`variant_value`].
const SCALAR_TYPES: [&str; 8] = [
    "int",
    "nat",
    "timestamp",
    "big_map",
    "string",
    "bytes",
    "address",
    "bool",
];

#[derive(Debug, Error)]
pub enum MichelsonError {
    #[error("invalid Michelson JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected one annotation, but received {0}")]
    AnnotationCount(usize),

    #[error("invalid annotation format ({0}), expected prefix (%)")]
    AnnotationFormat(String),

    #[error("expression doesn't contain the annotation {0}")]
    MissingAnnotation(String),

    #[error("unexpected expression type {0}")]
    UnexpectedType(String),

    #[error("expected element (Elt) with 2 args, but instead got {0}")]
    BadElement(String),

    #[error("value has {values} args, type expects {types}")]
    ArityMismatch { types: usize, values: usize },

    #[error("invalid int literal {0}")]
    BadInt(String),

    #[error("could not get value from variant")]
    NoValue,
}

/// One Michelson node in its JSON encoding.
///
/// `args` stay raw because they may hold objects or arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prim: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub string: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub int: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bytes: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annots: Vec<String>,
}

impl Expr {
    /// Parse a node. A bare array becomes an anonymous node whose `args`
    /// are the array items (a sequence or an optimized pair).
    pub fn parse(raw: &Value) -> Result<Self, MichelsonError> {
        match raw {
            Value::Array(items) => Ok(Self {
                args: items.clone(),
                ..Self::default()
            }),
            other => Ok(Self::deserialize(other)?),
        }
    }

    fn arg(&self, index: usize) -> Result<Self, MichelsonError> {
        let raw = self.args.get(index).ok_or(MichelsonError::ArityMismatch {
            types: index + 1,
            values: self.args.len(),
        })?;
        Self::parse(raw)
    }

    fn is_pair(&self) -> bool {
        self.prim == PRIM_PAIR_TYPE || self.prim == PRIM_PAIR
    }
}

/// `["%field"]` → `"field"`.
pub fn annotation(annots: &[String]) -> Result<&str, MichelsonError> {
    match annots {
        [one] => one
            .strip_prefix('%')
            .ok_or_else(|| MichelsonError::AnnotationFormat(one.clone())),
        other => Err(MichelsonError::AnnotationCount(other.len())),
    }
}

/// Read a single value: string, then int, then bytes, then booleans, then
/// the first argument (for `Left`/`Right`/`Some` wrappers).
pub fn variant_value(expr: &Expr) -> Result<Value, MichelsonError> {
    if !expr.string.is_empty() {
        return Ok(Value::String(expr.string.clone()));
    }
    if !expr.int.is_empty() {
        let n: i64 = expr
            .int
            .parse()
            .map_err(|_| MichelsonError::BadInt(expr.int.clone()))?;
        return Ok(Value::from(n));
    }
    if !expr.bytes.is_empty() {
        return Ok(Value::String(expr.bytes.clone()));
    }
    match expr.prim.as_str() {
        PRIM_TRUE => return Ok(Value::Bool(true)),
        PRIM_FALSE => return Ok(Value::Bool(false)),
        _ => {}
    }
    match expr.args.first() {
        Some(inner) => variant_value(&Expr::parse(inner)?),
        None => Err(MichelsonError::NoValue),
    }
}

/// Walk `ty` and `raw` together and collect annotated values.
pub fn extract_values(ty: &Expr, raw: &Value) -> Result<Map<String, Value>, MichelsonError> {
    let value = Expr::parse(raw)?;
    let mut out = Map::new();

    if SCALAR_TYPES.contains(&ty.prim.as_str()) {
        out.insert(annotation(&ty.annots)?.to_string(), variant_value(&value)?);
    } else if ty.prim == PRIM_MAP {
        let field = annotation(&ty.annots)?.to_string();
        out.insert(field, Value::Object(map_entries(&value.args)?));
    } else if ty.prim == PRIM_PAIR_TYPE {
        let (ty, value) = normalize(ty.clone(), value)?;
        for (i, item_ty) in ty.args.iter().enumerate() {
            let item_raw = value.args.get(i).ok_or(MichelsonError::ArityMismatch {
                types: ty.args.len(),
                values: value.args.len(),
            })?;
            out.extend(extract_values(&Expr::parse(item_ty)?, item_raw)?);
        }
    } else {
        return Err(MichelsonError::UnexpectedType(ty.prim.clone()));
    }

    Ok(out)
}

/// Flatten whichever side has fewer args so both line up.
fn normalize(ty: Expr, value: Expr) -> Result<(Expr, Expr), MichelsonError> {
    if ty.args.len() < value.args.len() {
        Ok((spread_pairs(ty)?, value))
    } else if value.args.len() < ty.args.len() {
        Ok((ty, spread_pairs(value)?))
    } else {
        Ok((ty, value))
    }
}

/// Lift the args of directly nested pairs into the parent.
fn spread_pairs(expr: Expr) -> Result<Expr, MichelsonError> {
    let mut args = Vec::with_capacity(expr.args.len());
    for raw in &expr.args {
        let inner = Expr::parse(raw)?;
        if inner.is_pair() {
            args.extend(inner.args);
        } else {
            args.push(raw.clone());
        }
    }
    Ok(Expr { args, ..expr })
}

/// `[Elt(k, v), …]` → `{k: v, …}`.
fn map_entries(items: &[Value]) -> Result<Map<String, Value>, MichelsonError> {
    let mut out = Map::new();
    for raw in items {
        let elt = Expr::parse(raw)?;
        if elt.prim != PRIM_ELT || elt.args.len() != 2 {
            return Err(MichelsonError::BadElement(elt.prim));
        }
        let key = elt.arg(0)?;
        out.insert(key.string, variant_value(&elt.arg(1)?)?);
    }
    Ok(out)
}

/// Depth-first search for the node annotated `annot`.
pub fn find_by_annotation(expr: &Expr, annot: &str) -> Result<Expr, MichelsonError> {
    if expr.annots.first().map(String::as_str) == Some(annot) {
        return Ok(expr.clone());
    }
    for raw in &expr.args {
        if let Ok(found) = find_by_annotation(&Expr::parse(raw)?, annot) {
            return Ok(found);
        }
    }
    Err(MichelsonError::MissingAnnotation(annot.to_string()))
}

/// Value type of the `%requests` big_map.
pub fn request_value_type(storage_ty: &Expr) -> Result<Expr, MichelsonError> {
    find_by_annotation(storage_ty, "%requests")?.arg(1)
}

/// Id of the `%requests` big_map in the current storage value.
pub fn requests_big_map_id(storage_ty: &Expr, storage: &Value) -> Result<String, MichelsonError> {
    let values = extract_values(storage_ty, storage)?;
    match values.get("requests") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(MichelsonError::MissingAnnotation("%requests".into())),
    }
}
