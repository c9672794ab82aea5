use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DisplayFromStr, serde_as};

/// One stack frame as reported by `-stack-list-frames`.
///
/// MI numbers the innermost (currently executing) frame as level 0 and the
/// crate keeps that order everywhere: `frames()` returns level 0 first and
/// `level` is the index accepted by `--frame <i>`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde_as(as = "DisplayFromStr")]
    pub level: usize,
    pub func: String,
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub line: Option<usize>,
}

/// A local variable entry from `-stack-list-variables --all-values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVar {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// One child of a variable object, from `-var-list-children`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildVar {
    /// Child expression relative to the parent: a field name, an array
    /// index, or `*<parent>` for a pointee.
    #[serde(rename = "exp")]
    pub expr: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde_as(as = "DisplayFromStr")]
    pub numchild: u32,
}

/// Everything `variable_info` learns about one expression.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VarInfo {
    pub ty: String,
    /// Textual rendering from `-data-evaluate-expression`, empty when the
    /// expression could not be evaluated.
    pub value: String,
    /// `&expr`, or None when the expression is not addressable.
    pub address: Option<String>,
    pub children: Vec<ChildVar>,
}

/// `(name, address, type)` as recorded in the per-frame listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub ty: String,
}

/// A typed view of memory at one address. `value` is None when the textual
/// rendering could not be parsed (uninitialised or deallocated memory).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    #[serde(rename = "type")]
    pub ty: String,
    pub value: Option<Value>,
}

/// `(frame_level, frame_function)` key of the frames map.
pub type FrameKey = (usize, String);

/// `(address, type)` dedup key of the addresses map. Two typed views of the
/// same byte address are distinct entries.
pub type AddressKey = (Option<String>, String);

/// Result of one full traversal of the live memory graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraversalReport {
    pub frames: BTreeMap<FrameKey, Vec<Variable>>,
    pub addresses: BTreeMap<AddressKey, Chunk>,
}
