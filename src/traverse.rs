use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::AppResult;
use crate::models::{Chunk, Frame, LocalVar, TraversalReport, VarInfo, Variable};

/// The debugger queries the crawl is built from. `Debugger` is the real
/// implementation; tests script one.
#[allow(async_fn_in_trait)]
pub trait Inspector {
    async fn frames(&mut self) -> AppResult<Vec<Frame>>;
    async fn variables(&mut self, frame: Option<usize>) -> AppResult<Vec<LocalVar>>;
    async fn variable_info(&mut self, expression: &str, frame: Option<usize>)
    -> AppResult<VarInfo>;
}

/// Crawl every value transitively reachable from the locals of every live
/// frame.
///
/// Frames are visited in the order `frames()` returns them (innermost
/// first). Within a frame the walk is breadth-first: the frame's locals
/// seed a work queue, and dequeued expressions are inspected, recorded
/// under their `(address, type)` key and expanded into child expressions.
/// The key check happens at dequeue time, which also breaks pointer cycles.
pub async fn traverse<I: Inspector>(gdb: &mut I) -> AppResult<TraversalReport> {
    let mut report = TraversalReport::default();

    for frame in gdb.frames().await? {
        let mut locals = Vec::new();
        let mut work = VecDeque::new();

        for local in gdb.variables(Some(frame.level)).await? {
            let info = gdb.variable_info(&local.name, Some(frame.level)).await?;
            locals.push(Variable {
                name: local.name.clone(),
                address: info.address.clone(),
                ty: info.ty.clone(),
            });
            report.addresses.insert(
                (info.address.clone(), info.ty.clone()),
                Chunk {
                    ty: info.ty.clone(),
                    value: sanitize_value(&info.value),
                },
            );
            push_children(&mut work, &local.name, &info);
        }

        while let Some(expression) = work.pop_front() {
            let info = gdb.variable_info(&expression, Some(frame.level)).await?;
            let key = (info.address.clone(), info.ty.clone());
            if report.addresses.contains_key(&key) {
                continue;
            }
            report.addresses.insert(
                key,
                Chunk {
                    ty: info.ty.clone(),
                    value: sanitize_value(&info.value),
                },
            );
            push_children(&mut work, &expression, &info);
        }

        debug!("frame {} ({}): {} locals", frame.level, frame.func, locals.len());
        report.frames.insert((frame.level, frame.func), locals);
    }
    Ok(report)
}

/// Queue the sub-expressions reachable from `parent`. Null pointers are not
/// expanded, and `char` children are skipped so strings are not inspected
/// one character at a time.
fn push_children(work: &mut VecDeque<String>, parent: &str, info: &VarInfo) {
    if info.value == "0x0" {
        return;
    }

    for child in &info.children {
        if child.ty == "char" {
            continue;
        }
        if child.expr.starts_with('*') {
            // the pointee, already a complete expression
            work.push_back(child.expr.clone());
        } else if !child.expr.is_empty() && child.expr.chars().all(|c| c.is_ascii_digit()) {
            // an array index
            work.push_back(format!("{}[{}]", parent, child.expr));
        } else if info.ty.ends_with('*') {
            // a field seen through a struct pointer
            work.push_back(format!("(*{})", parent));
        } else {
            // a struct field
            work.push_back(format!("({}.{})", parent, child.expr));
        }
    }
}

static NULL_RUN_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r", '\\000' <repeats \d+ times>").unwrap());
static NULL_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'\\000' <repeats \d+ times>").unwrap());
static STRUCT_FIELD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([{ ])([^ ]+)  ").unwrap());
static BARE_HEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(0x[a-z0-9]+)").unwrap());
static CHAR_RENDERING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+ '.')").unwrap());

/// Best-effort rewrite of GDB's textual value rendering into a structured
/// value. None means the rendering did not survive the rewrite, which is
/// expected for uninitialised or deallocated memory and is not an error.
pub fn sanitize_value(value: &str) -> Option<Value> {
    let value = NULL_RUN_TAIL.replace_all(value, "");
    let value = NULL_RUN.replace_all(&value, "\"\\\\x00\"");
    let value = if value.starts_with('{') {
        STRUCT_FIELD.replace_all(&value, "${1}\"${2}\":").into_owned()
    } else {
        value.into_owned()
    };
    let value = BARE_HEX.replace_all(&value, "\"${1}\"");
    let value = CHAR_RENDERING.replace_all(&value, "\"${1}\"");
    serde_json::from_str(&value).ok()
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::error::AppError;
    use crate::models::ChildVar;

    #[test]
    fn test_sanitize_plain_values() {
        assert_eq!(sanitize_value("7"), Some(json!(7)));
        assert_eq!(sanitize_value("0x5555deadbeef"), Some(json!("0x5555deadbeef")));
        assert_eq!(sanitize_value("65 'A'"), Some(json!("65 'A'")));
    }

    #[test]
    fn test_sanitize_null_byte_runs() {
        assert_eq!(
            sanitize_value("\"abc\", '\\000' <repeats 12 times>"),
            Some(json!("abc"))
        );
        assert_eq!(
            sanitize_value("'\\000' <repeats 15 times>"),
            Some(json!("\\x00"))
        );
    }

    #[test]
    fn test_sanitize_garbage_is_the_sentinel() {
        assert_eq!(sanitize_value("{i = 3, next = 0x0}"), None);
        assert_eq!(sanitize_value("<optimized out>"), None);
        assert_eq!(sanitize_value(""), None);
    }

    fn info(ty: &str, value: &str, address: &str, children: Vec<ChildVar>) -> VarInfo {
        VarInfo {
            ty: ty.to_string(),
            value: value.to_string(),
            address: Some(address.to_string()),
            children,
        }
    }

    fn child(expr: &str, ty: &str, numchild: u32) -> ChildVar {
        ChildVar {
            expr: expr.to_string(),
            ty: ty.to_string(),
            numchild,
        }
    }

    #[test]
    fn test_child_expressions() {
        let mut work = VecDeque::new();
        push_children(
            &mut work,
            "v",
            &info(
                "struct blob",
                "{...}",
                "0x10",
                vec![
                    child("*v", "int", 0),
                    child("3", "int", 0),
                    child("field", "int", 0),
                    child("text", "char", 0),
                ],
            ),
        );
        assert_eq!(Vec::from(work), ["*v", "v[3]", "(v.field)"]);
    }

    #[test]
    fn test_struct_pointer_children_deref_the_parent() {
        let mut work = VecDeque::new();
        push_children(
            &mut work,
            "l",
            &info(
                "struct node *",
                "0xbeef0",
                "0x10",
                vec![child("i", "int", 0), child("next", "struct node *", 0)],
            ),
        );
        assert_eq!(Vec::from(work), ["(*l)", "(*l)"]);
    }

    #[test]
    fn test_null_pointers_are_not_expanded() {
        let mut work = VecDeque::new();
        push_children(
            &mut work,
            "q",
            &info("char *", "0x0", "0x10", vec![child("*q", "char", 0)]),
        );
        assert!(work.is_empty());
    }

    /// An `Inspector` driven by a canned table of expressions.
    struct Scripted {
        frames: Vec<Frame>,
        locals: HashMap<usize, Vec<LocalVar>>,
        infos: HashMap<String, VarInfo>,
        info_calls: usize,
    }

    impl Scripted {
        fn single_frame(locals: &[&str], infos: &[(&str, VarInfo)]) -> Self {
            Scripted {
                frames: vec![frame(0, "main")],
                locals: HashMap::from([(
                    0,
                    locals
                        .iter()
                        .map(|name| LocalVar { name: name.to_string(), value: None })
                        .collect(),
                )]),
                infos: infos
                    .iter()
                    .map(|(expr, info)| (expr.to_string(), info.clone()))
                    .collect(),
                info_calls: 0,
            }
        }
    }

    fn frame(level: usize, func: &str) -> Frame {
        Frame {
            level,
            func: func.to_string(),
            addr: None,
            file: None,
            fullname: None,
            line: None,
        }
    }

    impl Inspector for Scripted {
        async fn frames(&mut self) -> AppResult<Vec<Frame>> {
            Ok(self.frames.clone())
        }

        async fn variables(&mut self, frame: Option<usize>) -> AppResult<Vec<LocalVar>> {
            Ok(self.locals[&frame.unwrap()].clone())
        }

        async fn variable_info(
            &mut self,
            expression: &str,
            _frame: Option<usize>,
        ) -> AppResult<VarInfo> {
            self.info_calls += 1;
            self.infos
                .get(expression)
                .cloned()
                .ok_or_else(|| AppError::GDBError(format!("no such expression: {}", expression)))
        }
    }

    #[tokio::test]
    async fn test_pointer_target_deduplicates_against_its_variable() {
        // int x = 7; int *p = &x;
        let mut gdb = Scripted::single_frame(
            &["x", "p"],
            &[
                ("x", info("int", "7", "0xa0", vec![])),
                ("p", info("int *", "0xa0", "0xa8", vec![child("*p", "int", 0)])),
                ("*p", info("int", "7", "0xa0", vec![])),
            ],
        );
        let report = traverse(&mut gdb).await.unwrap();

        let locals = &report.frames[&(0, "main".to_string())];
        assert_eq!(locals.len(), 2);
        assert_eq!(locals[0].name, "x");
        assert_eq!(locals[1].name, "p");

        assert_eq!(report.addresses.len(), 2);
        let x = &report.addresses[&(Some("0xa0".to_string()), "int".to_string())];
        assert_eq!(x.value, Some(json!(7)));
        let p = &report.addresses[&(Some("0xa8".to_string()), "int *".to_string())];
        assert_eq!(p.value, Some(json!("0xa0")));
    }

    #[tokio::test]
    async fn test_aliases_of_one_address_and_type_collapse() {
        let mut gdb = Scripted::single_frame(
            &["a", "b"],
            &[
                ("a", info("int", "1", "0xa0", vec![])),
                ("b", info("int", "1", "0xa0", vec![])),
            ],
        );
        let report = traverse(&mut gdb).await.unwrap();
        // both locals are listed, the shared memory is recorded once
        assert_eq!(report.frames[&(0, "main".to_string())].len(), 2);
        assert_eq!(report.addresses.len(), 1);
    }

    #[tokio::test]
    async fn test_null_pointer_is_recorded_but_not_dereferenced() {
        // char *q = NULL; Scripted would error on "*q"
        let mut gdb = Scripted::single_frame(
            &["q"],
            &[("q", info("char *", "0x0", "0xa0", vec![child("*q", "char", 0)]))],
        );
        let report = traverse(&mut gdb).await.unwrap();
        assert_eq!(report.addresses.len(), 1);
        assert!(
            report
                .addresses
                .contains_key(&(Some("0xa0".to_string()), "char *".to_string()))
        );
    }

    #[tokio::test]
    async fn test_char_arrays_are_one_chunk() {
        // char buf[16]; no per-character entries
        let children: Vec<ChildVar> =
            (0..16).map(|i| child(&i.to_string(), "char", 0)).collect();
        let mut gdb = Scripted::single_frame(
            &["buf"],
            &[(
                "buf",
                info("char [16]", "\"hi\", '\\000' <repeats 13 times>", "0xb0", children),
            )],
        );
        let report = traverse(&mut gdb).await.unwrap();
        assert_eq!(report.addresses.len(), 1);
        assert_eq!(gdb.info_calls, 1);
    }

    #[tokio::test]
    async fn test_struct_pointer_chain() {
        // struct node { int i; struct node *next; } n = {3, 0}; struct node *l = &n;
        let node_children = vec![child("i", "int", 0), child("next", "struct node *", 0)];
        let mut gdb = Scripted::single_frame(
            &["l"],
            &[
                (
                    "l",
                    info("struct node *", "0xb0", "0xa0", node_children.clone()),
                ),
                (
                    "(*l)",
                    info("struct node", "{i = 3, next = 0x0}", "0xb0", node_children),
                ),
                ("((*l).i)", info("int", "3", "0xb0", vec![])),
                ("((*l).next)", info("struct node *", "0x0", "0xb8", vec![])),
            ],
        );
        let report = traverse(&mut gdb).await.unwrap();

        assert_eq!(report.addresses.len(), 4);
        // the struct rendering is junk to the value parser, not an error
        let node = &report.addresses[&(Some("0xb0".to_string()), "struct node".to_string())];
        assert_eq!(node.value, None);
        // "(*l)" was queued once per field but only inspected until the
        // dedup check caught it
        assert!(gdb.info_calls >= 5);
    }

    #[tokio::test]
    async fn test_traversal_is_idempotent() {
        let mut gdb = Scripted::single_frame(
            &["x", "p"],
            &[
                ("x", info("int", "7", "0xa0", vec![])),
                ("p", info("int *", "0xa0", "0xa8", vec![child("*p", "int", 0)])),
                ("*p", info("int", "7", "0xa0", vec![])),
            ],
        );
        let first = traverse(&mut gdb).await.unwrap();
        let second = traverse(&mut gdb).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_frames_keyed_by_level_and_function() {
        let mut gdb = Scripted {
            frames: vec![frame(0, "inner"), frame(1, "main")],
            locals: HashMap::from([
                (0, vec![LocalVar { name: "a".to_string(), value: None }]),
                (1, vec![LocalVar { name: "b".to_string(), value: None }]),
            ]),
            infos: HashMap::from([
                ("a".to_string(), info("int", "1", "0xa0", vec![])),
                ("b".to_string(), info("int", "2", "0xb0", vec![])),
            ]),
            info_calls: 0,
        };
        let report = traverse(&mut gdb).await.unwrap();
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.frames[&(0, "inner".to_string())][0].name, "a");
        assert_eq!(report.frames[&(1, "main".to_string())][0].name, "b");
        assert_eq!(report.addresses.len(), 2);
    }
}
