//! Emit Python procedures from a node tree.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::model::IncludeTarget;
use crate::processor::ast::{Guard, Node};
use crate::processor::classifier::{
    Classification, Segment, capture_target, needs_int_coercion, segments, translate_condition,
};

const INDENT: &str = "    ";

/// Name of the device handle every procedure takes first.
pub const DEVICE_ARG: &str = "device";

/// Package holding the converted includes.
pub const PACKAGE: &str = "procedures";

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Helpers shared by every generated module. A missing value is an error,
/// never an empty string.
pub const SUPPORT_MODULE: &str = r#"# Generated by scriptconv - do not edit.


def require(value, name):
    if value is None:
        raise LookupError(f"variable {name} is not set")
    return value


def to_int(value, name):
    try:
        return int(require(value, name))
    except ValueError:
        raise LookupError(f"variable {name} is not numeric: {value!r}") from None
"#;

/// Prefix of every converted include's procedure name.
pub const INCLUDE_PREFIX: &str = "inc_";

/// Names the support module exports into generated modules.
const HELPERS: &[&str] = &["require", "to_int"];

/// Names a parameter must not take inside a procedure body.
fn is_reserved(stem: &str) -> bool {
    stem == DEVICE_ARG
        || KEYWORDS.contains(&stem)
        || HELPERS.contains(&stem)
        || stem.starts_with(INCLUDE_PREFIX)
}

/// Python identifier for a DSL variable name.
///
/// A name whose stem (trailing `_` removed) is reserved gets one more `_`,
/// so `$IF` and `$IF_` stay distinct as `if_` and `if__`. Procedure names
/// never end in `_`, so an escaped `inc_*` parameter cannot shadow a callee.
pub fn identifier(name: &str) -> String {
    let mut ident: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if is_reserved(ident.trim_end_matches('_')) {
        ident.push('_');
    }
    ident
}

/// Escape text for the inside of a double-quoted Python string.
/// Inside f-strings braces are doubled.
pub fn escape(text: &str, fstring: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '{' if fstring => out.push_str("{{"),
            '}' if fstring => out.push_str("}}"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Double-quoted Python string literal.
pub fn string_literal(text: &str) -> String {
    format!("\"{}\"", escape(text, false))
}

/// Single-quoted literal for use inside an f-string placeholder; f-strings
/// before Python 3.12 cannot reuse the outer quote.
fn inner_literal(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// One generated procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub name: String,
    /// Sorted lower-cased DSL names, in argument order.
    pub parameters: Vec<String>,
    /// Procedures this one calls.
    pub calls: BTreeSet<String>,
    /// Support helpers referenced (`require`, `to_int`).
    pub helpers: BTreeSet<&'static str>,
    /// The `def …:` block, without imports.
    pub source: String,
}

impl Procedure {
    /// Full module text: support import, then the procedure.
    pub fn render_module(&self, origin: &str) -> String {
        let mut out = format!("# Generated by scriptconv from {origin} - do not edit.\n");
        if !self.helpers.is_empty() {
            let helpers: Vec<_> = self.helpers.iter().copied().collect();
            out.push_str(&format!(
                "from {PACKAGE}._support import {}\n",
                helpers.join(", ")
            ));
        }
        out.push_str("\n\n");
        out.push_str(&self.source);
        out
    }
}

struct Emitter<'a> {
    classes: &'a Classification,
    includes: &'a BTreeMap<String, IncludeTarget>,
    lines: Vec<String>,
    calls: BTreeSet<String>,
    helpers: BTreeSet<&'static str>,
}

/// Walk `nodes` and produce the procedure `name`.
///
/// The signature is the sorted union of the script's own parameters and
/// those of every procedure it calls, so callees' arguments can be forwarded.
pub fn emit(
    name: &str,
    nodes: &[Node],
    classes: &Classification,
    includes: &BTreeMap<String, IncludeTarget>,
) -> Procedure {
    let mut parameters = classes.parameters.clone();
    for logical in Node::include_refs(nodes) {
        if let Some(target) = includes.get(logical) {
            parameters.extend(target.parameters.iter().cloned());
        }
    }
    let parameters: Vec<String> = parameters.into_iter().collect();

    let mut emitter = Emitter {
        classes,
        includes,
        lines: Vec::new(),
        calls: BTreeSet::new(),
        helpers: BTreeSet::new(),
    };
    emitter.block(nodes, 1);

    let mut args = vec![DEVICE_ARG.to_string()];
    args.extend(parameters.iter().map(|p| identifier(p)));

    let mut source = format!("def {name}({}):\n", args.join(", "));
    for callee in &emitter.calls {
        // imported at call time so mutually recursive includes still load
        source.push_str(&format!("{INDENT}from {PACKAGE}.{callee} import {callee}\n"));
    }
    if emitter.lines.is_empty() {
        source.push_str(&format!("{INDENT}pass\n"));
    }
    for line in &emitter.lines {
        source.push_str(line);
        source.push('\n');
    }

    Procedure {
        name: name.to_string(),
        parameters,
        calls: emitter.calls,
        helpers: emitter.helpers,
        source,
    }
}

impl Emitter<'_> {
    fn push(&mut self, depth: usize, text: String) {
        self.lines.push(format!("{}{text}", INDENT.repeat(depth)));
    }

    /// Emit `nodes` at `depth`; a block that produced nothing gets `pass`.
    fn block(&mut self, nodes: &[Node], depth: usize) {
        let before = self.lines.len();
        for node in nodes {
            self.node(node, depth);
        }
        if self.lines.len() == before && depth > 1 {
            self.push(depth, "pass".to_string());
        }
    }

    fn node(&mut self, node: &Node, depth: usize) {
        match node {
            Node::Command { text, .. } => {
                let arg = self.command_literal(text);
                self.push(depth, format!("{DEVICE_ARG}.execute({arg})"));
            }
            Node::IncludeRef { logical_path, line } => {
                let Some(target) = self.includes.get(logical_path) else {
                    warn!("line {line}: include `{logical_path}` unresolved, call omitted");
                    return;
                };
                let mut args = vec![DEVICE_ARG.to_string()];
                for p in &target.parameters {
                    let ident = identifier(p);
                    args.push(format!("{ident}={ident}"));
                }
                self.calls.insert(target.procedure_name.clone());
                self.push(
                    depth,
                    format!("{}({})", target.procedure_name, args.join(", ")),
                );
            }
            Node::IfChain {
                branches,
                else_body,
            } => {
                for (i, branch) in branches.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elif" };
                    let cond = self.condition(&branch.guard);
                    self.push(depth, format!("{keyword} {cond}:"));
                    self.block(&branch.body, depth + 1);
                }
                if !else_body.is_empty() {
                    self.push(depth, "else:".to_string());
                    self.block(else_body, depth + 1);
                }
            }
        }
    }

    fn condition(&mut self, guard: &Guard) -> String {
        if needs_int_coercion(guard) {
            self.helpers.insert("to_int");
        }
        translate_condition(guard, &self.classes.parameters)
    }

    /// Command text as a Python string expression with substitutions.
    fn command_literal(&mut self, text: &str) -> String {
        // capture directives are interpreted by the runtime as written
        if capture_target(text).is_some() {
            return string_literal(text);
        }

        let segs = segments(text);
        if segs.iter().all(|s| matches!(s, Segment::Text(_))) {
            return string_literal(text);
        }

        let mut out = String::from("f\"");
        for seg in segs {
            match seg {
                Segment::Text(t) => out.push_str(&escape(t, true)),
                Segment::Var(name) if self.classes.is_parameter(name) => {
                    out.push('{');
                    out.push_str(&identifier(name));
                    out.push('}');
                }
                Segment::Var(name) => {
                    self.helpers.insert("require");
                    out.push_str(&format!(
                        "{{require({DEVICE_ARG}.get_dynamic_var({n}), {n})}}",
                        n = inner_literal(name)
                    ));
                }
                Segment::Device(name) => {
                    self.helpers.insert("require");
                    out.push_str(&format!(
                        "{{require({DEVICE_ARG}.get_device_variable({n}), {n})}}",
                        n = inner_literal(name)
                    ));
                }
            }
        }
        out.push('"');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::block_parser::parse;
    use crate::processor::classifier::classify;

    fn emit_src(src: &str, includes: &BTreeMap<String, IncludeTarget>) -> Procedure {
        let nodes = parse(src).unwrap();
        emit("proc", &nodes, &classify(src), includes)
    }

    #[test]
    fn test_emit_end_to_end_example() {
        let src = "config x\n<if $LEVEL eq 1>\nset a 1\n<else>\nset a 2\n<fi>\nend\n";
        let proc = emit_src(src, &BTreeMap::new());

        assert_eq!(proc.parameters, vec!["level".to_string()]);
        assert_eq!(
            proc.source,
            "\
def proc(device, level):
    device.execute(\"config x\")
    if level == \"1\":
        device.execute(\"set a 1\")
    else:
        device.execute(\"set a 2\")
    device.execute(\"end\")
"
        );
        assert!(proc.helpers.is_empty());
    }

    #[test]
    fn test_parameter_order_is_sorted() {
        let src = "set z $ZETA\nset a $ALPHA\nset m {$Mid}\n";
        let proc = emit_src(src, &BTreeMap::new());
        assert_eq!(proc.parameters, vec!["alpha", "mid", "zeta"]);
        assert!(proc.source.starts_with("def proc(device, alpha, mid, zeta):\n"));
    }

    #[test]
    fn test_substitution_and_escaping() {
        let src = "\
setvar -e \"SN: (\\S+)\" -to SERIAL
exec ping {$HOST} \"quoted\" {braces}
diag $SERIAL FGT_A:PORT1
";
        let proc = emit_src(src, &BTreeMap::new());
        let lines: Vec<&str> = proc.source.lines().collect();

        assert_eq!(lines[0], "def proc(device, host):");
        assert_eq!(
            lines[1],
            r#"    device.execute("setvar -e \"SN: (\\S+)\" -to SERIAL")"#
        );
        assert_eq!(
            lines[2],
            r#"    device.execute(f"exec ping {host} \"quoted\" {{braces}}")"#
        );
        assert_eq!(
            lines[3],
            r#"    device.execute(f"diag {require(device.get_dynamic_var('SERIAL'), 'SERIAL')} {require(device.get_device_variable('FGT_A:PORT1'), 'FGT_A:PORT1')}")"#
        );
        assert!(proc.helpers.contains("require"));
    }

    #[test]
    fn test_includes_forward_parameters_and_unresolved_are_dropped() {
        let mut includes = BTreeMap::new();
        includes.insert(
            "common/setup.txt".to_string(),
            IncludeTarget {
                procedure_name: "inc_common_setup".into(),
                parameters: vec!["port".into(), "vdom".into()],
            },
        );
        let src = "include common/setup.txt\ninclude missing/path.txt\nshow $PORT\n";
        let proc = emit_src(src, &includes);

        assert_eq!(proc.parameters, vec!["port", "vdom"]);
        assert_eq!(
            proc.source,
            "\
def proc(device, port, vdom):
    from procedures.inc_common_setup import inc_common_setup
    inc_common_setup(device, port=port, vdom=vdom)
    device.execute(f\"show {port}\")
"
        );
        assert!(!proc.source.contains("missing"));
    }

    #[test]
    fn test_empty_branches_emit_pass() {
        let src = "<if $A eq 1>\n<elseif $A > 2>\ninclude gone.txt\n<else>\n<fi>\n";
        let proc = emit_src(src, &BTreeMap::new());

        assert_eq!(
            proc.source,
            "\
def proc(device, a):
    if a == \"1\":
        pass
    elif to_int(a, \"A\") > 2:
        pass
"
        );
        assert!(proc.helpers.contains("to_int"));
    }

    #[test]
    fn test_empty_script_is_a_valid_procedure() {
        let proc = emit_src("# nothing here\n", &BTreeMap::new());
        assert_eq!(proc.source, "def proc(device):\n    pass\n");
    }

    #[test]
    fn test_identifier_escapes_reserved_names() {
        let test_cases = vec![
            ("LEVEL", "level"),
            ("if", "if_"),
            ("IF_", "if__"),
            ("DEVICE", "device_"),
            ("TO_INT", "to_int_"),
            ("Require", "require_"),
            ("INC_COMMON", "inc_common_"),
            ("INCOME", "income"),
            ("9lives", "_9lives"),
        ];
        for (input, expected) in test_cases {
            assert_eq!(identifier(input), expected);
        }
    }

    #[test]
    fn test_parameters_never_shadow_helpers_or_callees() {
        let mut includes = BTreeMap::new();
        includes.insert(
            "common.txt".to_string(),
            IncludeTarget {
                procedure_name: "inc_common".into(),
                parameters: vec!["inc_common".into()],
            },
        );
        let src = "<if $TO_INT > 3>\nshow $REQUIRE\ninclude common.txt\n<fi>\n";
        let proc = emit_src(src, &includes);

        assert_eq!(proc.parameters, vec!["inc_common", "require", "to_int"]);
        assert_eq!(
            proc.source,
            "\
def proc(device, inc_common_, require_, to_int_):
    from procedures.inc_common import inc_common
    if to_int(to_int_, \"TO_INT\") > 3:
        device.execute(f\"show {require_}\")
        inc_common(device, inc_common_=inc_common_)
"
        );
    }

    #[test]
    fn test_render_module_imports_helpers() {
        let proc = emit_src("<if $N > 3>\nshow\n<fi>\n", &BTreeMap::new());
        let module = proc.render_module("a.txt");
        assert!(module.starts_with("# Generated by scriptconv from a.txt - do not edit.\n"));
        assert!(module.contains("from procedures._support import to_int\n"));
        assert!(module.ends_with(&proc.source));
    }
}
