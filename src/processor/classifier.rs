//! Variable classification and guard translation.
//!
//! Three reference forms appear in command text:
//!
//! * `$NAME` / `{$NAME}` – a parameter, unless `NAME` is a capture target;
//! * `DEVICE:NAME` (upper case on both sides) – device-scoped lookup;
//! * `setvar … -to NAME` – capture directive; `NAME` becomes dynamic.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::ast::{Condition, Guard, SubjectKind};
use super::lexer::{Lexer, TokenKind};
use crate::writer::python::{identifier, string_literal};

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\$(?P<braced>[A-Za-z_][A-Za-z0-9_]*)\}|\$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)|\b(?P<device>[A-Z][A-Z0-9_]*:[A-Z][A-Z0-9_]*)\b")
        .expect("reference pattern is valid")
});

static CAPTURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^setvar\b.*\s-to\s+\$?(?P<name>[A-Za-z_][A-Za-z0-9_]*)").expect("capture pattern is valid")
});

/// A piece of command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// `$NAME` or `{$NAME}`, name only.
    Var(&'a str),
    /// `DEVICE:NAME`.
    Device(&'a str),
}

/// Split command text into literal text and variable references.
pub fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in REFERENCE_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            out.push(Segment::Text(&text[last..whole.start()]));
        }
        if let Some(m) = caps.name("braced").or_else(|| caps.name("bare")) {
            out.push(Segment::Var(m.as_str()));
        } else if let Some(m) = caps.name("device") {
            out.push(Segment::Device(m.as_str()));
        }
        last = whole.end();
    }
    if last < text.len() {
        out.push(Segment::Text(&text[last..]));
    }
    out
}

/// Capture target of a `setvar` line, if it is one.
pub fn capture_target(command: &str) -> Option<&str> {
    CAPTURE_RE
        .captures(command)
        .and_then(|c| c.name("name"))
        .map(|m| m.as_str())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Lower-cased parameter names; iteration order is the argument order.
    pub parameters: BTreeSet<String>,
    /// Dynamic names as written.
    pub dynamics: BTreeSet<String>,
    /// `DEVICE:NAME` references.
    pub device_vars: BTreeSet<String>,
}

impl Classification {
    pub fn is_parameter(&self, name: &str) -> bool {
        self.parameters.contains(&name.to_lowercase())
    }

    pub fn is_dynamic(&self, name: &str) -> bool {
        self.dynamics
            .iter()
            .any(|d| d.eq_ignore_ascii_case(name))
    }
}

/// Partition every variable reference in `script_text`.
pub fn classify(script_text: &str) -> Classification {
    let mut captured = BTreeSet::new();
    let mut referenced = Vec::new();
    let mut device_vars = BTreeSet::new();

    for tok in Lexer::new(script_text) {
        let text = match &tok.kind {
            TokenKind::Command(text) => {
                if let Some(name) = capture_target(text) {
                    captured.insert(name.to_string());
                }
                text.as_str()
            }
            TokenKind::If(guard) | TokenKind::ElseIf(guard) => guard.as_str(),
            // include paths carry the version placeholder, not variables
            TokenKind::Include(_) | TokenKind::Else | TokenKind::Fi => continue,
        };
        for seg in segments(text) {
            match seg {
                Segment::Var(name) => referenced.push(name.to_string()),
                Segment::Device(name) => {
                    device_vars.insert(name.to_string());
                }
                Segment::Text(_) => {}
            }
        }
    }

    let mut out = Classification {
        dynamics: captured,
        device_vars,
        ..Default::default()
    };
    for name in referenced {
        if out.is_dynamic(&name) {
            continue;
        }
        out.parameters.insert(name.to_lowercase());
    }
    out
}

/// Final kind of a condition subject once the script is classified.
pub fn subject_kind(condition: &Condition, parameters: &BTreeSet<String>) -> SubjectKind {
    match condition.subject_kind {
        SubjectKind::DeviceScopedVar => SubjectKind::DeviceScopedVar,
        _ if parameters.contains(&condition.name.to_lowercase()) => SubjectKind::Parameter,
        _ => SubjectKind::DynamicVar,
    }
}

/// Python expression reading a variable of the given kind.
pub fn lookup_expr(kind: SubjectKind, name: &str) -> String {
    match kind {
        SubjectKind::Parameter => identifier(name),
        SubjectKind::DynamicVar => {
            format!("device.get_dynamic_var({})", string_literal(name))
        }
        SubjectKind::DeviceScopedVar => {
            format!("device.get_device_variable({})", string_literal(name))
        }
    }
}

/// Render a guard as a Python boolean expression.
pub fn translate_condition(guard: &Guard, parameters: &BTreeSet<String>) -> String {
    let condition = match guard {
        Guard::Compare(condition) => condition,
        Guard::Unparsable(_) => return "True".to_string(),
    };

    let kind = subject_kind(condition, parameters);
    let subject = lookup_expr(kind, &condition.name);
    let op = condition.operator.target_symbol();

    if condition.operator.is_numeric() {
        let lhs = format!("to_int({subject}, {})", string_literal(&condition.name));
        let rhs = match condition.literal.parse::<i64>() {
            Ok(n) => n.to_string(),
            Err(_) => {
                let lit = string_literal(&condition.literal);
                format!("to_int({lit}, {lit})")
            }
        };
        format!("{lhs} {op} {rhs}")
    } else {
        format!("{subject} {op} {}", string_literal(&condition.literal))
    }
}

/// `true` when the rendered guard needs the `to_int` helper.
pub fn needs_int_coercion(guard: &Guard) -> bool {
    matches!(guard, Guard::Compare(c) if c.operator.is_numeric())
}
