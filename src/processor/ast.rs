//! Node tree for one script *before* it is emitted as a procedure.

use std::fmt;

/// Comparison operator inside an `<if …>` guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    /// Longest tokens first so `<=` is never read as `<`.
    pub const TOKENS: &'static [(&'static str, Operator)] = &[
        ("<=", Operator::Le),
        (">=", Operator::Ge),
        ("<", Operator::Lt),
        (">", Operator::Gt),
        ("eq", Operator::Eq),
        ("ne", Operator::Ne),
    ];

    /// `true` for the operators that compare both sides as integers.
    pub fn is_numeric(self) -> bool {
        !matches!(self, Operator::Eq | Operator::Ne)
    }

    /// Python spelling of the operator.
    pub fn target_symbol(self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = Operator::TOKENS
            .iter()
            .find(|(_, op)| op == self)
            .map(|(t, _)| *t)
            .unwrap_or("?");
        f.write_str(token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    /// `$NAME` supplied by the procedure caller.
    Parameter,
    /// Captured at runtime from earlier command output.
    DynamicVar,
    /// `DEVICE:NAME` from the environment configuration.
    DeviceScopedVar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub subject_kind: SubjectKind,
    /// Bare variable name, or `DEVICE:NAME` for device-scoped subjects.
    pub name: String,
    pub operator: Operator,
    /// Literal with surrounding quotes already stripped.
    pub literal: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Compare(Condition),
    /// Guard text that could not be understood. Emitted as always-true.
    Unparsable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub guard: Guard,
    pub line: usize,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A line sent verbatim (after substitution) to the device.
    Command { text: String, line: usize },

    /// `include <path>` – call into another converted script.
    IncludeRef { logical_path: String, line: usize },

    /// `<if …>` … `<elseif …>` … `<else>` … `<fi>`.
    IfChain {
        branches: Vec<Branch>,
        else_body: Vec<Node>,
    },
}

impl Node {
    /// Every include reference in the tree, in execution order, nested ones included.
    pub fn include_refs(nodes: &[Node]) -> Vec<&str> {
        let mut out = Vec::new();
        collect_includes(nodes, &mut out);
        out
    }

    /// Every guard in the tree, depth first.
    pub fn guards(nodes: &[Node]) -> Vec<(&Guard, usize)> {
        let mut out = Vec::new();
        collect_guards(nodes, &mut out);
        out
    }
}

fn collect_includes<'a>(nodes: &'a [Node], out: &mut Vec<&'a str>) {
    for node in nodes {
        match node {
            Node::Command { .. } => {}
            Node::IncludeRef { logical_path, .. } => out.push(logical_path),
            Node::IfChain {
                branches,
                else_body,
            } => {
                for branch in branches {
                    collect_includes(&branch.body, out);
                }
                collect_includes(else_body, out);
            }
        }
    }
}

fn collect_guards<'a>(nodes: &'a [Node], out: &mut Vec<(&'a Guard, usize)>) {
    for node in nodes {
        if let Node::IfChain {
            branches,
            else_body,
        } = node
        {
            for branch in branches {
                out.push((&branch.guard, branch.line));
                collect_guards(&branch.body, out);
            }
            collect_guards(else_body, out);
        }
    }
}

/// One loaded script.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub text: String,
    /// Path as written by the includer (may still contain the version placeholder).
    pub logical_path: String,
    pub physical_path: std::path::PathBuf,
}

impl Script {
    pub fn load(
        logical_path: impl Into<String>,
        physical_path: impl Into<std::path::PathBuf>,
    ) -> std::io::Result<Self> {
        let physical_path = physical_path.into();
        let text = std::fs::read_to_string(&physical_path)?;
        Ok(Self {
            text,
            logical_path: logical_path.into(),
            physical_path,
        })
    }
}
