//! Parser that consumes the line lexer and builds a node tree.

use std::iter::Peekable;
use std::sync::LazyLock;

use regex::Regex;

use super::ast::*;
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::ParseError;

static GUARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<subject>\{\$[A-Za-z_][A-Za-z0-9_]*\}|\$[A-Za-z_][A-Za-z0-9_]*|[A-Za-z_][A-Za-z0-9_]*:[A-Za-z_][A-Za-z0-9_]*)\s*(?P<op><=|>=|<|>|eq\s|ne\s)\s*(?P<literal>.+)$",
    )
    .expect("guard pattern is valid")
});

/// Parse a whole script with permissive guards.
pub fn parse(src: &str) -> Result<Vec<Node>, ParseError> {
    parse_with(src, false)
}

/// Parse a whole script. With `strict_conditions` an unparsable guard is
/// an error instead of an always-true branch.
pub fn parse_with(src: &str, strict_conditions: bool) -> Result<Vec<Node>, ParseError> {
    Parser::new(src, strict_conditions).parse()
}

/// Turn guard text into a condition. Never fails: anything unrecognised
/// becomes `Guard::Unparsable`.
pub fn parse_guard(text: &str) -> Guard {
    let text = text.trim();
    let Some(caps) = GUARD_RE.captures(text) else {
        return Guard::Unparsable(text.to_string());
    };

    let subject = &caps["subject"];
    let (subject_kind, name) = if let Some(inner) = subject.strip_prefix("{$") {
        (SubjectKind::Parameter, inner.trim_end_matches('}'))
    } else if let Some(inner) = subject.strip_prefix('$') {
        (SubjectKind::Parameter, inner)
    } else {
        (SubjectKind::DeviceScopedVar, subject)
    };

    let op_text = caps["op"].trim();
    let Some(operator) = Operator::TOKENS
        .iter()
        .find(|(tok, _)| *tok == op_text)
        .map(|(_, op)| *op)
    else {
        return Guard::Unparsable(text.to_string());
    };

    Guard::Compare(Condition {
        subject_kind,
        name: name.to_string(),
        operator,
        literal: strip_quotes(caps["literal"].trim()).to_string(),
    })
}

fn strip_quotes(literal: &str) -> &str {
    for quote in ['"', '\''] {
        if literal.len() >= 2 && literal.starts_with(quote) && literal.ends_with(quote) {
            return &literal[1..literal.len() - 1];
        }
    }
    literal
}

struct Parser<'a> {
    lex: Peekable<Lexer<'a>>,
    strict_conditions: bool,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, strict_conditions: bool) -> Self {
        Self {
            lex: Lexer::new(src).peekable(),
            strict_conditions,
        }
    }

    fn parse(&mut self) -> Result<Vec<Node>, ParseError> {
        let body = self.parse_block()?;
        match self.lex.next() {
            None => Ok(body),
            Some(tok) => {
                let what = match tok.kind {
                    TokenKind::ElseIf(_) => "<elseif>",
                    TokenKind::Else => "<else>",
                    _ => "<fi>",
                };
                Err(ParseError::new(
                    tok.line,
                    tok.text,
                    format!("{what} without matching <if>"),
                ))
            }
        }
    }

    /// Nodes up to (not including) the next `<elseif>`, `<else>`, `<fi>` or EOF.
    fn parse_block(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            match self.lex.peek().map(|t| &t.kind) {
                None | Some(TokenKind::ElseIf(_) | TokenKind::Else | TokenKind::Fi) => {
                    return Ok(nodes);
                }
                Some(_) => {}
            }

            let Some(tok) = self.lex.next() else {
                return Ok(nodes);
            };
            let node = match tok.kind {
                TokenKind::Command(text) => Node::Command {
                    text,
                    line: tok.line,
                },
                TokenKind::Include(logical_path) => Node::IncludeRef {
                    logical_path,
                    line: tok.line,
                },
                TokenKind::If(ref guard) => {
                    let guard = guard.clone();
                    self.parse_if(&tok, &guard)?
                }
                _ => unreachable!("continuation tokens are peeked above"),
            };
            nodes.push(node);
        }
    }

    fn parse_if(&mut self, open: &Token, guard: &str) -> Result<Node, ParseError> {
        let mut branches = vec![self.parse_branch(open, guard)?];
        let mut else_body = Vec::new();

        loop {
            let tok = self.next_or_unclosed(open)?;
            match tok.kind {
                TokenKind::ElseIf(ref guard) => {
                    let guard = guard.clone();
                    branches.push(self.parse_branch(&tok, &guard)?);
                }
                TokenKind::Else => {
                    else_body = self.parse_block()?;
                    let close = self.next_or_unclosed(open)?;
                    match close.kind {
                        TokenKind::Fi => break,
                        TokenKind::ElseIf(_) => {
                            return Err(ParseError::new(
                                close.line,
                                close.text,
                                "<elseif> after <else>",
                            ));
                        }
                        _ => {
                            return Err(ParseError::new(
                                close.line,
                                close.text,
                                "second <else> in the same <if>",
                            ));
                        }
                    }
                }
                TokenKind::Fi => break,
                _ => {
                    return Err(ParseError::new(tok.line, tok.text, "unexpected token in <if>"));
                }
            }
        }

        Ok(Node::IfChain {
            branches,
            else_body,
        })
    }

    fn parse_branch(&mut self, tok: &Token, guard_text: &str) -> Result<Branch, ParseError> {
        let guard = parse_guard(guard_text);
        if self.strict_conditions {
            if let Guard::Unparsable(text) = &guard {
                return Err(ParseError::new(
                    tok.line,
                    tok.text.clone(),
                    format!("unparsable condition `{text}`"),
                ));
            }
        }
        let body = self.parse_block()?;
        Ok(Branch {
            guard,
            line: tok.line,
            body,
        })
    }

    fn next_or_unclosed(&mut self, open: &Token) -> Result<Token, ParseError> {
        self.lex.next().ok_or_else(|| {
            ParseError::new(open.line, open.text.clone(), "<if> is never closed by <fi>")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(text: &str, line: usize) -> Node {
        Node::Command {
            text: text.into(),
            line,
        }
    }

    fn cond(kind: SubjectKind, name: &str, operator: Operator, literal: &str) -> Guard {
        Guard::Compare(Condition {
            subject_kind: kind,
            name: name.into(),
            operator,
            literal: literal.into(),
        })
    }

    #[test]
    fn test_parse_guard() {
        let test_cases = vec![
            (
                "$LEVEL eq 1",
                cond(SubjectKind::Parameter, "LEVEL", Operator::Eq, "1"),
            ),
            (
                "{$LEVEL} ne \"abc\"",
                cond(SubjectKind::Parameter, "LEVEL", Operator::Ne, "abc"),
            ),
            ("$N > 3", cond(SubjectKind::Parameter, "N", Operator::Gt, "3")),
            ("$N>=10", cond(SubjectKind::Parameter, "N", Operator::Ge, "10")),
            ("$N <= 'x'", cond(SubjectKind::Parameter, "N", Operator::Le, "x")),
            (
                "FGT_A:MODE eq yes",
                cond(SubjectKind::DeviceScopedVar, "FGT_A:MODE", Operator::Eq, "yes"),
            ),
            ("$N is big", Guard::Unparsable("$N is big".into())),
            ("$Né eq 1", Guard::Unparsable("$Né eq 1".into())),
            ("", Guard::Unparsable("".into())),
            ("$N eq", Guard::Unparsable("$N eq".into())),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_guard(input), expected, "guard: {input:?}");
        }
    }

    #[test]
    fn test_parse_end_to_end_example() {
        let src = "config x\n<if $LEVEL eq 1>\nset a 1\n<else>\nset a 2\n<fi>\nend\n";
        let nodes = parse(src).unwrap();

        assert_eq!(
            nodes,
            vec![
                cmd("config x", 1),
                Node::IfChain {
                    branches: vec![Branch {
                        guard: cond(SubjectKind::Parameter, "LEVEL", Operator::Eq, "1"),
                        line: 2,
                        body: vec![cmd("set a 1", 3)],
                    }],
                    else_body: vec![cmd("set a 2", 5)],
                },
                cmd("end", 7),
            ]
        );
    }

    #[test]
    fn test_parse_elseif_chain_and_nesting() {
        let src = "\
<if $A eq 1>
  <if $B eq 2>
    inner
  <fi>
<elseif $A eq 2>
  include common/setup.txt
<elseif $A eq 3>
<fi>
";
        let nodes = parse(src).unwrap();
        assert_eq!(nodes.len(), 1);

        let Node::IfChain {
            branches,
            else_body,
        } = &nodes[0]
        else {
            panic!("expected if chain, got {nodes:?}");
        };
        assert_eq!(branches.len(), 3);
        assert!(else_body.is_empty());
        assert!(matches!(branches[0].body[0], Node::IfChain { .. }));
        assert_eq!(
            branches[1].body,
            vec![Node::IncludeRef {
                logical_path: "common/setup.txt".into(),
                line: 6
            }]
        );
        assert!(branches[2].body.is_empty());
    }

    #[test]
    fn test_unbalanced_tokens_are_errors() {
        let test_cases = vec![
            ("show\n<fi>\n", 2, "<fi> without matching <if>"),
            ("<else>\n", 1, "<else> without matching <if>"),
            ("<elseif $A eq 1>\n", 1, "<elseif> without matching <if>"),
            ("<if $A eq 1>\nshow\n", 1, "<if> is never closed by <fi>"),
            ("<if $A eq 1>\n<else>\n<elseif $A eq 2>\n<fi>\n", 3, "<elseif> after <else>"),
            ("<if $A eq 1>\n<else>\n<else>\n<fi>\n", 3, "second <else> in the same <if>"),
        ];

        for (src, line, message) in test_cases {
            let err = parse(src).unwrap_err();
            assert_eq!(err.line, line, "source: {src:?}");
            assert_eq!(err.message, message, "source: {src:?}");
        }
    }

    #[test]
    fn test_unparsable_guard_is_permissive_unless_strict() {
        let src = "<if whatever>\nshow\n<fi>\n";

        let nodes = parse(src).unwrap();
        let guards = Node::guards(&nodes);
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].0, &Guard::Unparsable("whatever".into()));

        let err = parse_with(src, true).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unparsable condition"));
    }

    #[test]
    fn test_deep_nesting() {
        let depth = 200;
        let mut src = String::new();
        for i in 0..depth {
            src.push_str(&format!("<if $V{i} eq 1>\n"));
        }
        src.push_str("core\n");
        for _ in 0..depth {
            src.push_str("<fi>\n");
        }

        let mut nodes = parse(&src).unwrap();
        let mut seen = 0;
        while let Some(Node::IfChain { mut branches, .. }) = nodes.pop() {
            seen += 1;
            nodes = branches.remove(0).body;
        }
        assert_eq!(seen, depth);
    }
}
