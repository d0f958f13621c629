//! Line lexer for the device script language.
//!
//! The language is line oriented, so a token is one classified line.
//! Guard text is *not* interpreted here – `<if $X eq 1>` comes out as
//! `If("$X eq 1")` and the block parser decides what it means.
//
//  Lexical items (one per line, surrounding whitespace ignored):
//
//      Blank    ::= ""                     (dropped)
//      Comment  ::= '#' .*                 (dropped)
//      If       ::= '<if' WS guard '>'
//      ElseIf   ::= '<elseif' WS guard '>'
//      Else     ::= '<else>'
//      Fi       ::= '<fi>'
//      Include  ::= 'include' WS path
//      Command  ::= anything else

use std::iter::Enumerate;
use std::str::Lines;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Command(String),
    Include(String),
    If(String),
    ElseIf(String),
    Else,
    Fi,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// 1-based source line.
    pub line: usize,
    /// Trimmed source text, kept for error messages.
    pub text: String,
    pub kind: TokenKind,
}

#[derive(Clone)]
pub struct Lexer<'a> {
    lines: Enumerate<Lines<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            lines: src.lines().enumerate(),
        }
    }
}

/// Classify one trimmed, non-blank, non-comment line.
fn classify_line(line: &str) -> TokenKind {
    if let Some(tag) = control_tag(line) {
        if tag == "else" {
            return TokenKind::Else;
        }
        if tag == "fi" {
            return TokenKind::Fi;
        }
        // guard-less forms still open/extend a chain; the guard is unparsable
        if tag == "if" {
            return TokenKind::If(String::new());
        }
        if tag == "elseif" {
            return TokenKind::ElseIf(String::new());
        }
        if let Some(guard) = keyword_arg(tag, "elseif") {
            return TokenKind::ElseIf(guard.to_string());
        }
        if let Some(guard) = keyword_arg(tag, "if") {
            return TokenKind::If(guard.to_string());
        }
    }

    if let Some(path) = keyword_arg(line, "include") {
        if !path.is_empty() {
            return TokenKind::Include(path.to_string());
        }
    }

    TokenKind::Command(line.to_string())
}

/// Inner text of `<…>`, or `None` when the line is not wrapped in angle brackets.
fn control_tag(line: &str) -> Option<&str> {
    line.strip_prefix('<')?.strip_suffix('>').map(str::trim)
}

/// `keyword` followed by whitespace, returning the trimmed rest.
fn keyword_arg<'s>(text: &'s str, keyword: &str) -> Option<&'s str> {
    let rest = text.strip_prefix(keyword)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        for (idx, raw) in self.lines.by_ref() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return Some(Token {
                line: idx + 1,
                text: line.to_string(),
                kind: classify_line(line),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{Lexer, TokenKind};

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenisation() {
        let test_cases = vec![
            (
                "config system global\n  set hostname fgt\nend\n",
                vec![
                    TokenKind::Command("config system global".into()),
                    TokenKind::Command("set hostname fgt".into()),
                    TokenKind::Command("end".into()),
                ],
            ),
            (
                "# leading comment\n\n   # indented comment\nshow\n",
                vec![TokenKind::Command("show".into())],
            ),
            (
                "include testcase/GLOBAL:VERSION/common/setup.txt",
                vec![TokenKind::Include(
                    "testcase/GLOBAL:VERSION/common/setup.txt".into(),
                )],
            ),
            (
                // `included` is a command, not an include
                "included stuff",
                vec![TokenKind::Command("included stuff".into())],
            ),
        ];

        for (src, expected) in test_cases {
            assert_eq!(kinds(src), expected, "source: {src:?}");
        }
    }

    #[test]
    fn test_control_tokens() {
        let src = "<if $N > 3>\n<elseif FGT_A:MODE eq yes>\n<else>\n<fi>\n";
        assert_eq!(
            kinds(src),
            vec![
                TokenKind::If("$N > 3".into()),
                TokenKind::ElseIf("FGT_A:MODE eq yes".into()),
                TokenKind::Else,
                TokenKind::Fi,
            ]
        );
    }

    #[test]
    fn test_unknown_tags_are_commands() {
        assert_eq!(
            kinds("<intset N 5>"),
            vec![TokenKind::Command("<intset N 5>".into())]
        );
    }

    #[test]
    fn test_line_numbers_skip_dropped_lines() {
        let tokens: Vec<_> = Lexer::new("# c\n\nshow\n").collect();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].line, 3);
        assert_eq!(tokens[0].text, "show");
    }
}
