//! Lemma discovery: tokenizes a theory file well enough to find every
//! `lemma` / `diff_lemma` / `equiv_lemma` / `diffEquivLemma` declaration
//! that survives preprocessor conditionals, without fully parsing the
//! surrounding protocol rules.
//!
//! The preprocessor grammar mirrors the C preprocessor subset Tamarin
//! itself accepts: `#ifdef NAME`, `#else`, `#endif`, and `#define NAME`,
//! with NAME optionally a boolean expression built from `&`, `|`, `not`
//! and parentheses.

use logos::Logos;
use std::collections::HashSet;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum Tok {
    #[token("lemma")]
    Lemma,
    #[token("diff_lemma")]
    DiffLemma,
    #[token("equiv_lemma")]
    EquivLemma,
    #[token("diffEquivLemma")]
    DiffEquivLemma,

    #[token("#ifdef")]
    Ifdef,
    #[token("#else")]
    Else,
    #[token("#endif")]
    Endif,
    #[token("#define")]
    Define,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[token("&")]
    And,
    #[token("|")]
    Or,
    #[token("not")]
    Not,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(":")]
    Colon,

    #[regex(r"//[^\n]*", logos::skip)]
    #[regex(r"/\*([^*]|\*[^/])*\*/", logos::skip)]
    #[regex(r"[ \t\r]+", logos::skip)]
    Skip,

    #[token("\n")]
    Newline,

    Error,
}

/// A lemma name together with its one-indexed declaration line, for
/// diagnostics and for the synthetic-name fallback on anonymous
/// equivalence lemmas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLemma {
    pub name: String,
    pub line: usize,
}

/// A boolean condition guarding a block of the theory file, evaluated
/// against the set of names defined via `#define` earlier in the file.
#[derive(Debug, Clone)]
enum Condition {
    Var(String),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    fn eval(&self, defined: &HashSet<String>) -> bool {
        match self {
            Condition::Var(name) => defined.contains(name),
            Condition::Not(inner) => !inner.eval(defined),
            Condition::And(a, b) => a.eval(defined) && b.eval(defined),
            Condition::Or(a, b) => a.eval(defined) || b.eval(defined),
        }
    }
}

/// Recursive-descent parser over a line's token slice for a single
/// `#ifdef` condition expression.
struct CondParser<'a> {
    tokens: &'a [(Tok, String)],
    pos: usize,
}

impl<'a> CondParser<'a> {
    fn new(tokens: &'a [(Tok, String)]) -> Self {
        CondParser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&(Tok, String)> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&(Tok, String)> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> Condition {
        let mut left = self.parse_and();
        while matches!(self.peek(), Some((Tok::Or, _))) {
            self.bump();
            let right = self.parse_and();
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        left
    }

    fn parse_and(&mut self) -> Condition {
        let mut left = self.parse_unary();
        while matches!(self.peek(), Some((Tok::And, _))) {
            self.bump();
            let right = self.parse_unary();
            left = Condition::And(Box::new(left), Box::new(right));
        }
        left
    }

    fn parse_unary(&mut self) -> Condition {
        match self.peek().map(|(t, _)| *t) {
            Some(Tok::Not) => {
                self.bump();
                Condition::Not(Box::new(self.parse_unary()))
            }
            Some(Tok::LParen) => {
                self.bump();
                let inner = self.parse_or();
                if matches!(self.peek(), Some((Tok::RParen, _))) {
                    self.bump();
                }
                inner
            }
            Some(Tok::Ident) => {
                let text = self.bump().unwrap().1.clone();
                Condition::Var(text)
            }
            _ => Condition::Var(String::new()),
        }
    }
}

fn parse_condition(tokens: &[(Tok, String)]) -> Condition {
    CondParser::new(tokens).parse_or()
}

/// One logical line's worth of tokens, with its trailing keyword/ident
/// structure intact for directive and lemma-keyword recognition.
struct Line {
    tokens: Vec<(Tok, String)>,
    number: usize,
}

fn split_lines(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    let mut number = 1;
    let mut lexer = Tok::lexer(source);

    while let Some(result) = lexer.next() {
        let tok = result.unwrap_or(Tok::Error);
        if tok == Tok::Newline {
            lines.push(Line {
                tokens: std::mem::take(&mut current),
                number,
            });
            number += 1;
            continue;
        }
        current.push((tok, lexer.slice().to_string()));
    }
    if !current.is_empty() {
        lines.push(Line {
            tokens: current,
            number,
        });
    }
    lines
}

/// Walks theory source, tracking `#define`/`#ifdef` state, and returns
/// every lemma declaration that is live given `active_flags` as the
/// seeded `#define` set, mirroring the `-D` flags a run would pass to
/// the prover itself.
pub fn discover(source: &str, active_flags: &[String]) -> Vec<DiscoveredLemma> {
    let mut defined: HashSet<String> = active_flags.iter().cloned().collect();
    let mut stack: Vec<bool> = Vec::new();
    let mut lemmas = Vec::new();
    let mut anon_counter: usize = 0;

    for line in split_lines(source) {
        let Some((first_kind, _)) = line.tokens.first() else {
            continue;
        };

        match first_kind {
            Tok::Define => {
                if let Some((Tok::Ident, name)) = line.tokens.get(1) {
                    defined.insert(name.clone());
                }
                continue;
            }
            Tok::Ifdef => {
                let cond = parse_condition(&line.tokens[1..]);
                let parent_active = stack.iter().all(|b| *b);
                stack.push(parent_active && cond.eval(&defined));
                continue;
            }
            Tok::Else => {
                if let Some(top) = stack.last_mut() {
                    *top = !*top;
                }
                continue;
            }
            Tok::Endif => {
                stack.pop();
                continue;
            }
            _ => {}
        }

        if !stack.iter().all(|b| *b) {
            continue;
        }

        let kind_tag = match first_kind {
            Tok::Lemma => Some("lemma"),
            Tok::DiffLemma => Some("diff_lemma"),
            Tok::EquivLemma => Some("equiv_lemma"),
            Tok::DiffEquivLemma => Some("diff_equiv_lemma"),
            _ => None,
        };
        let Some(kind_tag) = kind_tag else {
            continue;
        };

        let name = match line.tokens.get(1) {
            Some((Tok::Ident, text)) => text.clone(),
            _ => {
                anon_counter += 1;
                format!("{kind_tag}_line_{}", line.number)
            }
        };
        lemmas.push(DiscoveredLemma {
            name,
            line: line.number,
        });
    }

    lemmas
}
