//! Sentence templates and the sentence-line parser
//!
//! A template line is a sequence of words, `(a | b)` alternatives, `[optional]`
//! groups, `<rule>` references, `$slot` references and `{tag}` annotations.
//! The parser produces a [`Template`] tree; references are kept symbolic and
//! resolved later by the compiler.

use crate::error::{GrammarError, Result};
use crate::symbols::{MARKER_PREFIX, SUBSTITUTION_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed sentence template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Template {
    /// A literal word; `substitution` replaces it in the decoded output
    Word {
        text: String,
        substitution: Option<String>,
    },
    /// Items matched one after another; empty matches the empty input
    Sequence(Vec<Template>),
    /// Exactly one of the branches
    Alternation(Vec<Template>),
    /// The inner template or nothing
    Optional(Box<Template>),
    /// Reference to a rule, spliced in at compile time
    RuleRef(RuleName),
    /// Reference to a slot's value list
    SlotRef(String),
    /// Span whose matched words become an entity
    Tagged { inner: Box<Template>, tag: Tag },
    /// Group whose matched words are reported as `value`
    Substitution { inner: Box<Template>, value: String },
}

/// Entity annotation `{slot}` or `{slot:value}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub slot: String,
    pub value: Option<String>,
}

/// Rule reference; `grammar` is set for `<Intent.rule>` references
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleName {
    pub grammar: Option<String>,
    pub rule: String,
}

impl RuleName {
    pub fn local(rule: impl Into<String>) -> Self {
        Self {
            grammar: None,
            rule: rule.into(),
        }
    }

    pub fn remote(grammar: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            grammar: Some(grammar.into()),
            rule: rule.into(),
        }
    }

    /// Grammar that defines this rule when referenced from `intent`
    pub fn owner<'a>(&'a self, intent: &'a str) -> &'a str {
        self.grammar.as_deref().unwrap_or(intent)
    }

    /// Fully qualified `Intent.rule` name
    pub fn qualified(&self, intent: &str) -> String {
        format!("{}.{}", self.owner(intent), self.rule)
    }

    fn parse(text: &str) -> Self {
        match text.split_once('.') {
            Some((grammar, rule)) => Self::remote(grammar, rule),
            None => Self::local(text),
        }
    }
}

impl fmt::Display for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.grammar {
            Some(grammar) => write!(f, "<{}.{}>", grammar, self.rule),
            None => write!(f, "<{}>", self.rule),
        }
    }
}

/// Something a template refers to by name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Rule(RuleName),
    Slot(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Rule(name) => write!(f, "{name}"),
            Reference::Slot(name) => write!(f, "${name}"),
        }
    }
}

impl Template {
    pub fn word(text: impl Into<String>) -> Self {
        Template::Word {
            text: text.into(),
            substitution: None,
        }
    }

    pub fn tagged(inner: Template, slot: impl Into<String>) -> Self {
        Template::Tagged {
            inner: Box::new(inner),
            tag: Tag {
                slot: slot.into(),
                value: None,
            },
        }
    }

    /// Rule and slot references in first-occurrence order
    pub fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<Reference>) {
        let found = match self {
            Template::Word { .. } => None,
            Template::Sequence(items) | Template::Alternation(items) => {
                for item in items {
                    item.collect_references(refs);
                }
                None
            }
            Template::Optional(inner)
            | Template::Tagged { inner, .. }
            | Template::Substitution { inner, .. } => {
                inner.collect_references(refs);
                None
            }
            Template::RuleRef(name) => Some(Reference::Rule(name.clone())),
            Template::SlotRef(name) => Some(Reference::Slot(name.clone())),
        };
        if let Some(reference) = found {
            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }
    }

    /// Rewrite every literal word, keeping the original spelling as its output.
    pub fn map_words(&mut self, transform: &dyn Fn(&str) -> String) {
        match self {
            Template::Word { text, substitution } => {
                let mapped = transform(text);
                if mapped != *text {
                    if substitution.is_none() {
                        *substitution = Some(text.clone());
                    }
                    *text = mapped;
                }
            }
            Template::Sequence(items) | Template::Alternation(items) => {
                for item in items {
                    item.map_words(transform);
                }
            }
            Template::Optional(inner)
            | Template::Tagged { inner, .. }
            | Template::Substitution { inner, .. } => inner.map_words(transform),
            Template::RuleRef(_) | Template::SlotRef(_) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Pipe,
    Rule(String),
    Slot(String),
    Tag(Tag),
    Word(String),
}

#[derive(Debug, Clone)]
struct Lexeme {
    tok: Tok,
    /// No whitespace between this lexeme and the previous one
    glued: bool,
}

fn is_meta(c: char) -> bool {
    matches!(c, '(' | ')' | '[' | ']' | '|' | '<' | '>' | '{' | '}')
}

fn lex(text: &str, intent: &str, line: usize) -> Result<Vec<Lexeme>> {
    let chars: Vec<char> = text.chars().collect();
    let mut lexemes = Vec::new();
    let mut i = 0;
    let mut glued = false;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            glued = false;
            i += 1;
            continue;
        }

        let tok = match c {
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            '|' => Tok::Pipe,
            '<' | '{' => {
                let close = if c == '<' { '>' } else { '}' };
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == close)
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| {
                        GrammarError::syntax(intent, line, format!("unbalanced '{c}'"))
                    })?;
                let body: String = chars[i + 1..end].iter().collect();
                let body = body.trim().to_string();
                i = end;
                if c == '<' {
                    lex_rule(&body, intent, line)?
                } else {
                    lex_tag(&body, intent, line)?
                }
            }
            '>' | '}' => {
                return Err(GrammarError::syntax(
                    intent,
                    line,
                    format!("unbalanced '{c}'"),
                ))
            }
            _ => {
                let start = i;
                while i + 1 < chars.len() && !chars[i + 1].is_whitespace() && !is_meta(chars[i + 1])
                {
                    i += 1;
                }
                let word: String = chars[start..=i].iter().collect();
                match word.strip_prefix('$') {
                    Some(slot) if slot.is_empty() => {
                        return Err(GrammarError::syntax(intent, line, "empty slot reference"))
                    }
                    Some(slot) => Tok::Slot(slot.to_string()),
                    None => Tok::Word(word),
                }
            }
        };

        lexemes.push(Lexeme { tok, glued });
        glued = true;
        i += 1;
    }

    Ok(lexemes)
}

fn lex_rule(body: &str, intent: &str, line: usize) -> Result<Tok> {
    if body.is_empty() || body.contains(char::is_whitespace) {
        return Err(GrammarError::syntax(
            intent,
            line,
            format!("invalid rule reference <{body}>"),
        ));
    }
    Ok(Tok::Rule(body.to_string()))
}

fn lex_tag(body: &str, intent: &str, line: usize) -> Result<Tok> {
    let (slot, value) = match body.split_once(SUBSTITUTION_SEPARATOR) {
        Some((slot, value)) => (slot.trim(), Some(value.trim().to_string())),
        None => (body, None),
    };
    if slot.is_empty() || slot.contains(char::is_whitespace) {
        return Err(GrammarError::syntax(
            intent,
            line,
            format!("invalid tag {{{body}}}"),
        ));
    }
    Ok(Tok::Tag(Tag {
        slot: slot.to_string(),
        value,
    }))
}

// ---------------------------------------------------------------------------
// Parser

struct Parser<'a> {
    lexemes: Vec<Lexeme>,
    pos: usize,
    intent: &'a str,
    line: usize,
}

/// Parse one sentence (or rule body / slot value) into a template.
pub fn parse_template(text: &str, intent: &str, line: usize) -> Result<Template> {
    let mut parser = Parser {
        lexemes: lex(text, intent, line)?,
        pos: 0,
        intent,
        line,
    };
    let template = parser.alternation()?;
    match parser.peek() {
        None => Ok(template),
        Some(tok) => Err(parser.error(format!("unbalanced '{}'", closer(tok)))),
    }
}

fn closer(tok: &Tok) -> char {
    match tok {
        Tok::RBracket => ']',
        Tok::Pipe => '|',
        _ => ')',
    }
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.lexemes.get(self.pos).map(|lexeme| &lexeme.tok)
    }

    fn next(&mut self) -> Option<Lexeme> {
        let lexeme = self.lexemes.get(self.pos).cloned();
        self.pos += 1;
        lexeme
    }

    fn error(&self, message: impl Into<String>) -> GrammarError {
        GrammarError::syntax(self.intent, self.line, message)
    }

    fn alternation(&mut self) -> Result<Template> {
        let mut branches = vec![self.sequence()?];
        while self.peek() == Some(&Tok::Pipe) {
            self.pos += 1;
            branches.push(self.sequence()?);
        }
        Ok(if branches.len() == 1 {
            branches.remove(0)
        } else {
            Template::Alternation(branches)
        })
    }

    fn sequence(&mut self) -> Result<Template> {
        let mut items = Vec::new();
        while let Some(tok) = self.peek() {
            if matches!(tok, Tok::Pipe | Tok::RParen | Tok::RBracket) {
                break;
            }
            items.push(self.item()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Template::Sequence(items)
        })
    }

    fn item(&mut self) -> Result<Template> {
        let mut template = self.atom()?;

        // (group):value
        if let Some(Lexeme {
            tok: Tok::Word(word),
            glued: true,
        }) = self.lexemes.get(self.pos)
        {
            if let Some(value) = word.strip_prefix(SUBSTITUTION_SEPARATOR) {
                if matches!(template, Template::Alternation(_) | Template::Sequence(_) | Template::Optional(_))
                {
                    template = Template::Substitution {
                        inner: Box::new(template),
                        value: value.to_string(),
                    };
                    self.pos += 1;
                }
            }
        }

        while let Some(Tok::Tag(tag)) = self.peek() {
            let tag = tag.clone();
            self.pos += 1;
            template = Template::Tagged {
                inner: Box::new(template),
                tag,
            };
        }

        Ok(template)
    }

    fn atom(&mut self) -> Result<Template> {
        let Some(lexeme) = self.next() else {
            return Err(self.error("unexpected end of sentence"));
        };

        match lexeme.tok {
            Tok::LParen => {
                let inner = self.alternation()?;
                self.expect(Tok::RParen, '(')?;
                // Keep the group boundary so a trailing substitution applies to all of it
                Ok(match inner {
                    Template::Alternation(_) | Template::Sequence(_) => inner,
                    other => Template::Sequence(vec![other]),
                })
            }
            Tok::LBracket => {
                let inner = self.alternation()?;
                self.expect(Tok::RBracket, '[')?;
                Ok(Template::Optional(Box::new(inner)))
            }
            Tok::Rule(name) => Ok(Template::RuleRef(RuleName::parse(&name))),
            Tok::Slot(name) => Ok(Template::SlotRef(name)),
            Tok::Word(word) => self.word(&word),
            Tok::Tag(tag) => Err(self.error(format!("tag {{{}}} has nothing to tag", tag.slot))),
            other => Err(self.error(format!("unexpected '{}'", closer(&other)))),
        }
    }

    fn expect(&mut self, tok: Tok, opener: char) -> Result<()> {
        match self.next() {
            Some(lexeme) if lexeme.tok == tok => Ok(()),
            _ => Err(self.error(format!("unbalanced '{opener}'"))),
        }
    }

    fn word(&self, word: &str) -> Result<Template> {
        let (text, substitution) = match word.split_once(SUBSTITUTION_SEPARATOR) {
            Some((raw, value)) => (raw, Some(value.to_string())),
            None => (word, None),
        };
        if text.is_empty() && substitution.as_deref().map_or(true, str::is_empty) {
            return Err(self.error("empty substitution"));
        }
        if text.starts_with(MARKER_PREFIX) {
            return Err(self.error(format!("'{text}' uses the reserved prefix {MARKER_PREFIX}")));
        }
        Ok(Template::Word {
            text: text.to_string(),
            substitution,
        })
    }
}
