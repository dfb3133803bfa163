//! Binding string parser
//!
//! A binding string is a `;` separated list of `handler: arg arg ...`
//! clauses. Arguments are whitespace separated words, except for:
//!
//! - `` `expr` ``: inline expression, see [`crate::expr`]
//! - `"text"` / `'text'`: literal text, whitespace kept
//! - `~scope:path` / `~!scope:path`: dependency accessor, ends at
//!   whitespace or `;`. The scope defaults to `model`; `~user:` names the
//!   scope value itself
//!
//! A span left open at the end of the string runs to the end of the string.
//! Parsed rules are immutable and cached per source string in a
//! [`RuleCache`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use graphbind_model::{ReadTracker, Value};
use tracing::trace;

use crate::error::BindingError;
use crate::expr::{self, Expr};
use crate::scope::{DEFAULT_SCOPE, Scope};

/// One `handler: args` clause
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub handler: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Text(String),
    Accessor(Accessor),
    Expr(Rc<Expr>),
}

/// `~[!][scope:]path`. `!~` is accepted as an alias for `~!`
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub scope: String,
    /// `None` reads the scope value itself
    pub path: Option<String>,
    pub negate: bool,
}

impl Accessor {
    fn parse(text: &str, negate: bool) -> Self {
        let (text, negate) = match text.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (text, negate),
        };
        let (scope, path) = match text.split_once(':') {
            Some((scope, path)) => (scope, path),
            None => (DEFAULT_SCOPE, text),
        };
        Accessor {
            scope: if scope.is_empty() { DEFAULT_SCOPE } else { scope }.to_string(),
            path: (!path.is_empty()).then(|| path.to_string()),
            negate,
        }
    }
}

impl Arg {
    /// Current value of the argument. Reads are recorded on `tracker`
    pub fn evaluate(&self, scope: &Scope, tracker: &ReadTracker) -> Value {
        match self {
            Arg::Text(text) => Value::String(text.clone()),
            Arg::Expr(expr) => expr.eval(scope, tracker),
            Arg::Accessor(accessor) => {
                let value = scope.resolve(&accessor.scope, accessor.path.as_deref(), tracker);
                if accessor.negate {
                    Value::Bool(!value.is_truthy())
                } else {
                    value
                }
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Arg::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_accessor(&self) -> Option<&Accessor> {
        match self {
            Arg::Accessor(accessor) => Some(accessor),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Handler(String),
    Arg(Arg),
    End,
}

struct Lexer<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    clause_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            clause_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Characters up to `stop`, or the end of the string
    fn until(&mut self, stop: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| !stop(c)) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn next_token(&mut self) -> Result<Option<Token>, BindingError> {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        if c == ';' {
            self.pos += 1;
            self.clause_start = true;
            return Ok(Some(Token::End));
        }

        if self.clause_start {
            self.clause_start = false;
            let position = self.pos;
            let name = self.until(|c| c == ':' || c == ';');
            let name = name.trim();
            if self.peek() == Some(':') {
                self.pos += 1;
            }
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(BindingError::MissingHandlerName {
                    source_text: self.source.to_string(),
                    position,
                });
            }
            return Ok(Some(Token::Handler(name.to_string())));
        }

        let arg = match c {
            '`' => {
                self.pos += 1;
                let text = self.until(|c| c == '`');
                self.pos += 1;
                let parsed = expr::parse(&text).map_err(|message| BindingError::Expression {
                    source_text: text.clone(),
                    message,
                })?;
                Arg::Expr(Rc::new(parsed))
            }
            '"' | '\'' => {
                self.pos += 1;
                let text = self.until(|q| q == c);
                self.pos += 1;
                Arg::Text(text)
            }
            '~' => {
                self.pos += 1;
                Arg::Accessor(Accessor::parse(&self.accessor_text(), false))
            }
            '!' if self.chars.get(self.pos + 1) == Some(&'~') => {
                self.pos += 2;
                Arg::Accessor(Accessor::parse(&self.accessor_text(), true))
            }
            _ => {
                let text = self.until(|c| c.is_whitespace() || matches!(c, ';' | '`' | '"' | '\'' | '~'));
                Arg::Text(text)
            }
        };
        Ok(Some(Token::Arg(arg)))
    }

    fn accessor_text(&mut self) -> String {
        self.until(|c| c.is_whitespace() || c == ';')
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a binding string into rules
pub fn parse_rules(source: &str) -> Result<Vec<Rule>, BindingError> {
    let mut lexer = Lexer::new(source);
    let mut rules: Vec<Rule> = Vec::new();
    let mut current: Option<Rule> = None;

    while let Some(token) = lexer.next_token()? {
        match token {
            Token::Handler(handler) => {
                current = Some(Rule {
                    handler,
                    args: Vec::new(),
                });
            }
            Token::Arg(arg) => {
                if let Some(rule) = current.as_mut() {
                    rule.args.push(arg);
                }
            }
            Token::End => rules.extend(current.take()),
        }
    }
    rules.extend(current);
    Ok(rules)
}

/// Parsed rules keyed by source string
#[derive(Default)]
pub struct RuleCache {
    rules: RefCell<HashMap<String, Rc<Vec<Rule>>>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source`, reusing an earlier parse of the same string
    pub fn parse(&self, source: &str) -> Result<Rc<Vec<Rule>>, BindingError> {
        if let Some(rules) = self.rules.borrow().get(source) {
            trace!(source, "Binding rules from cache");
            return Ok(rules.clone());
        }
        let rules = Rc::new(parse_rules(source)?);
        self.rules
            .borrow_mut()
            .insert(source.to_string(), rules.clone());
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accessor(scope: &str, path: Option<&str>, negate: bool) -> Arg {
        Arg::Accessor(Accessor {
            scope: scope.to_string(),
            path: path.map(str::to_string),
            negate,
        })
    }

    #[test]
    fn test_clauses_and_words() {
        let rules = parse_rules("text: hello world; visible: ~shown").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].handler, "text");
        assert_eq!(
            rules[0].args,
            vec![Arg::Text("hello".into()), Arg::Text("world".into())]
        );
        assert_eq!(rules[1].handler, "visible");
        assert_eq!(rules[1].args, vec![accessor("model", Some("shown"), false)]);
    }

    #[test]
    fn test_accessor_forms() {
        let rules = parse_rules("text:~user:name !~user:active ~user: ~:x ~!user:active ~!flag").unwrap();
        assert_eq!(
            rules[0].args,
            vec![
                accessor("user", Some("name"), false),
                accessor("user", Some("active"), true),
                accessor("user", None, false),
                accessor("model", Some("x"), false),
                accessor("user", Some("active"), true),
                accessor("model", Some("flag"), true),
            ]
        );
    }

    #[test]
    fn test_negated_accessor_evaluates_to_opposite() {
        let rules = parse_rules("visible: ~!flags:on").unwrap();
        let mut object = graphbind_model::Attributes::new();
        object.insert("on".into(), Value::Bool(true));
        let scope = Scope::new().with("flags", Value::Object(object));
        let tracker = ReadTracker::new();
        assert_eq!(rules[0].args[0].evaluate(&scope, &tracker), Value::Bool(false));
    }

    #[test]
    fn test_quoted_and_expression_spans() {
        let rules = parse_rules("attr: title \"a; b\" 'c d'; text: `1 + 2`").unwrap();
        assert_eq!(
            rules[0].args,
            vec![
                Arg::Text("title".into()),
                Arg::Text("a; b".into()),
                Arg::Text("c d".into()),
            ]
        );
        assert!(matches!(&rules[1].args[0], Arg::Expr(_)));
    }

    #[test]
    fn test_open_spans_run_to_end() {
        let rules = parse_rules("text: \"unterminated text").unwrap();
        assert_eq!(rules[0].args, vec![Arg::Text("unterminated text".into())]);

        let rules = parse_rules("text: `1 + 1").unwrap();
        assert!(matches!(&rules[0].args[0], Arg::Expr(_)));

        let rules = parse_rules("text: ~user:name").unwrap();
        assert_eq!(rules[0].args, vec![accessor("user", Some("name"), false)]);
    }

    #[test]
    fn test_plain_text_is_flushed_before_a_span() {
        let rules = parse_rules("text: ab\"cd\"~x").unwrap();
        assert_eq!(
            rules[0].args,
            vec![
                Arg::Text("ab".into()),
                Arg::Text("cd".into()),
                accessor("model", Some("x"), false),
            ]
        );
    }

    #[test]
    fn test_empty_clauses_and_bare_handlers() {
        let rules = parse_rules(" ; log ;; text: x ;").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].handler, "log");
        assert!(rules[0].args.is_empty());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse_rules("text: x; : y"),
            Err(BindingError::MissingHandlerName { position: 9, .. })
        ));
        assert!(matches!(
            parse_rules("two words: y"),
            Err(BindingError::MissingHandlerName { .. })
        ));
        assert!(matches!(
            parse_rules("text: `1 +`"),
            Err(BindingError::Expression { .. })
        ));
    }

    #[test]
    fn test_cache_reuses_parses() {
        let cache = RuleCache::new();
        let a = cache.parse("text: ~name").unwrap();
        let b = cache.parse("text: ~name").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(cache.parse("  : nope").is_err());
        assert_eq!(cache.len(), 1);
    }
}
