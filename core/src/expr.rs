//! Expression compilation and evaluation
//!
//! The engine only needs "compile once, evaluate against a scope later".
//! [`Evaluator`] is that seam; [`TemplateEvaluator`] is the built-in
//! implementation used unless another one is registered.
//!
//! Template syntax: plain text with `${...}` segments, `$${` for a literal
//! `${`. A template made of a single segment yields that segment's typed
//! value, anything else yields a string.

use anyhow::{anyhow, bail, Result};
use std::fmt;
use std::sync::Arc;

use crate::scope::ScopeView;
use crate::values::Val;

/// Compiles expression source text
pub trait Evaluator: Send + Sync + fmt::Debug {
    fn compile(&self, source: &str) -> Result<Arc<dyn Expression>>;
}

/// A compiled expression, evaluated against a live scope
pub trait Expression: Send + Sync + fmt::Debug {
    fn source(&self) -> &str;

    fn evaluate(&self, scope: ScopeView<'_>) -> Result<Val>;

    /// String form of the value; null has none
    fn evaluate_string(&self, scope: ScopeView<'_>) -> Result<Option<String>> {
        match self.evaluate(scope)? {
            Val::Null => Ok(None),
            other => Ok(Some(other.to_string())),
        }
    }

    fn evaluate_bool(&self, scope: ScopeView<'_>) -> Result<bool> {
        Ok(self.evaluate(scope)?.is_truthy())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateEvaluator;

impl Evaluator for TemplateEvaluator {
    fn compile(&self, source: &str) -> Result<Arc<dyn Expression>> {
        let segments = split_template(source)?;
        Ok(Arc::new(Template {
            source: source.to_string(),
            segments,
        }))
    }
}

/* ===================== Template ===================== */

#[derive(Debug)]
enum Segment {
    Text(String),
    Expr(Ast),
}

#[derive(Debug)]
struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Expression for Template {
    fn source(&self) -> &str {
        &self.source
    }

    fn evaluate(&self, scope: ScopeView<'_>) -> Result<Val> {
        if let [Segment::Expr(ast)] = self.segments.as_slice() {
            return eval(ast, scope);
        }
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(ast) => match eval(ast, scope)? {
                    Val::Null => {}
                    value => out.push_str(&value.to_string()),
                },
            }
        }
        Ok(Val::Str(out))
    }
}

fn split_template(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = source;

    while let Some(pos) = rest.find("${") {
        if rest[..pos].ends_with('$') {
            text.push_str(&rest[..pos - 1]);
            text.push_str("${");
            rest = &rest[pos + 2..];
            continue;
        }
        text.push_str(&rest[..pos]);
        let body = &rest[pos + 2..];
        let end = closing_brace(body)
            .ok_or_else(|| anyhow!("Unterminated expression in '{}'", source))?;
        if !text.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut text)));
        }
        segments.push(Segment::Expr(parse_expr(&body[..end])?));
        rest = &body[end + 1..];
    }
    text.push_str(rest);
    if !text.is_empty() || segments.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

fn closing_brace(body: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '}') => return Some(i),
            _ => {}
        }
    }
    None
}

/* ===================== Syntax ===================== */

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Key(String),
    Index(usize),
}

#[derive(Debug)]
enum Ast {
    Lit(Val),
    Path(Vec<Step>),
    Not(Box<Ast>),
    Eq(Box<Ast>, Box<Ast>, bool),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Num(f64),
    Str(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Not,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|ch| *ch == c)
                    .ok_or_else(|| anyhow!("Unterminated string literal in '{}'", src))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse()
                    .map_err(|_| anyhow!("Invalid number '{}' in '{}'", text, src))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => bail!("Unexpected character '{}' in '{}'", other, src),
        }
    }
    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

fn parse_expr(src: &str) -> Result<Ast> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        bail!("Empty expression");
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let ast = parser.or()?;
    if parser.pos != parser.tokens.len() {
        bail!("Unexpected trailing input in '{}'", src);
    }
    Ok(ast)
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<Ast> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) {
            left = Ast::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Ast> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            left = Ast::And(Box::new(left), Box::new(self.equality()?));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Ast> {
        let left = self.unary()?;
        if self.eat(&Token::EqEq) {
            return Ok(Ast::Eq(Box::new(left), Box::new(self.unary()?), false));
        }
        if self.eat(&Token::NotEq) {
            return Ok(Ast::Eq(Box::new(left), Box::new(self.unary()?), true));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Ast> {
        if self.eat(&Token::Not) {
            return Ok(Ast::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Ast> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Ast::Lit(Val::Num(n))),
            Some(Token::Str(s)) => Ok(Ast::Lit(Val::Str(s))),
            Some(Token::LParen) => {
                let inner = self.or()?;
                if !self.eat(&Token::RParen) {
                    bail!("Expected ')'");
                }
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Ast::Lit(Val::Bool(true))),
                "false" => Ok(Ast::Lit(Val::Bool(false))),
                "null" => Ok(Ast::Lit(Val::Null)),
                _ => self.path(name),
            },
            other => bail!("Unexpected token {:?}", other),
        }
    }

    fn path(&mut self, head: String) -> Result<Ast> {
        let mut steps = vec![Step::Key(head)];
        loop {
            if self.eat(&Token::Dot) {
                match self.next() {
                    Some(Token::Ident(key)) => steps.push(Step::Key(key)),
                    Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => steps.push(Step::Index(n as usize)),
                    other => bail!("Expected property name after '.', found {:?}", other),
                }
            } else if self.eat(&Token::LBracket) {
                match self.next() {
                    Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => steps.push(Step::Index(n as usize)),
                    Some(Token::Str(key)) => steps.push(Step::Key(key)),
                    other => bail!("Expected index, found {:?}", other),
                }
                if !self.eat(&Token::RBracket) {
                    bail!("Expected ']'");
                }
            } else {
                return Ok(Ast::Path(steps));
            }
        }
    }
}

/* ===================== Evaluation ===================== */

fn eval(ast: &Ast, scope: ScopeView<'_>) -> Result<Val> {
    Ok(match ast {
        Ast::Lit(value) => value.clone(),
        Ast::Path(steps) => resolve(steps, scope),
        Ast::Not(inner) => Val::Bool(!eval(inner, scope)?.is_truthy()),
        Ast::Eq(left, right, negated) => {
            let equal = loose_eq(&eval(left, scope)?, &eval(right, scope)?);
            Val::Bool(equal != *negated)
        }
        Ast::And(left, right) => {
            Val::Bool(eval(left, scope)?.is_truthy() && eval(right, scope)?.is_truthy())
        }
        Ast::Or(left, right) => {
            Val::Bool(eval(left, scope)?.is_truthy() || eval(right, scope)?.is_truthy())
        }
    })
}

fn resolve(steps: &[Step], scope: ScopeView<'_>) -> Val {
    let Some((Step::Key(head), rest)) = steps.split_first() else {
        return Val::Null;
    };
    let Some(mut current) = scope.get(head) else {
        return Val::Null;
    };
    for step in rest {
        let next = match (step, current) {
            (Step::Key(key), Val::Tree(entries)) => entries.get(key),
            (Step::Index(i), Val::List(items)) => items.get(*i),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Val::Null,
        }
    }
    current.clone()
}

/// Numbers compare numerically against numeric strings
fn loose_eq(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Num(x), Val::Str(_)) => b.as_f64() == Some(*x),
        (Val::Str(_), Val::Num(y)) => a.as_f64() == Some(*y),
        (Val::Bool(x), Val::Str(s)) | (Val::Str(s), Val::Bool(x)) => s == &x.to_string(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scopes;
    use indexmap::IndexMap;

    fn eval_in(scopes: &Scopes, src: &str) -> Val {
        let expr = TemplateEvaluator.compile(src).unwrap();
        let scope = scopes.root();
        expr.evaluate(scopes.view(scope)).unwrap()
    }

    fn sample() -> Scopes {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        let mut tree = IndexMap::new();
        tree.insert("name".to_string(), Val::from("widget"));
        tree.insert("sizes".to_string(), Val::list(vec![Val::from(1), Val::from(2)]));
        scopes.add(root, "item", None, Val::tree(tree), true).unwrap();
        scopes.add(root, "flag", None, Val::from("false"), true).unwrap();
        scopes.add(root, "n", None, Val::from(2), true).unwrap();
        scopes
    }

    #[test]
    fn test_literal_text() {
        let scopes = sample();
        assert_eq!(eval_in(&scopes, "hello"), Val::from("hello"));
        assert_eq!(eval_in(&scopes, ""), Val::from(""));
        assert_eq!(eval_in(&scopes, "cost: $${x}"), Val::from("cost: ${x}"));
    }

    #[test]
    fn test_single_segment_keeps_type() {
        let scopes = sample();
        assert_eq!(eval_in(&scopes, "${2}"), Val::Num(2.0));
        assert_eq!(eval_in(&scopes, "${item.sizes}"), Val::list(vec![Val::from(1), Val::from(2)]));
        assert_eq!(eval_in(&scopes, "${item.sizes[1]}"), Val::from(2));
        assert_eq!(eval_in(&scopes, "${missing.path}"), Val::Null);
    }

    #[test]
    fn test_mixed_template_is_string() {
        let scopes = sample();
        assert_eq!(eval_in(&scopes, "name=${item.name}, n=${n}"), Val::from("name=widget, n=2"));
        assert_eq!(eval_in(&scopes, "[${nothing}]"), Val::from("[]"));
    }

    #[test]
    fn test_operators() {
        let scopes = sample();
        assert_eq!(eval_in(&scopes, "${!flag}"), Val::Bool(true));
        assert_eq!(eval_in(&scopes, "${n == 2}"), Val::Bool(true));
        assert_eq!(eval_in(&scopes, "${n == '2'}"), Val::Bool(true));
        assert_eq!(eval_in(&scopes, "${item.name != 'widget'}"), Val::Bool(false));
        assert_eq!(eval_in(&scopes, "${(n == 2) && !missing}"), Val::Bool(true));
        assert_eq!(eval_in(&scopes, "${missing || null}"), Val::Bool(false));
    }

    #[test]
    fn test_compile_errors() {
        assert!(TemplateEvaluator.compile("${unclosed").is_err());
        assert!(TemplateEvaluator.compile("${a ==}").is_err());
        assert!(TemplateEvaluator.compile("${}").is_err());
        assert!(TemplateEvaluator.compile("${a # b}").is_err());
    }

    #[test]
    fn test_evaluate_string() {
        let scopes = sample();
        let expr = TemplateEvaluator.compile("${missing}").unwrap();
        assert_eq!(expr.evaluate_string(scopes.view(scopes.root())).unwrap(), None);
        let expr = TemplateEvaluator.compile("id-${n}").unwrap();
        assert_eq!(
            expr.evaluate_string(scopes.view(scopes.root())).unwrap(),
            Some("id-2".to_string())
        );
    }
}
