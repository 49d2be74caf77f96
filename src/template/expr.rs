//! Restricted expression evaluator for `{{ }}` template tokens.
//!
//! The grammar is deliberately closed: property/index access, string and
//! number literals, comparisons, and arithmetic over the four context
//! roots (`$previousInput`, `$input`, `$vars`, `$env`). Workflow-authored
//! text never reaches a general-purpose scripting runtime.

use serde_json::{Number, Value};

use crate::error::NodeError;

/// Evaluate `source` against `lookup`, which resolves root identifiers.
pub fn evaluate(
    source: &str,
    lookup: &dyn Fn(&str) -> Option<Value>,
) -> Result<Value, NodeError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        lookup,
    };
    let value = parser.comparison()?;
    if parser.pos != parser.tokens.len() {
        return Err(NodeError::ExpressionError(format!(
            "Unexpected token at end of expression: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(value)
}

/// The string form of an evaluated result, as substituted into templates.
/// Strings render bare; everything else renders as its JSON text.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compare two already-resolved operands the way IfCondition nodes do:
/// numerically when both operands parse as numbers, lexicographically
/// otherwise. Returns `None` for an unsupported operator.
pub fn compare_operands(left: &str, operator: &str, right: &str) -> Option<bool> {
    if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
        return match operator {
            "==" => Some(l == r),
            "!=" => Some(l != r),
            ">" => Some(l > r),
            ">=" => Some(l >= r),
            "<" => Some(l < r),
            "<=" => Some(l <= r),
            _ => None,
        };
    }
    match operator {
        "==" => Some(left == right),
        "!=" => Some(left != right),
        ">" => Some(left > right),
        ">=" => Some(left >= right),
        "<" => Some(left < right),
        "<=" => Some(left <= right),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

fn tokenize(source: &str) -> Result<Vec<Token>, NodeError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
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
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '=' | '!' | '>' | '<' => {
                let has_eq = chars.get(i + 1) == Some(&'=');
                let token = match (c, has_eq) {
                    ('=', true) => Token::Eq,
                    ('!', true) => Token::Ne,
                    ('>', true) => Token::Ge,
                    ('<', true) => Token::Le,
                    ('>', false) => Token::Gt,
                    ('<', false) => Token::Lt,
                    _ => {
                        return Err(NodeError::ExpressionError(format!(
                            "Unexpected character: {c}"
                        )))
                    }
                };
                // "===" / "!==" are tolerated as their loose counterparts.
                i += if has_eq { 2 } else { 1 };
                if matches!(token, Token::Eq | Token::Ne) && chars.get(i) == Some(&'=') {
                    i += 1;
                }
                tokens.push(token);
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                s.push(escaped);
                                i += 2;
                            } else {
                                return Err(NodeError::ExpressionError(
                                    "Unterminated string literal".to_string(),
                                ));
                            }
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(NodeError::ExpressionError(
                                "Unterminated string literal".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| {
                    NodeError::ExpressionError(format!("Invalid number: {text}"))
                })?;
                tokens.push(Token::Number(n));
            }
            c if c == '$' || c == '_' || c.is_alphabetic() => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i] == '_' || chars[i].is_alphanumeric()) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(NodeError::ExpressionError(format!(
                    "Unexpected character: {other}"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    lookup: &'a dyn Fn(&str) -> Option<Value>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn comparison(&mut self) -> Result<Value, NodeError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => "==",
            Some(Token::Ne) => "!=",
            Some(Token::Gt) => ">",
            Some(Token::Ge) => ">=",
            Some(Token::Lt) => "<",
            Some(Token::Le) => "<=",
            _ => return Ok(left),
        };
        self.bump();
        let right = self.additive()?;
        let result = compare_values(&left, op, &right);
        Ok(Value::Bool(result))
    }

    fn additive(&mut self) -> Result<Value, NodeError> {
        let mut value = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => '+',
                Some(Token::Minus) => '-',
                _ => return Ok(value),
            };
            self.bump();
            let rhs = self.term()?;
            value = if op == '+' {
                add_values(&value, &rhs)?
            } else {
                number_op(&value, &rhs, '-')?
            };
        }
    }

    fn term(&mut self) -> Result<Value, NodeError> {
        let mut value = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => '*',
                Some(Token::Slash) => '/',
                _ => return Ok(value),
            };
            self.bump();
            let rhs = self.factor()?;
            value = number_op(&value, &rhs, op)?;
        }
    }

    fn factor(&mut self) -> Result<Value, NodeError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.bump();
            let value = self.factor()?;
            let n = as_number(&value).ok_or_else(|| {
                NodeError::ExpressionError("Cannot negate a non-number".to_string())
            })?;
            return Ok(number_value(-n));
        }
        let mut value = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    let key = match self.bump() {
                        Some(Token::Ident(name)) => name,
                        other => {
                            return Err(NodeError::ExpressionError(format!(
                                "Expected property name after '.', got {other:?}"
                            )))
                        }
                    };
                    value = access(&value, &key)?;
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let index = self.comparison()?;
                    match self.bump() {
                        Some(Token::RBracket) => {}
                        other => {
                            return Err(NodeError::ExpressionError(format!(
                                "Expected ']', got {other:?}"
                            )))
                        }
                    }
                    value = index_access(&value, &index)?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn primary(&mut self) -> Result<Value, NodeError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(number_value(n)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::True) => Ok(Value::Bool(true)),
            Some(Token::False) => Ok(Value::Bool(false)),
            Some(Token::Null) => Ok(Value::Null),
            Some(Token::LParen) => {
                let value = self.comparison()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    other => Err(NodeError::ExpressionError(format!(
                        "Expected ')', got {other:?}"
                    ))),
                }
            }
            Some(Token::Ident(name)) => (self.lookup)(&name).ok_or_else(|| {
                NodeError::ExpressionError(format!("{name} is not defined"))
            }),
            other => Err(NodeError::ExpressionError(format!(
                "Unexpected token: {other:?}"
            ))),
        }
    }
}

fn access(value: &Value, key: &str) -> Result<Value, NodeError> {
    match value {
        Value::Object(map) => map.get(key).cloned().ok_or_else(|| {
            NodeError::ExpressionError(format!("Property not found: {key}"))
        }),
        other => Err(NodeError::ExpressionError(format!(
            "Cannot read property '{key}' of {}",
            type_name(other)
        ))),
    }
}

fn index_access(value: &Value, index: &Value) -> Result<Value, NodeError> {
    match (value, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n.as_u64().ok_or_else(|| {
                NodeError::ExpressionError(format!("Invalid array index: {n}"))
            })? as usize;
            items.get(i).cloned().ok_or_else(|| {
                NodeError::ExpressionError(format!("Index out of bounds: {i}"))
            })
        }
        (Value::Object(_), Value::String(key)) => access(value, key),
        (other, _) => Err(NodeError::ExpressionError(format!(
            "Cannot index into {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn add_values(left: &Value, right: &Value) -> Result<Value, NodeError> {
    if left.is_string() || right.is_string() {
        return Ok(Value::String(format!(
            "{}{}",
            to_display_string(left),
            to_display_string(right)
        )));
    }
    number_op(left, right, '+')
}

fn number_op(left: &Value, right: &Value, op: char) -> Result<Value, NodeError> {
    let (l, r) = match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => (l, r),
        _ => {
            return Err(NodeError::ExpressionError(format!(
                "Cannot apply '{op}' to {} and {}",
                type_name(left),
                type_name(right)
            )))
        }
    };
    Ok(number_value(match op {
        '+' => l + r,
        '-' => l - r,
        '*' => l * r,
        '/' => l / r,
        _ => unreachable!(),
    }))
}

fn compare_values(left: &Value, op: &str, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return match op {
            "==" => l == r,
            "!=" => l != r,
            ">" => l > r,
            ">=" => l >= r,
            "<" => l < r,
            "<=" => l <= r,
            _ => false,
        };
    }
    let l = to_display_string(left);
    let r = to_display_string(right);
    match op {
        "==" => l == r,
        "!=" => l != r,
        ">" => l > r,
        ">=" => l >= r,
        "<" => l < r,
        "<=" => l <= r,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> impl Fn(&str) -> Option<Value> {
        move |name| match name {
            "$input" => Some(value.clone()),
            "$env" => Some(json!({"base": "http://h", "port": "8080"})),
            _ => None,
        }
    }

    #[test]
    fn test_property_access() {
        let lookup = ctx(json!({"user": {"name": "Alice"}}));
        assert_eq!(
            evaluate("$input.user.name", &lookup).unwrap(),
            json!("Alice")
        );
    }

    #[test]
    fn test_index_access() {
        let lookup = ctx(json!({"items": [10, 20, 30]}));
        assert_eq!(evaluate("$input.items[1]", &lookup).unwrap(), json!(20));
        assert_eq!(
            evaluate("$input['items'][2]", &lookup).unwrap(),
            json!(30)
        );
    }

    #[test]
    fn test_missing_property_is_error() {
        let lookup = ctx(json!({}));
        let err = evaluate("$env.missing", &lookup).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_undefined_root_is_error() {
        let lookup = ctx(json!(null));
        assert!(evaluate("$vars.x", &lookup).is_err());
    }

    #[test]
    fn test_arithmetic() {
        let lookup = ctx(json!(null));
        assert_eq!(evaluate("1 + 2 * 3", &lookup).unwrap(), json!(7));
        assert_eq!(evaluate("(1 + 2) * 3", &lookup).unwrap(), json!(9));
        assert_eq!(evaluate("-4 + 1", &lookup).unwrap(), json!(-3));
        assert_eq!(evaluate("10 / 4", &lookup).unwrap(), json!(2.5));
    }

    #[test]
    fn test_string_concatenation() {
        let lookup = ctx(json!(null));
        assert_eq!(
            evaluate("$env.base + '/users'", &lookup).unwrap(),
            json!("http://h/users")
        );
    }

    #[test]
    fn test_comparisons() {
        let lookup = ctx(json!({"count": 5}));
        assert_eq!(evaluate("$input.count > 3", &lookup).unwrap(), json!(true));
        assert_eq!(
            evaluate("$input.count == '5'", &lookup).unwrap(),
            json!(true)
        );
        assert_eq!(
            evaluate("'abc' != 'abd'", &lookup).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_strict_equality_tolerated() {
        let lookup = ctx(json!(null));
        assert_eq!(evaluate("1 === 1", &lookup).unwrap(), json!(true));
        assert_eq!(evaluate("1 !== 2", &lookup).unwrap(), json!(true));
    }

    #[test]
    fn test_string_numeric_coercion_in_compare() {
        let lookup = ctx(json!(null));
        assert_eq!(evaluate("'42' > '10'", &lookup).unwrap(), json!(true));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let lookup = ctx(json!(null));
        assert!(evaluate("1 1", &lookup).is_err());
    }

    #[test]
    fn test_no_function_calls_or_statements() {
        let lookup = ctx(json!(null));
        assert!(evaluate("process", &lookup).is_err());
        assert!(evaluate("require('fs')", &lookup).is_err());
        assert!(evaluate("a; b", &lookup).is_err());
    }

    #[test]
    fn test_compare_operands_numeric_and_string() {
        assert_eq!(compare_operands("5", ">", "3"), Some(true));
        assert_eq!(compare_operands("5", "<=", "3"), Some(false));
        assert_eq!(compare_operands("abc", "==", "abc"), Some(true));
        assert_eq!(compare_operands("a", "~=", "b"), None);
    }

    #[test]
    fn test_to_display_string() {
        assert_eq!(to_display_string(&json!("x")), "x");
        assert_eq!(to_display_string(&json!(3)), "3");
        assert_eq!(to_display_string(&json!({"a": 1})), "{\"a\":1}");
    }
}
