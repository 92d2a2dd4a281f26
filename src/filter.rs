//! Filter adapter for listener registrations
//!
//! A [`FilterProp`] resolves a textual path to a field of the payload or of
//! its related event:
//!
//! ```text
//!   data.<field>            scalar field of the payload record
//!   data.<field>[key]       entry of a list field
//!   evt.name | evt.source   the related event
//!   evt.data.<field>[key]   the event's record
//! ```
//!
//! [`Predicate`] is a small evaluator over those properties, e.g.
//! `evt.name == "sip.call" and data.headers[From] != anonymous`.

use crate::{
    data::{DataRecord, Value},
    error::{PloadError, Result},
    payload::PayloadView,
};

/// Decides whether a registration sees a payload
pub trait PayloadFilter: Send + Sync {
    fn matches(&self, pload: &PayloadView<'_>) -> bool;
}

impl<F> PayloadFilter for F
where
    F: Fn(&PayloadView<'_>) -> bool + Send + Sync,
{
    fn matches(&self, pload: &PayloadView<'_>) -> bool {
        self(pload)
    }
}

/// A field of a record, with the key for list fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub field: String,
    pub key: Option<String>,
}

impl FieldRef {
    fn parse(text: &str, path: &str) -> Result<Self> {
        let (field, key) = match text.split_once('[') {
            None => (text, None),
            Some((field, rest)) => {
                let key = rest.strip_suffix(']').ok_or_else(|| {
                    PloadError::filter(format!("Missing ']' in property {}", path))
                })?;
                if key.is_empty() {
                    return Err(PloadError::filter(format!("Empty key in property {}", path)));
                }
                (field, Some(key.to_string()))
            }
        };

        if field.is_empty() {
            return Err(PloadError::filter(format!("Empty field name in property {}", path)));
        }
        Ok(Self {
            field: field.to_string(),
            key,
        })
    }

    fn lookup(&self, record: &DataRecord) -> Option<Value> {
        record.get(&self.field, self.key.as_deref()).cloned()
    }
}

/// A compiled property path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterProp {
    /// Field of the payload's own record
    Data(FieldRef),
    EventName,
    EventSource,
    /// Field of the related event's record
    EventData(FieldRef),
}

impl FilterProp {
    pub fn compile(path: &str) -> Result<Self> {
        if let Some(text) = path.strip_prefix("data.") {
            return Ok(Self::Data(FieldRef::parse(text, path)?));
        }

        if let Some(rest) = path.strip_prefix("evt.") {
            return match rest {
                "name" => Ok(Self::EventName),
                "source" => Ok(Self::EventSource),
                _ => match rest.strip_prefix("data.") {
                    Some(text) => Ok(Self::EventData(FieldRef::parse(text, path)?)),
                    None => Err(PloadError::filter(format!("Unknown event property {}", path))),
                },
            };
        }

        Err(PloadError::filter(format!("Unknown property namespace in {}", path)))
    }

    /// Current value of the property, `None` when it is not set
    pub fn get_value(&self, pload: &PayloadView<'_>) -> Option<Value> {
        match self {
            Self::Data(field) => field.lookup(pload.data()?),
            Self::EventName => Some(Value::from(pload.event().name())),
            Self::EventSource => Some(Value::from(pload.event().source())),
            Self::EventData(field) => field.lookup(pload.event().data()?),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
struct Comparison {
    prop: FilterProp,
    op: CmpOp,
    literal: String,
}

impl Comparison {
    fn eval(&self, pload: &PayloadView<'_>) -> bool {
        match self.prop.get_value(pload) {
            None => false,
            Some(value) => {
                let equal = value.matches_literal(&self.literal);
                match self.op {
                    CmpOp::Eq => equal,
                    CmpOp::Ne => !equal,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Eq,
    Ne,
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        match c {
            '=' | '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(PloadError::filter(format!("Bad operator in {}", expr)));
                }
                tokens.push(if c == '=' { Token::Eq } else { Token::Ne });
            }
            '"' | '\'' => {
                chars.next();
                let mut lit = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c => break,
                        Some(ch) => lit.push(ch),
                        None => {
                            return Err(PloadError::filter(format!(
                                "Unterminated string in {}",
                                expr
                            )))
                        }
                    }
                }
                tokens.push(Token::Quoted(lit));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == '=' || ch == '!' {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

/// Boolean filter over payload properties, `and` binding tighter than `or`
#[derive(Debug, Clone)]
pub struct Predicate {
    /// Alternatives joined by `or`, each a conjunction of comparisons
    any_of: Vec<Vec<Comparison>>,
}

impl Predicate {
    pub fn compile(expr: &str) -> Result<Self> {
        let tokens = tokenize(expr)?;
        if tokens.is_empty() {
            return Err(PloadError::filter("Empty filter expression"));
        }

        let mut any_of = vec![Vec::new()];
        let mut iter = tokens.into_iter();
        loop {
            let prop = match iter.next() {
                Some(Token::Word(path)) => FilterProp::compile(&path)?,
                other => {
                    return Err(PloadError::filter(format!(
                        "Expected a property in {}, got {:?}",
                        expr, other
                    )))
                }
            };
            let op = match iter.next() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Ne) => CmpOp::Ne,
                other => {
                    return Err(PloadError::filter(format!(
                        "Expected == or != in {}, got {:?}",
                        expr, other
                    )))
                }
            };
            let literal = match iter.next() {
                Some(Token::Word(lit)) | Some(Token::Quoted(lit)) => lit,
                other => {
                    return Err(PloadError::filter(format!(
                        "Expected a value in {}, got {:?}",
                        expr, other
                    )))
                }
            };

            if let Some(last) = any_of.last_mut() {
                last.push(Comparison { prop, op, literal });
            }

            match iter.next() {
                None => break,
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("and") => {}
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("or") => any_of.push(Vec::new()),
                other => {
                    return Err(PloadError::filter(format!(
                        "Expected and/or in {}, got {:?}",
                        expr, other
                    )))
                }
            }
        }

        Ok(Self { any_of })
    }
}

impl PayloadFilter for Predicate {
    fn matches(&self, pload: &PayloadView<'_>) -> bool {
        self.any_of
            .iter()
            .any(|all| all.iter().all(|cmp| cmp.eval(pload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_props() {
        assert_eq!(FilterProp::compile("evt.name").unwrap(), FilterProp::EventName);
        assert_eq!(
            FilterProp::compile("data.headers[From]").unwrap(),
            FilterProp::Data(FieldRef {
                field: "headers".into(),
                key: Some("From".into())
            })
        );
        assert_eq!(
            FilterProp::compile("evt.data.call_id").unwrap(),
            FilterProp::EventData(FieldRef {
                field: "call_id".into(),
                key: None
            })
        );
    }

    #[test]
    fn test_compile_errors() {
        assert!(FilterProp::compile("data.headers[From").is_err());
        assert!(FilterProp::compile("pkt.len").is_err());
        assert!(FilterProp::compile("evt.time").is_err());
        assert!(FilterProp::compile("data.").is_err());
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("evt.name=='a b' and x!=y").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("evt.name".into()),
                Token::Eq,
                Token::Quoted("a b".into()),
                Token::Word("and".into()),
                Token::Word("x".into()),
                Token::Ne,
                Token::Word("y".into()),
            ]
        );
    }

    #[test]
    fn test_predicate_syntax() {
        assert!(Predicate::compile("evt.name == sip or evt.source == udp and data.x != 1").is_ok());
        assert!(Predicate::compile("").is_err());
        assert!(Predicate::compile("evt.name sip").is_err());
        assert!(Predicate::compile("evt.name == \"sip").is_err());
        assert!(Predicate::compile("evt.name == sip xor evt.source == a").is_err());
        assert!(Predicate::compile("evt.name = sip").is_err());
    }
}
