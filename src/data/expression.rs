use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::covariate::Covariates;

/// Error type for amount expressions and unit tokens
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ExpressionError {
    #[error("Malformed expression '{text}': {reason}")]
    Parse { text: String, reason: String },
    #[error("Unknown covariate '{name}' in dose amount expression")]
    UnknownCovariate { name: String },
    #[error("Unrecognized unit '{token}'")]
    UnknownUnit { token: String },
}

/// An arithmetic dose-amount expression evaluated against subject covariates.
///
/// Dose descriptors carry amounts such as `60*$(weight)/1000`, where
/// `$(name)` refers to a named covariate of the sample. The expression is
/// parsed once at load time and evaluated when the dose list is interpreted
/// for a concrete subject.
///
/// Supported syntax: numeric literals, `+ - * /`, unary minus, parentheses,
/// and `$(covariate)` references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountExpr {
    text: String,
    node: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Number(f64),
    Covariate(String),
    Neg(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
}

impl AmountExpr {
    /// Parse an expression from its textual form.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let mut parser = Parser {
            chars: text.chars().collect(),
            pos: 0,
            text,
        };
        let node = parser.expression()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(AmountExpr {
            text: text.to_string(),
            node,
        })
    }

    /// Convenience constructor for a constant amount.
    pub fn constant(value: f64) -> Self {
        AmountExpr {
            text: format!("{}", value),
            node: Node::Number(value),
        }
    }

    /// Evaluate against the sample's covariates.
    pub fn evaluate(&self, covariates: &Covariates) -> Result<f64, ExpressionError> {
        eval(&self.node, covariates)
    }

    /// The original textual form of the expression
    pub fn text(&self) -> &str {
        &self.text
    }
}

fn eval(node: &Node, covariates: &Covariates) -> Result<f64, ExpressionError> {
    let value = match node {
        Node::Number(v) => *v,
        Node::Covariate(name) => {
            covariates
                .get(name)
                .ok_or_else(|| ExpressionError::UnknownCovariate { name: name.clone() })?
        }
        Node::Neg(inner) => -eval(inner, covariates)?,
        Node::Add(a, b) => eval(a, covariates)? + eval(b, covariates)?,
        Node::Sub(a, b) => eval(a, covariates)? - eval(b, covariates)?,
        Node::Mul(a, b) => eval(a, covariates)? * eval(b, covariates)?,
        Node::Div(a, b) => eval(a, covariates)? / eval(b, covariates)?,
    };
    Ok(value)
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    text: &'a str,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> ExpressionError {
        ExpressionError::Parse {
            text: self.text.to_string(),
            reason: format!("{} at position {}", reason, self.pos),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn consume(&mut self, expected: char) -> Result<(), ExpressionError> {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected)))
        }
    }

    fn expression(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.term()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    node = Node::Add(Box::new(node), Box::new(self.term()?));
                }
                Some('-') => {
                    self.pos += 1;
                    node = Node::Sub(Box::new(node), Box::new(self.term()?));
                }
                _ => return Ok(node),
            }
        }
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.factor()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    node = Node::Mul(Box::new(node), Box::new(self.factor()?));
                }
                Some('/') => {
                    self.pos += 1;
                    node = Node::Div(Box::new(node), Box::new(self.factor()?));
                }
                _ => return Ok(node),
            }
        }
    }

    fn factor(&mut self) -> Result<Node, ExpressionError> {
        self.skip_whitespace();
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.factor()?)))
            }
            Some('(') => {
                self.pos += 1;
                let node = self.expression()?;
                self.consume(')')?;
                Ok(node)
            }
            Some('$') => {
                self.pos += 1;
                self.consume('(')?;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != ')') {
                    self.pos += 1;
                }
                let name: String = self.chars[start..self.pos].iter().collect();
                self.consume(')')?;
                if name.trim().is_empty() {
                    return Err(self.error("empty covariate reference"));
                }
                Ok(Node::Covariate(name.trim().to_string()))
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E')
                {
                    // Allow a sign directly after an exponent marker
                    self.pos += 1;
                    if matches!(self.chars.get(self.pos - 1), Some('e') | Some('E'))
                        && matches!(self.peek(), Some('+') | Some('-'))
                    {
                        self.pos += 1;
                    }
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map(Node::Number)
                    .map_err(|_| self.error("invalid numeric literal"))
            }
            _ => Err(self.error("expected a value")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn covs(weight: f64) -> Covariates {
        let mut c = Covariates::new();
        c.insert("weight", weight);
        c
    }

    #[test]
    fn test_constant() {
        let expr = AmountExpr::parse("100").unwrap();
        assert_relative_eq!(expr.evaluate(&Covariates::new()).unwrap(), 100.0);
    }

    #[test]
    fn test_weight_scaled_dose() {
        let expr = AmountExpr::parse("60*$(weight)/1000").unwrap();
        assert_relative_eq!(expr.evaluate(&covs(70.0)).unwrap(), 4.2);
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let expr = AmountExpr::parse("2+3*4").unwrap();
        assert_relative_eq!(expr.evaluate(&Covariates::new()).unwrap(), 14.0);
        let expr = AmountExpr::parse("(2+3)*4").unwrap();
        assert_relative_eq!(expr.evaluate(&Covariates::new()).unwrap(), 20.0);
    }

    #[test]
    fn test_unary_minus_and_scientific() {
        let expr = AmountExpr::parse("-1.5e2+50").unwrap();
        assert_relative_eq!(expr.evaluate(&Covariates::new()).unwrap(), -100.0);
    }

    #[test]
    fn test_unknown_covariate_is_an_error() {
        let expr = AmountExpr::parse("$(height)*2").unwrap();
        assert!(matches!(
            expr.evaluate(&covs(70.0)),
            Err(ExpressionError::UnknownCovariate { .. })
        ));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(AmountExpr::parse("2**3").is_err());
        assert!(AmountExpr::parse("$(weight").is_err());
        assert!(AmountExpr::parse("1 2").is_err());
    }
}
