//! Recursive-descent parser for rubric transform specifications.

use super::expr::{ArithOp, CompareOp, Expr, Predicate};
use super::{ExpressionError, TransformSpec};

/// Deepest allowed nesting of parentheses, negation, `not` and `reverse(`.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Arith(ArithOp),
    Compare(CompareOp),
    LParen,
    RParen,
    Eof,
}

/// Parses one specification string; the caller handles the no-op spellings.
pub(crate) struct TransformParser {
    tokens: Vec<(Token, usize)>,
    token_pos: usize,
    depth: usize,
}

impl TransformParser {
    pub(crate) fn new(input: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            tokens: tokenize(input)?,
            token_pos: 0,
            depth: 0,
        })
    }

    pub(crate) fn parse(mut self) -> Result<TransformSpec, ExpressionError> {
        let spec = if self.at_keyword("when") {
            self.advance();
            let when = self.parse_or()?;
            self.expect_keyword("then")?;
            let then = self.parse_expr()?;
            TransformSpec::Conditional { when, then }
        } else {
            TransformSpec::Unconditional(self.parse_expr()?)
        };

        match self.current() {
            Token::Eof => Ok(spec),
            other => Err(self.syntax(format!("unexpected trailing input {}", describe(other)))),
        }
    }

    fn current(&self) -> &Token {
        self.tokens
            .get(self.token_pos)
            .map(|(token, _)| token)
            .unwrap_or(&Token::Eof)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.token_pos)
            .or_else(|| self.tokens.last())
            .map(|(_, position)| *position)
            .unwrap_or(0)
    }

    fn advance(&mut self) {
        if self.token_pos < self.tokens.len() {
            self.token_pos += 1;
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.current(), Token::Ident(ident) if ident == keyword)
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ExpressionError> {
        if self.at_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.syntax(format!(
                "expected '{keyword}', found {}",
                describe(self.current())
            )))
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ExpressionError> {
        if matches!(self.current(), Token::RParen) {
            self.advance();
            Ok(())
        } else {
            Err(self.syntax(format!("expected ')', found {}", describe(self.current()))))
        }
    }

    /// Runs `parse` one nesting level deeper, refusing input nested past `MAX_NESTING`.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<T, ExpressionError> {
        if self.depth >= MAX_NESTING {
            return Err(self.syntax("expression nested too deeply".to_string()));
        }

        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn syntax(&self, message: String) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.position(),
            message,
        }
    }

    fn parse_or(&mut self) -> Result<Predicate, ExpressionError> {
        let mut left = self.parse_and()?;

        while self.at_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate, ExpressionError> {
        let mut left = self.parse_comparison()?;

        while self.at_keyword("and") {
            self.advance();
            let right = self.parse_comparison()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Predicate, ExpressionError> {
        if self.at_keyword("not") {
            self.advance();
            let inner = self.nested(Self::parse_comparison)?;
            return Ok(Predicate::Not(Box::new(inner)));
        }

        // `(` may open a grouped predicate or an arithmetic operand such as `(value + 1) > 3`.
        if matches!(self.current(), Token::LParen) {
            let checkpoint = self.token_pos;
            self.advance();
            if let Ok(grouped) = self.nested(Self::parse_or) {
                if self.expect_rparen().is_ok()
                    && !matches!(self.current(), Token::Arith(_) | Token::Compare(_))
                {
                    return Ok(grouped);
                }
            }
            self.token_pos = checkpoint;
        }

        let lhs = self.parse_expr()?;
        let op = match self.current() {
            Token::Compare(op) => *op,
            other => {
                return Err(self.syntax(format!(
                    "expected comparison operator, found {}",
                    describe(other)
                )))
            }
        };
        self.advance();
        let rhs = self.parse_expr()?;

        Ok(Predicate::Compare { lhs, op, rhs })
    }

    fn parse_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_term()?;

        while let Token::Arith(op @ (ArithOp::Add | ArithOp::Sub)) = self.current() {
            let op = *op;
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;

        while let Token::Arith(op @ (ArithOp::Mul | ArithOp::Div)) = self.current() {
            let op = *op;
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if matches!(self.current(), Token::Arith(ArithOp::Sub)) {
            self.advance();
            let inner = self.nested(Self::parse_unary)?;
            return Ok(Expr::Negate(Box::new(inner)));
        }

        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();
        match self.current().clone() {
            Token::Number(number) => {
                self.advance();
                Ok(Expr::Number(number))
            }
            Token::LParen => {
                self.advance();
                let inner = self.nested(Self::parse_expr)?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Ident(ident) => match ident.as_str() {
                "value" | "x" => {
                    self.advance();
                    Ok(Expr::Value)
                }
                "reverse" => {
                    self.advance();
                    if !matches!(self.current(), Token::LParen) {
                        return Err(self.syntax("expected '(' after 'reverse'".to_string()));
                    }
                    self.advance();
                    let inner = self.nested(Self::parse_expr)?;
                    self.expect_rparen()?;
                    Ok(Expr::Reverse(Box::new(inner)))
                }
                _ => Err(ExpressionError::UnknownIdentifier {
                    name: ident,
                    position,
                }),
            },
            other => Err(self.syntax(format!("expected operand, found {}", describe(&other)))),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(number) => format!("number {number}"),
        Token::Ident(ident) => format!("'{ident}'"),
        Token::Arith(op) => format!("operator {op:?}"),
        Token::Compare(op) => format!("comparison {op:?}"),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::Eof => "end of input".to_string(),
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let token = match c {
            '(' => {
                pos += 1;
                Token::LParen
            }
            ')' => {
                pos += 1;
                Token::RParen
            }
            '+' => {
                pos += 1;
                Token::Arith(ArithOp::Add)
            }
            '-' => {
                pos += 1;
                Token::Arith(ArithOp::Sub)
            }
            '*' => {
                pos += 1;
                Token::Arith(ArithOp::Mul)
            }
            '/' => {
                pos += 1;
                Token::Arith(ArithOp::Div)
            }
            '<' | '>' | '=' | '!' => {
                pos += 1;
                let mut op = c.to_string();
                if chars.get(pos) == Some(&'=') {
                    op.push('=');
                    pos += 1;
                }
                let op = CompareOp::parse(&op).ok_or(ExpressionError::UnexpectedCharacter {
                    found: c,
                    position: start,
                })?;
                Token::Compare(op)
            }
            c if c.is_ascii_digit() || c == '.' => {
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    pos += 1;
                }
                let text: String = chars[start..pos].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber {
                        text: text.clone(),
                        position: start,
                    })?;
                Token::Number(number)
            }
            c if c.is_alphabetic() || c == '_' => {
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                let ident: String = chars[start..pos].iter().collect();
                Token::Ident(ident.to_ascii_lowercase())
            }
            other => {
                return Err(ExpressionError::UnexpectedCharacter {
                    found: other,
                    position: start,
                })
            }
        };

        tokens.push((token, start));
    }

    tokens.push((Token::Eof, chars.len()));
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<TransformSpec, ExpressionError> {
        TransformParser::new(input)?.parse()
    }

    #[test]
    fn parses_unconditional_rescaling() {
        let spec = parse("(value - 1) / 3 * 100").expect("parses");
        match spec {
            TransformSpec::Unconditional(expr) => {
                assert_eq!(expr.eval(4.0, None), 100.0);
                assert_eq!(expr.eval(1.0, None), 0.0);
            }
            other => panic!("expected unconditional, got {other:?}"),
        }
    }

    #[test]
    fn respects_operator_precedence() {
        let spec = parse("1 + 2 * x - -3").expect("parses");
        match spec {
            TransformSpec::Unconditional(expr) => assert_eq!(expr.eval(2.0, None), 8.0),
            other => panic!("expected unconditional, got {other:?}"),
        }
    }

    #[test]
    fn parses_conditional_with_reverse() {
        let spec = parse("WHEN value > 3 THEN reverse(value)").expect("parses");
        match spec {
            TransformSpec::Conditional { when, then } => {
                assert!(matches!(
                    when,
                    Predicate::Compare {
                        op: CompareOp::Greater,
                        ..
                    }
                ));
                assert!(then.uses_reverse());
            }
            other => panic!("expected conditional, got {other:?}"),
        }
    }

    #[test]
    fn parenthesised_operand_is_not_mistaken_for_grouped_predicate() {
        let spec = parse("when (value + 1) >= 4 and not (value == 5) then 0").expect("parses");
        match spec {
            TransformSpec::Conditional { when, .. } => {
                assert!(when.eval(3.0, None));
                assert!(!when.eval(5.0, None));
                assert!(!when.eval(2.0, None));
            }
            other => panic!("expected conditional, got {other:?}"),
        }
    }

    #[test]
    fn grouped_predicates_combine_with_or() {
        let spec = parse("when (x < 1 or x > 4) and x != 9 then 0").expect("parses");
        match spec {
            TransformSpec::Conditional { when, .. } => {
                assert!(when.eval(0.0, None));
                assert!(when.eval(5.0, None));
                assert!(!when.eval(9.0, None));
                assert!(!when.eval(2.0, None));
            }
            other => panic!("expected conditional, got {other:?}"),
        }
    }

    #[test]
    fn rejects_arbitrary_function_calls() {
        match parse("log(value)") {
            Err(ExpressionError::UnknownIdentifier { name, position }) => {
                assert_eq!(name, "log");
                assert_eq!(position, 0);
            }
            other => panic!("expected unknown identifier, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_then_clause() {
        assert!(matches!(
            parse("when value > 3 reverse(value)"),
            Err(ExpressionError::Syntax { .. })
        ));
    }

    #[test]
    fn rejects_unexpected_characters() {
        assert!(matches!(
            parse("value; drop"),
            Err(ExpressionError::UnexpectedCharacter {
                found: ';',
                position: 5
            })
        ));
        assert!(matches!(
            parse("value = 3"),
            Err(ExpressionError::UnexpectedCharacter { found: '=', .. })
        ));
    }

    #[test]
    fn rejects_deeply_nested_input_without_overflowing() {
        let deep = format!("{}value{}", "(".repeat(2000), ")".repeat(2000));
        match parse(&deep) {
            Err(ExpressionError::Syntax { message, .. }) => {
                assert_eq!(message, "expression nested too deeply")
            }
            other => panic!("expected nesting error, got {other:?}"),
        }

        let negations = format!("{}value", "-".repeat(5000));
        assert!(matches!(parse(&negations), Err(ExpressionError::Syntax { .. })));

        let guard = format!("when {}value > 1 then 0", "not ".repeat(5000));
        assert!(matches!(parse(&guard), Err(ExpressionError::Syntax { .. })));

        let grouped = format!("when {}value > 1{} then 0", "(".repeat(300), ")".repeat(300));
        assert!(matches!(parse(&grouped), Err(ExpressionError::Syntax { .. })));
    }

    #[test]
    fn accepts_nesting_within_the_limit() {
        let shallow = format!("{}value{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        match parse(&shallow).expect("parses") {
            TransformSpec::Unconditional(expr) => assert_eq!(expr.eval(3.0, None), 3.0),
            other => panic!("expected unconditional, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_numbers_and_trailing_input() {
        assert!(matches!(
            parse("value * 1.2.3"),
            Err(ExpressionError::InvalidNumber { .. })
        ));
        assert!(matches!(
            parse("value 3"),
            Err(ExpressionError::Syntax { .. })
        ));
    }
}
