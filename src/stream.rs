//! Character-level scanning of script source.

use crate::error::{CompileError, Location, Result};

/// A keyword-position token: either a name or an integer literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    Name(String),
    Number(i32),
}

pub struct Stream {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
}

fn is_keyword_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '@'
}

fn is_expression_char(c: char, logic: bool) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '_' | ' ' | '\t' | '+' | '-' | '*' | '/' | '(' | ')')
        || (logic && matches!(c, '&' | '|' | '<' | '>' | '=' | '!'))
}

impl Stream {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }

    pub fn end(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn snippet(&self) -> String {
        self.chars[self.index..].iter().take(10).collect()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    pub fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn error(&self, message: String) -> CompileError {
        CompileError::syntax(message, self.location())
    }

    /// Reads `[A-Za-z0-9_@]+`. Purely numeric words are numbers and are only
    /// accepted when `allow_number` is set.
    pub fn next_keyword(&mut self, allow_number: bool) -> Result<Word> {
        self.skip_whitespace();
        let at = self.location();
        let mut word = String::new();
        while let Some(c) = self.peek().filter(|c| is_keyword_char(*c)) {
            word.push(c);
            self.advance();
        }
        if word.is_empty() {
            return Err(self.error(format!("Expected keyword, found: {:?}", self.snippet())));
        }
        match word.parse::<i32>() {
            Ok(value) if allow_number => Ok(Word::Number(value)),
            Ok(_) => Err(CompileError::syntax(
                format!("Variable name can not be only numbers: {}", word),
                at,
            )),
            Err(_) => Ok(Word::Name(word)),
        }
    }

    /// Reads a name, rejecting numbers.
    pub fn next_name(&mut self) -> Result<String> {
        match self.next_keyword(false)? {
            Word::Name(name) => Ok(name),
            Word::Number(value) => Err(self.error(format!("Expected name, found {}", value))),
        }
    }

    /// Reads a raw expression up to the end of the statement. Comparison and
    /// logical operator characters are only accepted when `logic` is set.
    pub fn next_expression(&mut self, logic: bool) -> Result<(String, Location)> {
        self.skip_whitespace();
        let at = self.location();
        let mut expr = String::new();
        while let Some(c) = self.peek().filter(|c| is_expression_char(*c, logic)) {
            expr.push(c);
            self.advance();
        }
        let expr = expr.trim_end().to_string();
        if expr.is_empty() {
            return Err(self.error(format!("Expected expression, found: {:?}", self.snippet())));
        }
        Ok((expr, at))
    }

    /// Consumes `c` if it is the next non-whitespace character.
    pub fn eat_char(&mut self, c: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect_char(&mut self, c: char) -> Result<()> {
        if self.eat_char(c) {
            Ok(())
        } else {
            Err(self.error(format!(
                "Expected character {}, found: {:?}",
                c,
                self.snippet()
            )))
        }
    }

    /// Consumes the next non-whitespace character if it is one of `chars`.
    pub fn eat_set(&mut self, chars: &str) -> Option<char> {
        self.skip_whitespace();
        let c = self.peek().filter(|c| chars.contains(*c))?;
        self.advance();
        Some(c)
    }

    pub fn expect_set(&mut self, chars: &str) -> Result<char> {
        self.eat_set(chars).ok_or_else(|| {
            let set: Vec<String> = chars.chars().map(String::from).collect();
            self.error(format!(
                "Expected one of set {} found {:?}",
                set.join(","),
                self.snippet()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_and_numbers() {
        let mut stream = Stream::new("  chain @ 42 x_1");
        assert_eq!(stream.next_name().unwrap(), "chain");
        assert_eq!(stream.next_name().unwrap(), "@");
        assert_eq!(stream.next_keyword(true).unwrap(), Word::Number(42));
        assert_eq!(stream.next_keyword(false).unwrap(), Word::Name("x_1".into()));
        assert!(stream.end());
    }

    #[test]
    fn test_numeric_name_is_rejected_with_position() {
        let mut stream = Stream::new("\n  123 = 4");
        let err = stream.next_keyword(false).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("only numbers"), "{}", message);
        assert!(message.contains("(line 2 char 3)"), "{}", message);
    }

    #[test]
    fn test_expression_stops_at_statement_end() {
        let mut stream = Stream::new("a + (b * 2) ;next");
        let (expr, at) = stream.next_expression(false).unwrap();
        assert_eq!(expr, "a + (b * 2)");
        assert_eq!(at, Location::new(1, 1));
        assert!(stream.eat_char(';'));

        let mut stream = Stream::new("x + 1\ny = 2");
        assert_eq!(stream.next_expression(false).unwrap().0, "x + 1");
    }

    #[test]
    fn test_logic_characters_need_logic_mode() {
        let mut stream = Stream::new("a < b {");
        assert_eq!(stream.next_expression(false).unwrap().0, "a");

        let mut stream = Stream::new("(a < b && !c) {");
        assert_eq!(stream.next_expression(true).unwrap().0, "(a < b && !c)");
        assert!(stream.eat_char('{'));
    }

    #[test]
    fn test_sets_and_expectations() {
        let mut stream = Stream::new(" += 3");
        assert_eq!(stream.eat_set("+-*/"), Some('+'));
        assert_eq!(stream.eat_set("+-*/"), None);
        assert!(stream.expect_char('=').is_ok());
        let err = stream.expect_set("*/").unwrap_err();
        assert!(err.to_string().contains("Expected one of set *,/"));
    }

    #[test]
    fn test_missing_keyword_reports_error() {
        let mut stream = Stream::new("   {");
        assert!(stream.next_keyword(false).is_err());
    }
}
