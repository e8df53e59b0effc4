//! 专家查询语言的词法分析器

use std::borrow::Cow;

use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    /// 输入字符串中的当前位置（字节索引）
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    /// 返回当前位置的字符，不推进位置
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// 返回下一个位置的字符，不推进位置
    fn peek_next(&self) -> Option<char> {
        self.input[self.position..].chars().nth(1)
    }

    /// 推进位置一个字符并返回该字符
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    /// 跳过空白字符
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn token(&self, kind: TokenKind<'a>, start: usize) -> Token<'a> {
        Token {
            kind,
            span: Span::new(start, self.position),
        }
    }

    /// 读取数字字面量, 支持小数部分 (例如 `3.5`)
    /// 符号由语法分析器处理
    fn read_number(&mut self, start: usize) -> Token<'a> {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && matches!(self.peek_next(), Some(c) if c.is_ascii_digit()) {
            self.bump(); // 消费 '.'
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        let raw = &self.input[start..self.position];
        self.token(TokenKind::Number(raw), start)
    }

    /// 读取引号包围的字符串字面量, 支持 `\"`、`\'` 和 `\\` 转义
    /// 注意：开始的引号已经被调用者消费
    fn read_string(&mut self, start: usize, quote: char) -> Token<'a> {
        let content_start = self.position;
        let mut unescaped: Option<String> = None;

        loop {
            let Some(c) = self.bump() else {
                return self.token(TokenKind::UnterminatedString, start);
            };
            if c == quote {
                break;
            }
            if c == '\\' {
                let Some(escaped) = self.bump() else {
                    return self.token(TokenKind::UnterminatedString, start);
                };
                // 第一次遇到转义时才分配
                let buffer = unescaped.get_or_insert_with(|| {
                    self.input[content_start..self.position - 1 - escaped.len_utf8()].to_string()
                });
                buffer.push(escaped);
                continue;
            }
            if let Some(buffer) = unescaped.as_mut() {
                buffer.push(c);
            }
        }

        let content = match unescaped {
            Some(buffer) => Cow::Owned(buffer),
            None => Cow::Borrowed(&self.input[content_start..self.position - quote.len_utf8()]),
        };
        self.token(TokenKind::String(content), start)
    }

    /// 读取标识符或关键字
    /// 标识符可以包含字母、数字和下划线
    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        let literal = &self.input[start..self.position];
        self.token(match_keyword(literal), start)
    }
}

fn match_keyword(s: &str) -> TokenKind<'_> {
    match s.to_ascii_lowercase().as_str() {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "in" => TokenKind::In,
        "between" => TokenKind::Between,
        _ => TokenKind::Identifier(s),
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let start = self.position;

        let Some(c) = self.bump() else {
            return None; // 到达输入末尾
        };

        let token = match c {
            '=' => self.token(TokenKind::Eq, start),
            '(' => self.token(TokenKind::LParen, start),
            ')' => self.token(TokenKind::RParen, start),
            ',' => self.token(TokenKind::Comma, start),
            '@' => self.token(TokenKind::At, start),
            '+' => self.token(TokenKind::Plus, start),
            '-' => self.token(TokenKind::Dash, start),
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.token(TokenKind::Lte, start)
                } else {
                    self.token(TokenKind::Lt, start)
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.token(TokenKind::Gte, start)
                } else {
                    self.token(TokenKind::Gt, start)
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.token(TokenKind::NotEq, start)
                } else {
                    self.token(TokenKind::Illegal('!'), start)
                }
            }
            '"' | '\'' => self.read_string(start, c),
            c if c.is_ascii_digit() => self.read_number(start),
            c if c.is_alphabetic() || c == '_' => self.read_identifier(start),
            other => self.token(TokenKind::Illegal(other), start),
        };
        Some(token)
    }
}
