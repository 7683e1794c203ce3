//! 式のパース
//!
//! 診断式に必要な文法サブセットのみを扱います:
//! リテラル、識別子、`$N`スロット、`(Type)`キャスト、`*`デリファレンス、
//! `[receiver selector: arg ...]`メッセージ送信、`.member`アクセス、代入。
//! 評価順序の規定（左から右）は評価器側の責務です。

use crate::ast::Expr;
use crate::errors::EvalError;
use crate::Result;
use rindo_runtime::DeclaredType;

/// 字句トークン
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    ObjString(String),
    CString(String),
    Ident(String),
    Slot(usize),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Star,
    Dot,
    Colon,
    Equals,
}

/// 式テキストをASTにパースする
pub fn parse(text: &str) -> Result<Expr> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if parser.pos < parser.tokens.len() {
        return Err(EvalError::Syntax(format!(
            "unexpected trailing input near {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

/// アドレス文字列をパースする（`0x`プレフィックス対応）
pub fn parse_address(s: &str) -> Result<u64> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse::<u64>()
    };
    parsed.map_err(|_| EvalError::Syntax(format!("invalid address '{}'", s)))
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '@' => {
                chars.next();
                if chars.peek() != Some(&'"') {
                    return Err(EvalError::Syntax("expected '\"' after '@'".to_string()));
                }
                chars.next();
                tokens.push(Token::ObjString(read_string_body(&mut chars)?));
            }
            '"' => {
                chars.next();
                tokens.push(Token::CString(read_string_body(&mut chars)?));
            }
            '$' => {
                chars.next();
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = digits
                    .parse::<usize>()
                    .map_err(|_| EvalError::Syntax("expected digits after '$'".to_string()))?;
                tokens.push(Token::Slot(n));
            }
            '0'..='9' => {
                tokens.push(Token::Int(read_number(&mut chars)?));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equals);
            }
            _ => {
                return Err(EvalError::Syntax(format!("unexpected character '{}'", c)));
            }
        }
    }

    Ok(tokens)
}

fn read_string_body(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<String> {
    let mut body = String::new();
    loop {
        match chars.next() {
            Some('"') => return Ok(body),
            Some('\\') => match chars.next() {
                Some('n') => body.push('\n'),
                Some('t') => body.push('\t'),
                Some('0') => body.push('\0'),
                Some('\\') => body.push('\\'),
                Some('"') => body.push('"'),
                other => {
                    return Err(EvalError::Syntax(format!(
                        "unknown escape sequence '\\{}'",
                        other.map(String::from).unwrap_or_default()
                    )))
                }
            },
            Some(c) => body.push(c),
            None => return Err(EvalError::Syntax("unterminated string literal".to_string())),
        }
    }
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<i64> {
    let mut digits = String::new();
    while let Some(&d) = chars.peek() {
        if d.is_ascii_alphanumeric() {
            digits.push(d);
            chars.next();
        } else {
            break;
        }
    }

    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse::<i64>()
    };
    parsed.map_err(|_| EvalError::Syntax(format!("invalid number literal '{}'", digits)))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(EvalError::Syntax(format!(
                "expected {:?}, found {:?}",
                expected, t
            ))),
            None => Err(EvalError::Syntax(format!(
                "expected {:?}, found end of input",
                expected
            ))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(t) => Err(EvalError::Syntax(format!(
                "expected an identifier, found {:?}",
                t
            ))),
            None => Err(EvalError::Syntax(
                "expected an identifier, found end of input".to_string(),
            )),
        }
    }

    /// expression := unary ('=' expression)?
    fn parse_expression(&mut self) -> Result<Expr> {
        let lhs = self.parse_unary()?;
        if matches!(self.peek(), Some(Token::Equals)) {
            self.pos += 1;
            let rhs = self.parse_expression()?;
            return Ok(Expr::Assign(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    /// unary := '*' unary | '(' type ')' unary | postfix
    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Star) => {
                self.pos += 1;
                Ok(Expr::Deref(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                if let Some(ty) = self.try_parse_cast() {
                    Ok(Expr::Cast(ty, Box::new(self.parse_unary()?)))
                } else {
                    self.parse_postfix()
                }
            }
            _ => self.parse_postfix(),
        }
    }

    /// `(` の位置でキャストのパースを試みる
    ///
    /// 括弧の中身が型として読め、かつ `)` で閉じる場合のみキャストとして
    /// 消費します。それ以外は位置を巻き戻し、グループ化式として扱わせます。
    fn try_parse_cast(&mut self) -> Option<DeclaredType> {
        let save = self.pos;
        self.pos += 1; // '('
        if let Some(ty) = self.try_parse_type() {
            if matches!(self.peek(), Some(Token::RParen)) {
                self.pos += 1;
                return Some(ty);
            }
        }
        self.pos = save;
        None
    }

    /// 型名のパースを試みる
    ///
    /// 組み込み型名はそのまま、クラス名は `Name *` の形のみ型として認める
    /// （裸のクラス名はグループ化された識別子と区別できないため）。
    fn try_parse_type(&mut self) -> Option<DeclaredType> {
        let name = match self.peek() {
            Some(Token::Ident(n)) => n.clone(),
            _ => return None,
        };
        self.pos += 1;

        let mut named = false;
        let base = match name.as_str() {
            "void" => DeclaredType::Void,
            "int" => DeclaredType::Int,
            "unsigned" => {
                if matches!(self.peek(), Some(Token::Ident(n)) if n == "int") {
                    self.pos += 1;
                }
                DeclaredType::UnsignedInt
            }
            "long" => DeclaredType::Long,
            "char" => DeclaredType::Char,
            "bool" => DeclaredType::Bool,
            "id" => DeclaredType::Id,
            _ => {
                named = true;
                DeclaredType::Object(name)
            }
        };

        let mut stars = 0;
        while matches!(self.peek(), Some(Token::Star)) {
            self.pos += 1;
            stars += 1;
        }
        if named {
            if stars == 0 {
                return None;
            }
            // 最初の `*` はオブジェクト参照そのものを表す
            stars -= 1;
        }

        let mut ty = base;
        for _ in 0..stars {
            ty = DeclaredType::Pointer(Box::new(ty));
        }
        Some(ty)
    }

    /// postfix := primary ('.' Ident)*
    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            let name = self.expect_ident()?;
            expr = Expr::Member(Box::new(expr), name);
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Expr::IntLiteral(v)),
            Some(Token::ObjString(s)) => Ok(Expr::StringLiteral(s)),
            Some(Token::CString(s)) => Ok(Expr::CStringLiteral(s)),
            Some(Token::Ident(name)) => Ok(Expr::Identifier(name)),
            Some(Token::Slot(n)) => Ok(Expr::ResultSlot(n)),
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::LBracket) => self.parse_message(),
            Some(t) => Err(EvalError::Syntax(format!("unexpected token {:?}", t))),
            None => Err(EvalError::Syntax("unexpected end of input".to_string())),
        }
    }

    /// message := unary Ident (':' unary (Ident ':' unary)*)? ']'
    fn parse_message(&mut self) -> Result<Expr> {
        let receiver = self.parse_unary()?;
        let mut selector = self.expect_ident()?;
        let mut args = Vec::new();

        if matches!(self.peek(), Some(Token::Colon)) {
            self.pos += 1;
            selector.push(':');
            args.push(self.parse_unary()?);

            while matches!(self.peek(), Some(Token::Ident(_))) {
                let part = self.expect_ident()?;
                self.expect(&Token::Colon)?;
                selector.push_str(&part);
                selector.push(':');
                args.push(self.parse_unary()?);
            }
        }

        self.expect(&Token::RBracket)?;
        Ok(Expr::Message {
            receiver: Box::new(receiver),
            selector,
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_of_message_send() {
        let expr = parse("(int)[str length]").unwrap();
        assert_eq!(
            expr,
            Expr::Cast(
                DeclaredType::Int,
                Box::new(Expr::Message {
                    receiver: Box::new(Expr::Identifier("str".to_string())),
                    selector: "length".to_string(),
                    args: vec![],
                })
            )
        );
    }

    #[test]
    fn test_assignment_of_string_literal() {
        let expr = parse("str = @\"new\"").unwrap();
        assert_eq!(
            expr,
            Expr::Assign(
                Box::new(Expr::Identifier("str".to_string())),
                Box::new(Expr::StringLiteral("new".to_string()))
            )
        );
    }

    #[test]
    fn test_message_with_cstring_argument() {
        let expr = parse("[String stringWithCString: \"new\"]").unwrap();
        assert_eq!(
            expr,
            Expr::Message {
                receiver: Box::new(Expr::Identifier("String".to_string())),
                selector: "stringWithCString:".to_string(),
                args: vec![Expr::CStringLiteral("new".to_string())],
            }
        );
    }

    #[test]
    fn test_multi_part_selector() {
        let expr = parse("[p setX: 1 y: 2]").unwrap();
        match expr {
            Expr::Message {
                selector, args, ..
            } => {
                assert_eq!(selector, "setX:y:");
                assert_eq!(args, vec![Expr::IntLiteral(1), Expr::IntLiteral(2)]);
            }
            other => panic!("unexpected AST: {:?}", other),
        }
    }

    #[test]
    fn test_deref_and_member() {
        assert_eq!(
            parse("*my").unwrap(),
            Expr::Deref(Box::new(Expr::Identifier("my".to_string())))
        );
        assert_eq!(
            parse("str.length").unwrap(),
            Expr::Member(
                Box::new(Expr::Identifier("str".to_string())),
                "length".to_string()
            )
        );
    }

    #[test]
    fn test_result_slot_and_named_cast() {
        let expr = parse("(MyString *)$0").unwrap();
        assert_eq!(
            expr,
            Expr::Cast(
                DeclaredType::Object("MyString".to_string()),
                Box::new(Expr::ResultSlot(0))
            )
        );
    }

    #[test]
    fn test_bare_parens_are_grouping() {
        // 裸の識別子を括った場合はキャストではなくグループ化
        assert_eq!(
            parse("(str)").unwrap(),
            Expr::Identifier("str".to_string())
        );
    }

    #[test]
    fn test_pointer_casts() {
        assert_eq!(
            parse("(char *)$1").unwrap(),
            Expr::Cast(
                DeclaredType::Pointer(Box::new(DeclaredType::Char)),
                Box::new(Expr::ResultSlot(1))
            )
        );
        assert_eq!(
            parse("(unsigned int)$1").unwrap(),
            Expr::Cast(DeclaredType::UnsignedInt, Box::new(Expr::ResultSlot(1)))
        );
    }

    #[test]
    fn test_hex_literal() {
        assert_eq!(parse("0x10").unwrap(), Expr::IntLiteral(16));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("[str"), Err(EvalError::Syntax(_))));
        assert!(matches!(parse("@x"), Err(EvalError::Syntax(_))));
        assert!(matches!(parse("42 42"), Err(EvalError::Syntax(_))));
        assert!(matches!(parse("str ="), Err(EvalError::Syntax(_))));
        assert!(matches!(parse("@\"open"), Err(EvalError::Syntax(_))));
        assert!(matches!(parse("#"), Err(EvalError::Syntax(_))));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x400000").unwrap(), 0x400000);
        assert_eq!(parse_address("1024").unwrap(), 1024);
        assert!(parse_address("zz").is_err());
    }
}
