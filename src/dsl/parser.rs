//! Recursive-descent parser for Quarry source files.
//!
//! Works over the token slice produced by [`lex`](super::lexer::lex) with
//! one token of lookahead. A malformed statement produces a [`ParseError`]
//! and the parser skips to just past the next `;`, so every bad statement in
//! a file gets its own error.

use super::ast::*;
use super::lexer::Token;
use super::span::{Span, Spanned};
use crate::model::DataType;

/// A grammar violation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct ParseError {
    pub expected: String,
    pub found: String,
    pub span: Span,
}

type PResult<T> = Result<T, ParseError>;

/// Parse a token slice into a script, collecting one error per bad statement.
///
/// The returned script holds every statement that parsed cleanly.
pub fn parse_tokens(tokens: &[(Token<'_>, Span)], source_len: usize) -> (Script, Vec<ParseError>) {
    let mut parser = Parser::new(tokens, source_len);
    let mut script = Script::default();
    let mut errors = Vec::new();

    while !parser.at_end() {
        let start = parser.span().start;
        match parser.statement() {
            Ok(stmt) => {
                let span = start..parser.prev_end();
                script.statements.push(Spanned::new(stmt, span));
            }
            Err(err) => {
                errors.push(err);
                parser.recover();
            }
        }
    }

    (script, errors)
}

struct Parser<'t, 'src> {
    tokens: &'t [(Token<'src>, Span)],
    pos: usize,
    eof: Span,
}

impl<'t, 'src> Parser<'t, 'src> {
    fn new(tokens: &'t [(Token<'src>, Span)], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            eof: source_len..source_len,
        }
    }

    // ========================================================================
    // Cursor
    // ========================================================================

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'t Token<'src>> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t Token<'src>> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| self.eof.clone())
    }

    /// End offset of the last consumed token.
    fn prev_end(&self) -> usize {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some((_, span)) => span.end,
            None => 0,
        }
    }

    fn bump(&mut self) -> Span {
        let span = self.span();
        if !self.at_end() {
            self.pos += 1;
        }
        span
    }

    fn check(&self, tok: &Token<'src>) -> bool {
        self.peek() == Some(tok)
    }

    fn eat(&mut self, tok: &Token<'src>) -> bool {
        if self.check(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(word))
    }

    fn expect(&mut self, tok: &Token<'src>) -> PResult<Span> {
        if self.check(tok) {
            Ok(self.bump())
        } else {
            Err(self.error(format!("`{}`", tok)))
        }
    }

    fn error(&self, expected: impl Into<String>) -> ParseError {
        let found = match self.peek() {
            Some(tok) => format!("`{}`", tok),
            None => "end of input".to_string(),
        };
        ParseError {
            expected: expected.into(),
            found,
            span: self.span(),
        }
    }

    /// Skip to just past the next `;`.
    fn recover(&mut self) {
        while let Some(tok) = self.peek() {
            self.pos += 1;
            if *tok == Token::Semicolon {
                break;
            }
        }
    }

    fn spanned<T>(&self, start: usize, value: T) -> Spanned<T> {
        Spanned::new(value, start..self.prev_end())
    }

    // ========================================================================
    // Names
    // ========================================================================

    fn ident(&mut self, what: &str) -> PResult<Spanned<String>> {
        match self.peek() {
            Some(Token::Ident(s)) => {
                let span = self.bump();
                Ok(Spanned::new(s.to_string(), span))
            }
            _ => Err(self.error(what)),
        }
    }

    /// A dotted path. Keywords are allowed after the first segment so
    /// `orders.key` or `sales.order` still read as names.
    fn path(&mut self, what: &str) -> PResult<Spanned<ConceptPath>> {
        let first = self.ident(what)?;
        let start = first.span.start;
        let mut segments = vec![first.value];
        while self.check(&Token::Dot) {
            let segment = match self.peek_at(1) {
                Some(Token::Ident(s)) => s.to_string(),
                Some(tok) => match tok.keyword_text() {
                    Some(text) => text.to_string(),
                    None => break,
                },
                None => break,
            };
            self.pos += 2;
            segments.push(segment);
        }
        Ok(self.spanned(start, ConceptPath::new(segments)))
    }

    /// Import paths name files, so keywords are valid in every segment.
    fn import_path(&mut self) -> PResult<Spanned<String>> {
        let start = self.span().start;
        let mut segments = Vec::new();
        loop {
            let segment = match self.peek() {
                Some(Token::Ident(s)) => s.to_string(),
                Some(tok) => match tok.keyword_text() {
                    Some(text) => text.to_string(),
                    None => return Err(self.error("import path")),
                },
                None => return Err(self.error("import path")),
            };
            self.pos += 1;
            segments.push(segment);
            if !self.eat(&Token::Dot) {
                break;
            }
        }
        Ok(self.spanned(start, segments.join(".")))
    }

    fn path_list(&mut self) -> PResult<Vec<Spanned<ConceptPath>>> {
        self.expect(&Token::LParen)?;
        let mut paths = vec![self.path("concept name")?];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RParen) {
                break;
            }
            paths.push(self.path("concept name")?);
        }
        self.expect(&Token::RParen)?;
        Ok(paths)
    }

    fn data_type(&mut self) -> PResult<Option<Spanned<DataType>>> {
        let text = match self.peek() {
            Some(Token::Ident(s)) | Some(Token::TypeAnnotation(s)) => *s,
            _ => return Ok(None),
        };
        match text.parse::<DataType>() {
            Ok(ty) => {
                let span = self.bump();
                Ok(Some(Spanned::new(ty, span)))
            }
            Err(_) => Err(self.error("data type")),
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement(&mut self) -> PResult<Statement> {
        let stmt = match self.peek() {
            Some(Token::Import) => Statement::Import(self.import()?),
            Some(Token::Key) => Statement::Concept(self.concept(ConceptKind::Key)?),
            Some(Token::Property) => Statement::Concept(self.concept(ConceptKind::Property)?),
            Some(Token::Metric) => Statement::Concept(self.concept(ConceptKind::Metric)?),
            Some(Token::Auto) => Statement::Concept(self.concept(ConceptKind::Auto)?),
            Some(Token::Datasource) => Statement::Datasource(self.datasource()?),
            Some(Token::Select) | Some(Token::Where) => Statement::Query(self.query()?),
            _ => return Err(self.error("statement")),
        };
        self.expect(&Token::Semicolon)?;
        Ok(stmt)
    }

    fn import(&mut self) -> PResult<ImportStmt> {
        self.bump();
        let path = match self.peek() {
            Some(Token::Str(s)) => {
                let span = self.bump();
                Spanned::new(s.to_string(), span)
            }
            _ => self.import_path()?,
        };
        let alias = if self.eat(&Token::As) {
            self.ident("import alias")?
        } else {
            let stem = path.value.trim_end_matches(".qry");
            let last = stem
                .rsplit(|c| c == '.' || c == '/')
                .next()
                .unwrap_or(stem)
                .to_string();
            Spanned::new(last, path.span.clone())
        };
        Ok(ImportStmt { path, alias })
    }

    fn concept(&mut self, kind: ConceptKind) -> PResult<ConceptDecl> {
        self.bump();

        let (owner, name) = match kind {
            ConceptKind::Key | ConceptKind::Auto => (None, self.ident("concept name")?),
            ConceptKind::Property | ConceptKind::Metric if self.check(&Token::Lt) => {
                let owners = self.composite_owner()?;
                self.expect(&Token::Dot)?;
                (Some(owners), self.ident("property name")?)
            }
            ConceptKind::Property | ConceptKind::Metric => {
                let path = self.path("concept name")?;
                let Spanned { value, span } = path;
                let mut segments = value.segments;
                let name = segments.pop().unwrap_or_default();
                if segments.is_empty() {
                    if kind == ConceptKind::Property {
                        return Err(ParseError {
                            expected: "owner key before property name".to_string(),
                            found: format!("`{}`", name),
                            span,
                        });
                    }
                    (None, Spanned::new(name, span))
                } else {
                    // name span covers just the last segment
                    let name_start = span.end.saturating_sub(name.len());
                    let owner_span = span.start..name_start.saturating_sub(1).max(span.start);
                    let owner = OwnerRef::Single(Spanned::new(ConceptPath::new(segments), owner_span));
                    (Some(owner), Spanned::new(name, name_start..span.end))
                }
            }
        };

        let data_type = self.data_type()?;

        let derivation = if self.eat(&Token::LeftArrow) {
            Some(self.expr()?)
        } else {
            None
        };

        if kind == ConceptKind::Auto && derivation.is_none() {
            return Err(self.error("`<-` derivation for auto concept"));
        }

        Ok(ConceptDecl {
            kind,
            owner,
            name,
            data_type,
            derivation,
        })
    }

    /// `<a.id, b.id>`
    fn composite_owner(&mut self) -> PResult<OwnerRef> {
        self.expect(&Token::Lt)?;
        let mut keys = vec![self.path("owner key")?];
        while self.eat(&Token::Comma) {
            keys.push(self.path("owner key")?);
        }
        self.expect(&Token::Gt)?;
        Ok(OwnerRef::Composite(keys))
    }

    fn datasource(&mut self) -> PResult<DatasourceDecl> {
        self.bump();
        let name = self.ident("datasource name")?;

        self.expect(&Token::LParen)?;
        let mut columns = Vec::new();
        loop {
            if self.check(&Token::RParen) && !columns.is_empty() {
                break;
            }
            columns.push(self.column_mapping()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;

        let mut grain = None;
        let mut address = None;
        loop {
            if grain.is_none() && self.check(&Token::Grain) {
                self.bump();
                grain = Some(self.path_list()?);
            } else if address.is_none() && self.check_word("address") {
                self.bump();
                address = Some(self.address()?);
            } else {
                break;
            }
        }

        let address = match address {
            Some(address) => address,
            None if grain.is_none() => return Err(self.error("`grain` or `address`")),
            None => return Err(self.error("`address`")),
        };

        Ok(DatasourceDecl {
            name,
            columns,
            grain,
            address,
        })
    }

    /// `col: concept`, `'col': concept`, or the shorthand `concept`.
    fn column_mapping(&mut self) -> PResult<ColumnMapping> {
        match self.peek() {
            Some(Token::Str(s)) | Some(Token::Quoted(s)) => {
                let column = Spanned::new(s.to_string(), self.bump());
                self.expect(&Token::Colon)?;
                let concept = self.path("concept name")?;
                Ok(ColumnMapping { column, concept })
            }
            Some(Token::Ident(_)) => {
                let path = self.path("column name")?;
                if path.segments.len() == 1 && self.eat(&Token::Colon) {
                    let column = path.map(|p| p.name().to_string());
                    let concept = self.path("concept name")?;
                    Ok(ColumnMapping { column, concept })
                } else {
                    let column = Spanned::new(path.name().to_string(), path.span.clone());
                    Ok(ColumnMapping {
                        column,
                        concept: path,
                    })
                }
            }
            _ => Err(self.error("column mapping")),
        }
    }

    fn address(&mut self) -> PResult<Spanned<AddressRef>> {
        match self.peek() {
            Some(Token::Str(s)) => {
                let span = self.bump();
                Ok(Spanned::new(AddressRef::File(s.to_string()), span))
            }
            Some(Token::Quoted(s)) => {
                let span = self.bump();
                Ok(Spanned::new(AddressRef::Quoted(s.to_string()), span))
            }
            Some(Token::Ident(_)) => {
                Ok(self.path("table address")?.map(|p| AddressRef::Table(p.segments)))
            }
            _ => Err(self.error("table address")),
        }
    }

    fn query(&mut self) -> PResult<QueryStmt> {
        let mut query = QueryStmt::default();

        if self.eat(&Token::Where) {
            query.where_clause = Some(self.expr()?);
        }

        self.expect(&Token::Select)?;
        loop {
            query.selects.push(self.select_item()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        if query.where_clause.is_none() && self.eat(&Token::Where) {
            query.where_clause = Some(self.expr()?);
        }
        if self.eat(&Token::Having) {
            query.having = Some(self.expr()?);
        }
        if self.eat(&Token::Order) {
            self.expect(&Token::By)?;
            loop {
                query.order_by.push(self.order_item()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        if self.eat(&Token::Limit) {
            query.limit = Some(self.limit()?);
        }

        Ok(query)
    }

    fn select_item(&mut self) -> PResult<SelectItem> {
        let expr = self.expr()?;
        let alias = if self.eat(&Token::Arrow) || self.eat(&Token::As) {
            match self.peek() {
                Some(Token::Str(s)) => Some(Spanned::new(s.to_string(), self.bump())),
                _ => Some(self.ident("output name")?),
            }
        } else {
            None
        };
        Ok(SelectItem { expr, alias })
    }

    fn order_item(&mut self) -> PResult<OrderItem> {
        let expr = self.expr()?;
        let direction = if self.eat(&Token::Desc) {
            SortDirection::Desc
        } else {
            self.eat(&Token::Asc);
            SortDirection::Asc
        };
        let nulls = if self.check_word("nulls") {
            self.bump();
            if self.check_word("first") {
                self.bump();
                Some(NullsPosition::First)
            } else if self.check_word("last") {
                self.bump();
                Some(NullsPosition::Last)
            } else {
                return Err(self.error("`first` or `last`"));
            }
        } else {
            None
        };
        Ok(OrderItem {
            expr,
            direction,
            nulls,
        })
    }

    fn limit(&mut self) -> PResult<Spanned<u64>> {
        match self.peek() {
            Some(Token::Number(n)) => match n.parse::<u64>() {
                Ok(value) => Ok(Spanned::new(value, self.bump())),
                Err(_) => Err(self.error("non-negative integer limit")),
            },
            _ => Err(self.error("row limit")),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expr(&mut self) -> PResult<Spanned<Expr>> {
        self.or_expr()
    }

    fn binary(left: Spanned<Expr>, op: BinaryOp, right: Spanned<Expr>) -> Spanned<Expr> {
        let span = left.span.start..right.span.end;
        Spanned::new(
            Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            span,
        )
    }

    fn or_expr(&mut self) -> PResult<Spanned<Expr>> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Self::binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> PResult<Spanned<Expr>> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = Self::binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> PResult<Spanned<Expr>> {
        if self.check(&Token::Not) {
            let start = self.bump().start;
            let inner = self.not_expr()?;
            return Ok(self.spanned(
                start,
                Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(inner),
                },
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Spanned<Expr>> {
        let left = self.additive()?;
        let start = left.span.start;

        let op = match self.peek() {
            Some(Token::Eq) => Some(BinaryOp::Eq),
            Some(Token::Ne) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Lte) => Some(BinaryOp::Lte),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Gte) => Some(BinaryOp::Gte),
            Some(Token::Like) => Some(BinaryOp::Like),
            Some(Token::Not) if self.peek_at(1) == Some(&Token::Like) => {
                self.bump();
                Some(BinaryOp::NotLike)
            }
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let right = self.additive()?;
            return Ok(Self::binary(left, op, right));
        }

        if self.eat(&Token::Is) {
            let negated = self.eat(&Token::Not);
            self.expect(&Token::Null)?;
            return Ok(self.spanned(
                start,
                Expr::IsNull {
                    expr: Box::new(left),
                    negated,
                },
            ));
        }

        let negated = self.check(&Token::Not) && self.peek_at(1) == Some(&Token::In);
        if negated {
            self.bump();
        }
        if self.eat(&Token::In) {
            self.expect(&Token::LParen)?;
            let mut values = vec![self.expr()?];
            while self.eat(&Token::Comma) {
                values.push(self.expr()?);
            }
            self.expect(&Token::RParen)?;
            return Ok(self.spanned(
                start,
                Expr::InList {
                    expr: Box::new(left),
                    values,
                    negated,
                },
            ));
        }

        Ok(left)
    }

    fn additive(&mut self) -> PResult<Spanned<Expr>> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.multiplicative()?;
            left = Self::binary(left, op, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> PResult<Spanned<Expr>> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.unary()?;
            left = Self::binary(left, op, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Spanned<Expr>> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Bang) | Some(Token::Not) => UnaryOp::Not,
            _ => return self.postfix(),
        };
        let start = self.bump().start;
        let inner = self.unary()?;
        Ok(self.spanned(
            start,
            Expr::Unary {
                op,
                expr: Box::new(inner),
            },
        ))
    }

    fn postfix(&mut self) -> PResult<Spanned<Expr>> {
        let mut expr = self.primary()?;
        while let Some(Token::TypeAnnotation(name)) = self.peek() {
            let data_type = name
                .parse::<DataType>()
                .map_err(|_| self.error("data type"))?;
            self.bump();
            let start = expr.span.start;
            expr = self.spanned(
                start,
                Expr::Cast {
                    expr: Box::new(expr),
                    data_type,
                },
            );
        }
        Ok(expr)
    }

    fn primary(&mut self) -> PResult<Spanned<Expr>> {
        let start = self.span().start;
        match self.peek() {
            Some(Token::Number(text)) => {
                let literal = self.number(text)?;
                self.bump();
                Ok(self.spanned(start, Expr::Literal(literal)))
            }
            Some(Token::Str(s)) => {
                self.bump();
                Ok(self.spanned(start, Expr::Literal(Literal::String(s.to_string()))))
            }
            Some(Token::True) => {
                self.bump();
                Ok(self.spanned(start, Expr::Literal(Literal::Bool(true))))
            }
            Some(Token::False) => {
                self.bump();
                Ok(self.spanned(start, Expr::Literal(Literal::Bool(false))))
            }
            Some(Token::Null) => {
                self.bump();
                Ok(self.spanned(start, Expr::Literal(Literal::Null)))
            }
            Some(Token::LParen) => {
                self.bump();
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                // keep the parenthesised span so diagnostics cover the brackets
                Ok(self.spanned(start, inner.value))
            }
            Some(Token::Ident(_)) => {
                let path = self.path("expression")?;
                if path.segments.len() == 1 && self.check(&Token::LParen) {
                    self.call(path)
                } else {
                    Ok(path.map(Expr::Concept))
                }
            }
            _ => Err(self.error("expression")),
        }
    }

    fn number(&self, text: &str) -> PResult<Literal> {
        if text.contains('.') {
            match text.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Literal::Float(v)),
                _ => Err(self.error("finite number")),
            }
        } else {
            text.parse::<i64>()
                .map(Literal::Int)
                .map_err(|_| self.error("integer within 64-bit range"))
        }
    }

    fn call(&mut self, name: Spanned<ConceptPath>) -> PResult<Spanned<Expr>> {
        let start = name.span.start;
        let fname = name.name().to_string();
        self.expect(&Token::LParen)?;

        if let Some(func) = AggregateFunc::from_name(&fname) {
            let arg = if func == AggregateFunc::Count && self.check(&Token::Star) {
                self.bump();
                None
            } else {
                Some(Box::new(self.expr()?))
            };
            self.expect(&Token::RParen)?;

            let by = if self.eat(&Token::By) {
                if self.check(&Token::LParen) {
                    self.path_list()?
                } else {
                    vec![self.path("grouping concept")?]
                }
            } else {
                Vec::new()
            };

            return Ok(self.spanned(start, Expr::Aggregate { func, arg, by }));
        }

        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            args.push(self.expr()?);
            while self.eat(&Token::Comma) {
                args.push(self.expr()?);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(self.spanned(start, Expr::Function { name: fname, args }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::lexer::lex;

    /// Parse a source string, panicking on any error.
    fn parse_str(input: &str) -> Script {
        let (script, errors) = try_parse_str(input);
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);
        script
    }

    fn try_parse_str(input: &str) -> (Script, Vec<ParseError>) {
        let tokens = lex(input).expect("lexing should succeed");
        parse_tokens(&tokens, input.len())
    }

    fn only_query(script: &Script) -> &QueryStmt {
        match &script.statements[0].value {
            Statement::Query(q) => q,
            other => panic!("Expected query, got {:?}", other),
        }
    }

    fn only_concept(script: &Script) -> &ConceptDecl {
        match &script.statements[0].value {
            Statement::Concept(c) => c,
            other => panic!("Expected concept, got {:?}", other),
        }
    }

    fn path(s: &str) -> ConceptPath {
        ConceptPath::new(s.split('.').map(String::from).collect())
    }

    // ========================================================================
    // Imports
    // ========================================================================

    #[test]
    fn test_import_default_alias() {
        let script = parse_str("import sales.customer;");
        let import = script.imports().next().unwrap();
        assert_eq!(import.path.value, "sales.customer");
        assert_eq!(import.alias.value, "customer");
    }

    #[test]
    fn test_import_explicit_alias() {
        let script = parse_str("import order as orders;");
        let import = script.imports().next().unwrap();
        assert_eq!(import.path.value, "order");
        assert_eq!(import.alias.value, "orders");
    }

    #[test]
    fn test_import_keyword_segment() {
        let script = parse_str("import models.order;");
        let import = script.imports().next().unwrap();
        assert_eq!(import.path.value, "models.order");
        assert_eq!(import.alias.value, "order");
    }

    // ========================================================================
    // Concepts
    // ========================================================================

    #[test]
    fn test_key_with_type() {
        let script = parse_str("key id int;");
        let c = only_concept(&script);
        assert_eq!(c.kind, ConceptKind::Key);
        assert_eq!(c.name.value, "id");
        assert_eq!(c.data_type.as_ref().map(|t| t.value), Some(DataType::Int));
        assert!(c.owner.is_none());
        assert_eq!(c.name.span, 4..6);
    }

    #[test]
    fn test_property_single_owner() {
        let script = parse_str("property customer.id.name string;");
        let c = only_concept(&script);
        assert_eq!(c.kind, ConceptKind::Property);
        assert_eq!(c.name.value, "name");
        match &c.owner {
            Some(OwnerRef::Single(owner)) => assert_eq!(owner.value, path("customer.id")),
            other => panic!("Expected single owner, got {:?}", other),
        }
    }

    #[test]
    fn test_property_composite_owner() {
        let script = parse_str("property <part.id, supplier.id>.available_qty int;");
        let c = only_concept(&script);
        assert_eq!(c.name.value, "available_qty");
        match &c.owner {
            Some(OwnerRef::Composite(keys)) => {
                let keys: Vec<_> = keys.iter().map(|k| k.value.clone()).collect();
                assert_eq!(keys, vec![path("part.id"), path("supplier.id")]);
            }
            other => panic!("Expected composite owner, got {:?}", other),
        }
    }

    #[test]
    fn test_property_requires_owner() {
        let (_, errors) = try_parse_str("property name string;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].expected.contains("owner"));
    }

    #[test]
    fn test_metric_with_derivation() {
        let script = parse_str("metric revenue float <- sum(total_price);");
        let c = only_concept(&script);
        assert_eq!(c.kind, ConceptKind::Metric);
        assert!(c.owner.is_none());
        match &c.derivation.as_ref().unwrap().value {
            Expr::Aggregate { func, by, .. } => {
                assert_eq!(*func, AggregateFunc::Sum);
                assert!(by.is_empty());
            }
            other => panic!("Expected aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_auto_requires_derivation() {
        let (_, errors) = try_parse_str("auto total float;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].expected.contains("<-"));
    }

    #[test]
    fn test_unknown_type_is_error() {
        let (_, errors) = try_parse_str("key id widget;");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].expected, "data type");
        assert_eq!(errors[0].found, "`widget`");
    }

    // ========================================================================
    // Datasources
    // ========================================================================

    #[test]
    fn test_datasource_full() {
        let script = parse_str(
            "datasource orders (o_orderkey: id, o_custkey: customer.id, status) \
             grain (id) address tpch.orders;",
        );
        let ds = script.datasources().next().unwrap();
        assert_eq!(ds.name.value, "orders");
        assert_eq!(ds.columns.len(), 3);
        assert_eq!(ds.columns[1].column.value, "o_custkey");
        assert_eq!(ds.columns[1].concept.value, path("customer.id"));
        assert_eq!(ds.columns[2].column.value, "status");
        assert_eq!(ds.columns[2].concept.value, path("status"));
        assert_eq!(ds.grain.as_ref().unwrap()[0].value, path("id"));
        assert_eq!(
            ds.address.value,
            AddressRef::Table(vec!["tpch".into(), "orders".into()])
        );
    }

    #[test]
    fn test_datasource_address_before_grain() {
        let script = parse_str("datasource t (a: id) address `proj.ds.t` grain (id);");
        let ds = script.datasources().next().unwrap();
        assert_eq!(ds.address.value, AddressRef::Quoted("proj.ds.t".into()));
        assert!(ds.grain.is_some());
    }

    #[test]
    fn test_datasource_file_address_and_quoted_column() {
        let script = parse_str("datasource t ('Order Key': id) address 'data/orders.parquet';");
        let ds = script.datasources().next().unwrap();
        assert_eq!(ds.columns[0].column.value, "Order Key");
        assert_eq!(
            ds.address.value,
            AddressRef::File("data/orders.parquet".into())
        );
        assert!(ds.grain.is_none());
    }

    #[test]
    fn test_datasource_missing_address() {
        let (_, errors) = try_parse_str("datasource t (a: id) grain (id);");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].expected, "`address`");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[test]
    fn test_query_clauses() {
        let script = parse_str(
            "select customer.id, sum(orders.total_price) -> revenue \
             where orders.status = 'F' having revenue > 100 \
             order by revenue desc nulls last, customer.id limit 10;",
        );
        let q = only_query(&script);
        assert_eq!(q.selects.len(), 2);
        assert_eq!(q.selects[1].alias.as_ref().unwrap().value, "revenue");
        assert!(q.where_clause.is_some());
        assert!(q.having.is_some());
        assert_eq!(q.order_by.len(), 2);
        assert_eq!(q.order_by[0].direction, SortDirection::Desc);
        assert_eq!(q.order_by[0].nulls, Some(NullsPosition::Last));
        assert_eq!(q.order_by[1].direction, SortDirection::Asc);
        assert_eq!(q.limit.as_ref().unwrap().value, 10);
    }

    #[test]
    fn test_leading_where() {
        let script = parse_str("where status = 'F' select id;");
        let q = only_query(&script);
        assert!(q.where_clause.is_some());
        assert_eq!(q.selects.len(), 1);
    }

    #[test]
    fn test_literal_projection_with_arrow() {
        let script = parse_str("select 1 -> echo;");
        let q = only_query(&script);
        assert_eq!(q.selects[0].expr.value, Expr::Literal(Literal::Int(1)));
        assert_eq!(q.selects[0].alias.as_ref().unwrap().value, "echo");
    }

    #[test]
    fn test_precedence() {
        let script = parse_str("select a + b * c = d or not e and f;");
        let q = only_query(&script);
        // or(eq(add(a, mul(b, c)), d), and(not e, f))
        match &q.selects[0].expr.value {
            Expr::Binary { op: BinaryOp::Or, left, right } => {
                match &left.value {
                    Expr::Binary { op: BinaryOp::Eq, left, .. } => match &left.value {
                        Expr::Binary { op: BinaryOp::Add, right, .. } => {
                            assert!(matches!(right.value, Expr::Binary { op: BinaryOp::Mul, .. }));
                        }
                        other => panic!("Expected add, got {:?}", other),
                    },
                    other => panic!("Expected eq, got {:?}", other),
                }
                assert!(matches!(right.value, Expr::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("Expected or, got {:?}", other),
        }
    }

    #[test]
    fn test_is_null_in_list_and_like() {
        let script = parse_str(
            "select id where name is not null and status not in ('a', 'b') and name not like 'x%';",
        );
        let q = only_query(&script);
        let w = &q.where_clause.as_ref().unwrap().value;
        let Expr::Binary { left, right, .. } = w else {
            panic!("Expected and");
        };
        assert!(matches!(right.value, Expr::Binary { op: BinaryOp::NotLike, .. }));
        let Expr::Binary { left, right, .. } = &left.value else {
            panic!("Expected and");
        };
        assert!(matches!(left.value, Expr::IsNull { negated: true, .. }));
        assert!(matches!(right.value, Expr::InList { negated: true, .. }));
    }

    #[test]
    fn test_aggregate_by_and_count_star() {
        let script = parse_str("select count(*) by customer.id, sum(x) by (a.id, b.id);");
        let q = only_query(&script);
        match &q.selects[0].expr.value {
            Expr::Aggregate { func, arg, by } => {
                assert_eq!(*func, AggregateFunc::Count);
                assert!(arg.is_none());
                assert_eq!(by[0].value, path("customer.id"));
            }
            other => panic!("Expected aggregate, got {:?}", other),
        }
        match &q.selects[1].expr.value {
            Expr::Aggregate { by, .. } => assert_eq!(by.len(), 2),
            other => panic!("Expected aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_and_function() {
        let script = parse_str("select upper(name), price::int;");
        let q = only_query(&script);
        assert!(matches!(&q.selects[0].expr.value, Expr::Function { name, args } if name == "upper" && args.len() == 1));
        assert!(matches!(
            q.selects[1].expr.value,
            Expr::Cast { data_type: DataType::Int, .. }
        ));
    }

    #[test]
    fn test_integer_overflow_is_error() {
        let (_, errors) = try_parse_str("select 99999999999999999999;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].expected.contains("64-bit"));
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    #[test]
    fn test_recovers_after_missing_semicolon() {
        let (script, errors) = try_parse_str("key id int\nkey name string;\nkey other int;");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].expected, "`;`");
        assert_eq!(errors[0].found, "`key`");
        assert_eq!(script.statements.len(), 1);
        assert_eq!(only_concept(&script).name.value, "other");
    }

    #[test]
    fn test_collects_one_error_per_statement() {
        let source = "key id int;\nselect ;\nkey ok int;\ndatasource (a: b);\nselect id;";
        let (script, errors) = try_parse_str(source);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].expected, "expression");
        assert_eq!(errors[0].found, "`;`");
        assert_eq!(errors[1].expected, "datasource name");
        assert_eq!(script.statements.len(), 3);
    }

    #[test]
    fn test_error_at_end_of_input() {
        let (_, errors) = try_parse_str("select id");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].found, "end of input");
        assert_eq!(errors[0].span, 9..9);
    }

    #[test]
    fn test_statement_spans() {
        let script = parse_str("key id int;  select id;");
        assert_eq!(script.statements[0].span, 0..11);
        assert_eq!(script.statements[1].span, 13..23);
    }
}
