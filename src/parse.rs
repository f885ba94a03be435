//! Module defining the recursive-descent parser.
//!
//! Expressions use Pratt binding powers; object bodies are parsed into
//! generator member nodes executed later in source order. Frame slots for
//! parameters, `let`-bindings and `for`-bindings are allocated here by stack
//! discipline, so compiled bodies address their bindings by small integers.

use crate::ast::{
    BinaryOp, CallExpr, ClassDecl, Expr, ExtendsOrAmends, FnLiteral, Ident, ImportDecl, LetExpr,
    MemberNode, ModuleAst, ModuleDecl, NewExpr, ObjBody, Param, ReadMode, StringSegment,
    TypeAliasDecl,
};
use crate::error_parsing::{ParseError, ParseErrorKind};
use crate::immutable_string::ImmutableString;
use crate::member::{Member, MemberBody, MemberKind, Modifiers};
use crate::token::{Lexer, Span, SpannedToken, Token};
use crate::typecheck::{Constraint, TypeNode};
use crate::{Identifier, Shared, StaticVec};
use std::collections::HashMap;

type PERR = ParseErrorKind;

/// Maximum levels of expression nesting.
const MAX_EXPR_DEPTH: usize = 128;

/// A type that encapsulates the current state of the parser.
#[derive(Debug, Default)]
struct ParseState {
    /// Local binding stack: parameters, `let`-bindings and `for`-bindings.
    /// A binding's frame slot is its index in this stack.
    locals: Vec<Identifier>,
    /// Type aliases seen so far, substituted during type parsing.
    aliases: HashMap<Identifier, Shared<TypeNode>>,
}

impl ParseState {
    /// Find a binding by name, innermost first, returning its frame slot.
    fn access_var(&self, name: &str) -> Option<u16> {
        self.locals
            .iter()
            .rposition(|n| n == name)
            .map(|i| i as u16)
    }
    /// Current binding depth, i.e. the next slot to be allocated.
    #[inline(always)]
    fn depth(&self) -> u16 {
        self.locals.len() as u16
    }
}

/// The parser over a token stream.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    src: &'a str,
    current: SpannedToken,
    peeked: Option<SpannedToken>,
    state: ParseState,
    level: usize,
}

/// Parse a whole module.
pub fn parse_module_source(src: &str) -> Result<ModuleAst, ParseError> {
    Parser::new(src).parse_module()
}

/// Parse a single expression, e.g. a REPL input.
pub fn parse_expression_source(src: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(src);
    let expr = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        let mut lexer = Lexer::new(src);
        let current = lexer.next_token();
        Self {
            lexer,
            src,
            current,
            peeked: None,
            state: ParseState::default(),
            level: 0,
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    /// Advance to the next token, returning the one stepped over.
    fn bump(&mut self) -> SpannedToken {
        let next = self
            .peeked
            .take()
            .unwrap_or_else(|| self.lexer.next_token());
        std::mem::replace(&mut self.current, next)
    }

    /// Peek one token past the current one.
    fn peek_second(&mut self) -> &SpannedToken {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token());
        }
        self.peeked.as_ref().expect("just filled")
    }

    #[inline(always)]
    fn span(&self) -> Span {
        self.current.span
    }

    /// Is the current token on the same line as the previous one?
    #[inline(always)]
    fn same_line(&self) -> bool {
        self.current.new_lines == 0
    }

    /// Fail on a lexer error embedded in the stream.
    fn check_lex_error(&self) -> Result<(), ParseError> {
        if let Token::LexError(err) = &self.current.token {
            return Err(err.as_ref().clone().into_err(self.span()));
        }
        Ok(())
    }

    fn eat(&mut self, token: &Token) -> bool {
        if &self.current.token == token {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<Span, ParseError> {
        self.check_lex_error()?;
        if self.current.token == token {
            Ok(self.bump().span)
        } else if matches!(self.current.token, Token::Eof) {
            Err(PERR::UnexpectedEof.into_err(self.span()))
        } else {
            Err(
                PERR::MissingToken(token.syntax().to_string(), context.to_string())
                    .into_err(self.span()),
            )
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        self.check_lex_error()?;
        match self.current.token {
            Token::Eof => Ok(()),
            _ => Err(PERR::MissingSymbol(format!(
                "unexpected trailing input: {}",
                self.current.token.syntax()
            ))
            .into_err(self.span())),
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<Ident, ParseError> {
        self.check_lex_error()?;
        match &self.current.token {
            Token::Identifier(_) => {
                let st = self.bump();
                match st.token {
                    Token::Identifier(name) => Ok(Ident::new(name, st.span)),
                    _ => unreachable!("matched above"),
                }
            }
            Token::Eof => Err(PERR::UnexpectedEof.into_err(self.span())),
            _ => Err(PERR::MissingSymbol(context.to_string()).into_err(self.span())),
        }
    }

    /// Snapshot the parser for speculative parsing.
    fn snapshot(&self) -> (Lexer<'a>, SpannedToken, Option<SpannedToken>) {
        (self.lexer.clone(), self.current.clone(), self.peeked.clone())
    }
    fn restore(&mut self, snap: (Lexer<'a>, SpannedToken, Option<SpannedToken>)) {
        self.lexer = snap.0;
        self.current = snap.1;
        self.peeked = snap.2;
    }

    /// Skip doc-comment tokens, collecting their text.
    fn take_doc(&mut self) -> Option<String> {
        let mut doc: Option<String> = None;
        while let Token::DocComment(_) = &self.current.token {
            let st = self.bump();
            if let Token::DocComment(text) = st.token {
                match &mut doc {
                    Some(d) => {
                        d.push('\n');
                        d.push_str(&text);
                    }
                    None => doc = Some(text),
                }
            }
        }
        doc
    }

    /// Parse `@Name` / `@Name { ... }` annotations.
    fn parse_annotations(&mut self) -> Result<StaticVec<Expr>, ParseError> {
        let mut annotations = StaticVec::new();
        while matches!(self.current.token, Token::At) {
            let at_span = self.bump().span;
            let name = self.expect_ident("expecting annotation name")?;
            let mut expr = Expr::Ident(Box::new(name));
            if matches!(self.current.token, Token::LeftBrace) && self.same_line() {
                let body = self.parse_object_body()?;
                let span = at_span.union(body.span);
                expr = Expr::Amend(Box::new((expr, body)), span);
            }
            annotations.push(expr);
        }
        Ok(annotations)
    }

    // ------------------------------------------------------------------
    // Module structure
    // ------------------------------------------------------------------

    fn parse_module(&mut self) -> Result<ModuleAst, ParseError> {
        let mut module = ModuleAst::default();
        module.doc = self.take_doc();

        module.decl = self.parse_module_decl()?;

        while matches!(self.current.token, Token::Import | Token::ImportGlob) {
            module.imports.push(self.parse_import()?);
        }

        let mut members = Vec::new();
        loop {
            self.check_lex_error()?;
            while self.eat(&Token::Semicolon) {}
            if matches!(self.current.token, Token::Eof) {
                break;
            }

            let doc = self.take_doc();
            let annotations = self.parse_annotations()?;

            let class_modifier = matches!(self.current.token, Token::Abstract | Token::Open)
                && matches!(self.peek_second().token, Token::Class);

            if matches!(self.current.token, Token::Typealias) {
                module.aliases.push(self.parse_typealias()?);
            } else if matches!(self.current.token, Token::Class) {
                module.classes.push(self.parse_class(doc, Modifiers::NONE)?);
            } else if class_modifier {
                let modifiers = self.parse_modifiers()?;
                module.classes.push(self.parse_class(doc, modifiers)?);
            } else {
                members.push(self.parse_property_member(doc, annotations)?);
            }
        }

        module.body = ObjBody {
            members,
            span: Span::new(0, self.src.len()),
        };
        module.span = Span::new(0, self.src.len());
        Ok(module)
    }

    fn parse_module_decl(&mut self) -> Result<Option<ModuleDecl>, ParseError> {
        let start = self.span();
        let mut is_open = false;
        let mut is_abstract = false;

        // `open`/`abstract` only prefix a `module` header.
        if matches!(self.current.token, Token::Open | Token::Abstract)
            && matches!(self.peek_second().token, Token::Module)
        {
            while matches!(self.current.token, Token::Open | Token::Abstract) {
                match self.bump().token {
                    Token::Open => is_open = true,
                    Token::Abstract => is_abstract = true,
                    _ => unreachable!("matched above"),
                }
            }
        }

        let mut name = None;
        let mut clause = None;

        if matches!(self.current.token, Token::Module) {
            self.bump();
            let mut dotted = String::new();
            loop {
                let part = self.expect_ident("expecting module name")?;
                if !dotted.is_empty() {
                    dotted.push('.');
                }
                dotted.push_str(part.as_str());
                if !self.eat(&Token::Dot) {
                    break;
                }
            }
            name = Some(dotted.into());
        }

        match &self.current.token {
            Token::Amends => {
                let kw_span = self.bump().span;
                let (uri, uri_span) = self.parse_string_constant("amends clause")?;
                clause = Some(ExtendsOrAmends::Amends(uri, kw_span.union(uri_span)));
            }
            Token::Extends => {
                let kw_span = self.bump().span;
                let (uri, uri_span) = self.parse_string_constant("extends clause")?;
                clause = Some(ExtendsOrAmends::Extends(uri, kw_span.union(uri_span)));
            }
            _ => (),
        }

        if name.is_none() && clause.is_none() && !is_open && !is_abstract {
            return Ok(None);
        }
        Ok(Some(ModuleDecl {
            is_open,
            is_abstract,
            name,
            clause,
            span: start.union(self.span()),
        }))
    }

    fn parse_import(&mut self) -> Result<ImportDecl, ParseError> {
        let glob = matches!(self.current.token, Token::ImportGlob);
        let kw_span = self.bump().span;
        let (uri, uri_span) = self.parse_string_constant("import declaration")?;
        let alias = if self.eat(&Token::As) {
            self.expect_ident("expecting import alias")?
        } else {
            // Default alias: the URI's stem.
            let stem = uri
                .as_str()
                .rsplit('/')
                .next()
                .unwrap_or_else(|| uri.as_str())
                .trim_end_matches(".pkl");
            Ident::new(stem, uri_span)
        };
        Ok(ImportDecl {
            uri,
            alias,
            glob,
            span: kw_span.union(uri_span),
        })
    }

    /// A plain (non-interpolated, single-line) string literal.
    fn parse_string_constant(
        &mut self,
        context: &str,
    ) -> Result<(ImmutableString, Span), ParseError> {
        let expr = self.parse_primary()?;
        match expr {
            Expr::StringConstant(s, span) => Ok((s, span)),
            other => Err(PERR::MismatchedType(
                format!("a constant string in {}", context),
                "an expression".to_string(),
            )
            .into_err(other.span())),
        }
    }

    fn parse_typealias(&mut self) -> Result<TypeAliasDecl, ParseError> {
        let kw_span = self.bump().span;
        let name = self.expect_ident("expecting type alias name")?;
        self.expect(Token::Equals, "after type alias name")?;
        let ty = Shared::new(self.parse_type()?);
        self.state.aliases.insert(name.name.clone(), ty.clone());
        let span = kw_span.union(self.span());
        Ok(TypeAliasDecl { name, ty, span })
    }

    fn parse_modifiers(&mut self) -> Result<Modifiers, ParseError> {
        let mut modifiers = Modifiers::NONE;
        loop {
            let flag = match self.current.token {
                Token::Abstract => Modifiers::ABSTRACT,
                Token::Open => Modifiers::OPEN,
                Token::Local => Modifiers::LOCAL,
                Token::Hidden => Modifiers::HIDDEN,
                Token::Fixed => Modifiers::FIXED,
                Token::Const => Modifiers::CONST,
                Token::External => Modifiers::EXTERNAL,
                _ => return Ok(modifiers),
            };
            if modifiers.contains(flag) {
                return Err(
                    PERR::BadModifier(self.current.token.syntax().to_string())
                        .into_err(self.span()),
                );
            }
            self.bump();
            modifiers.insert(flag);
        }
    }

    fn parse_class(&mut self, doc: Option<String>, modifiers: Modifiers) -> Result<ClassDecl, ParseError> {
        let kw_span = self.expect(Token::Class, "to declare a class")?;
        let name = self.expect_ident("expecting class name")?;
        let parent = if self.eat(&Token::Extends) {
            Some(self.expect_ident("expecting parent class name")?)
        } else {
            None
        };

        self.expect(Token::LeftBrace, "to start the class body")?;
        let mut members = Vec::new();
        loop {
            self.check_lex_error()?;
            while self.eat(&Token::Semicolon) {}
            if self.eat(&Token::RightBrace) {
                break;
            }
            if matches!(self.current.token, Token::Eof) {
                return Err(PERR::UnexpectedEof.into_err(self.span()));
            }
            let doc = self.take_doc();
            let annotations = self.parse_annotations()?;
            match self.parse_property_member(doc, annotations)? {
                MemberNode::Property(m) | MemberNode::Method(m) | MemberNode::Local(m) => {
                    members.push(m)
                }
                other => {
                    return Err(PERR::PropertyExpected.into_err(other.span()));
                }
            }
        }

        Ok(ClassDecl {
            name,
            is_open: modifiers.contains(Modifiers::OPEN),
            is_abstract: modifiers.contains(Modifiers::ABSTRACT),
            parent,
            members,
            doc,
            span: kw_span.union(self.span()),
        })
    }

    // ------------------------------------------------------------------
    // Object bodies
    // ------------------------------------------------------------------

    fn parse_object_body(&mut self) -> Result<ObjBody, ParseError> {
        let open_span = self.expect(Token::LeftBrace, "to start the object body")?;
        let members = self.parse_member_nodes()?;
        let close_span = self.expect(Token::RightBrace, "to close the object body")?;
        Ok(ObjBody {
            members,
            span: open_span.union(close_span),
        })
    }

    /// Member nodes up to, but not consuming, the closing `}`.
    fn parse_member_nodes(&mut self) -> Result<Vec<MemberNode>, ParseError> {
        let mut members = Vec::new();
        loop {
            self.check_lex_error()?;
            while self.eat(&Token::Semicolon) {}
            if matches!(self.current.token, Token::RightBrace) {
                return Ok(members);
            }
            if matches!(self.current.token, Token::Eof) {
                return Err(PERR::UnexpectedEof.into_err(self.span()));
            }
            members.push(self.parse_member_node()?);
        }
    }

    fn parse_member_node(&mut self) -> Result<MemberNode, ParseError> {
        let doc = self.take_doc();
        let annotations = self.parse_annotations()?;

        if matches!(self.current.token, Token::For) {
            return self.parse_for_node();
        }
        if matches!(self.current.token, Token::When) {
            return self.parse_when_node();
        }
        if matches!(self.current.token, Token::Ellipsis | Token::EllipsisQuestion) {
            let nullable = matches!(self.current.token, Token::EllipsisQuestion);
            let kw_span = self.bump().span;
            let expr = self.parse_expr()?;
            let span = kw_span.union(expr.span());
            return Ok(MemberNode::Spread {
                expr,
                nullable,
                span,
            });
        }
        if matches!(self.current.token, Token::LeftBracket) {
            return if matches!(self.peek_second().token, Token::LeftBracket) {
                self.parse_predicate_node(doc)
            } else {
                self.parse_entry_node(doc)
            };
        }
        // A property, method, local or element.
        self.parse_property_or_element(doc, annotations)
    }

    fn parse_for_node(&mut self) -> Result<MemberNode, ParseError> {
        let kw_span = self.bump().span;
        self.expect(Token::LeftParen, "after 'for'")?;

        let first = self.expect_ident("expecting a binding name")?;
        let first_ty = if self.eat(&Token::Colon) {
            Some(Shared::new(self.parse_type()?))
        } else {
            None
        };
        let second = if self.eat(&Token::Comma) {
            let name = self.expect_ident("expecting a binding name")?;
            let ty = if self.eat(&Token::Colon) {
                Some(Shared::new(self.parse_type()?))
            } else {
                None
            };
            Some((name, ty))
        } else {
            None
        };
        self.expect(Token::In, "in the 'for' header")?;

        // The iterable cannot see the bindings.
        let iterable = self.parse_expr()?;
        let close_span = self.expect(Token::RightParen, "to close the 'for' header")?;

        let (key_var, value_var) = match second {
            Some((value_name, value_ty)) => {
                let key_slot = self.state.depth();
                self.state.locals.push(first.name.clone());
                let value_slot = self.state.depth();
                self.state.locals.push(value_name.name.clone());
                (
                    Some(Param {
                        name: first,
                        slot: key_slot,
                        ty: first_ty,
                    }),
                    Param {
                        name: value_name,
                        slot: value_slot,
                        ty: value_ty,
                    },
                )
            }
            None => {
                let value_slot = self.state.depth();
                self.state.locals.push(first.name.clone());
                (
                    None,
                    Param {
                        name: first,
                        slot: value_slot,
                        ty: first_ty,
                    },
                )
            }
        };

        self.expect(Token::LeftBrace, "to start the 'for' body")?;
        let body = self.parse_member_nodes()?;
        self.expect(Token::RightBrace, "to close the 'for' body")?;

        // Pop the bindings.
        self.state.locals.pop();
        if key_var.is_some() {
            self.state.locals.pop();
        }

        Ok(MemberNode::For {
            key_var,
            value_var,
            iterable,
            body,
            span: kw_span.union(close_span),
        })
    }

    fn parse_when_node(&mut self) -> Result<MemberNode, ParseError> {
        let kw_span = self.bump().span;
        self.expect(Token::LeftParen, "after 'when'")?;
        let cond = self.parse_expr()?;
        let close_span = self.expect(Token::RightParen, "to close the 'when' condition")?;

        self.expect(Token::LeftBrace, "to start the 'when' body")?;
        let then = self.parse_member_nodes()?;
        self.expect(Token::RightBrace, "to close the 'when' body")?;

        let otherwise = if self.eat(&Token::Else) {
            self.expect(Token::LeftBrace, "to start the 'else' body")?;
            let nodes = self.parse_member_nodes()?;
            self.expect(Token::RightBrace, "to close the 'else' body")?;
            nodes
        } else {
            Vec::new()
        };

        Ok(MemberNode::When {
            cond,
            then,
            otherwise,
            span: kw_span.union(close_span),
        })
    }

    fn parse_entry_node(&mut self, doc: Option<String>) -> Result<MemberNode, ParseError> {
        let open_span = self.bump().span;
        let key = self.parse_expr()?;
        let close_span = self.expect(Token::RightBracket, "to close the entry key")?;
        let header_span = open_span.union(close_span);

        let body = self.parse_member_body("entry")?;
        let mut member = Member::new(MemberKind::Entry, None, body, header_span);
        member.frame_depth = self.state.depth();
        member.doc = doc;
        Ok(MemberNode::Entry(Shared::new(key), Shared::new(member)))
    }

    fn parse_predicate_node(&mut self, doc: Option<String>) -> Result<MemberNode, ParseError> {
        let open_span = self.bump().span;
        self.expect(Token::LeftBracket, "to open the member predicate")?;
        let pred = self.parse_expr()?;
        self.expect(Token::RightBracket, "to close the member predicate")?;
        let close_span = self.expect(Token::RightBracket, "to close the member predicate")?;
        let header_span = open_span.union(close_span);

        let body = self.parse_member_body("member predicate")?;
        let mut member = Member::new(MemberKind::Entry, None, body, header_span);
        member.frame_depth = self.state.depth();
        member.doc = doc;
        Ok(MemberNode::Predicate(Shared::new(pred), Shared::new(member)))
    }

    /// `= expr` or `{ body }` after a member header.
    fn parse_member_body(&mut self, what: &str) -> Result<MemberBody, ParseError> {
        if self.eat(&Token::Equals) {
            Ok(MemberBody::Expr(Shared::new(self.parse_expr()?)))
        } else if matches!(self.current.token, Token::LeftBrace) {
            Ok(MemberBody::Object(Shared::new(self.parse_object_body()?)))
        } else {
            Err(
                PERR::MissingToken("=".to_string(), format!("to define the {}", what))
                    .into_err(self.span()),
            )
        }
    }

    /// A property (`name [: Type] = expr` / `name { ... }`), a method, a
    /// local, or - failing all of those - an element expression.
    fn parse_property_or_element(
        &mut self,
        doc: Option<String>,
        annotations: StaticVec<Expr>,
    ) -> Result<MemberNode, ParseError> {
        let leading_modifiers = matches!(
            self.current.token,
            Token::Local | Token::Hidden | Token::Fixed | Token::Const
        );
        if leading_modifiers || matches!(self.current.token, Token::Function) {
            return self.parse_property_member(doc, annotations);
        }

        if matches!(self.current.token, Token::Identifier(_)) {
            // `name =`, `name :`, `name {` (same line) start a property.
            let starts_property = {
                let second = self.peek_second();
                match second.token {
                    Token::Equals | Token::Colon => true,
                    Token::LeftBrace => second.new_lines == 0,
                    _ => false,
                }
            };
            if starts_property {
                return self.parse_property_member(doc, annotations);
            }
        }

        // An element.
        let expr = self.parse_expr()?;
        let span = expr.span();
        let mut member = Member::new(
            MemberKind::Element,
            None,
            MemberBody::Expr(Shared::new(expr)),
            span,
        );
        member.frame_depth = self.state.depth();
        member.doc = doc;
        Ok(MemberNode::Element(Shared::new(member)))
    }

    /// A property, method or local declaration (shared by object bodies,
    /// class bodies and the module body).
    fn parse_property_member(
        &mut self,
        doc: Option<String>,
        annotations: StaticVec<Expr>,
    ) -> Result<MemberNode, ParseError> {
        let modifiers = self.parse_modifiers()?;

        if matches!(self.current.token, Token::Function) {
            return self.parse_method(doc, annotations, modifiers);
        }

        let name = self.expect_ident("expecting a member name")?;
        let header_span = name.span;

        let ty = if self.eat(&Token::Colon) {
            Some(Shared::new(self.parse_type()?))
        } else {
            None
        };

        let body = if self.eat(&Token::Equals) {
            MemberBody::Expr(Shared::new(self.parse_expr()?))
        } else if matches!(self.current.token, Token::LeftBrace) && self.same_line() {
            MemberBody::Object(Shared::new(self.parse_object_body()?))
        } else if ty.is_some() {
            // `name: Type` without a value: defined but unassigned.
            MemberBody::Undefined
        } else {
            return Err(PERR::MissingToken(
                "=".to_string(),
                format!("to define property '{}'", name.as_str()),
            )
            .into_err(self.span()));
        };

        let kind = if modifiers.contains(Modifiers::LOCAL) {
            MemberKind::Local
        } else {
            MemberKind::Property
        };
        let mut member = Member::new(kind, Some(name.name.clone()), body, header_span);
        member.modifiers = modifiers;
        member.ty = ty;
        member.annotations = annotations;
        member.frame_depth = self.state.depth();
        member.doc = doc;

        let member = Shared::new(member);
        Ok(if kind == MemberKind::Local {
            MemberNode::Local(member)
        } else {
            MemberNode::Property(member)
        })
    }

    fn parse_method(
        &mut self,
        doc: Option<String>,
        annotations: StaticVec<Expr>,
        modifiers: Modifiers,
    ) -> Result<MemberNode, ParseError> {
        let kw_span = self.bump().span;
        let name = self.expect_ident("expecting a method name")?;
        self.expect(Token::LeftParen, "to start the parameter list")?;

        let base_depth = self.state.depth();
        let mut params = StaticVec::new();
        if !matches!(self.current.token, Token::RightParen) {
            loop {
                let param_name = self.expect_ident("expecting a parameter name")?;
                let ty = if self.eat(&Token::Colon) {
                    Some(Shared::new(self.parse_type()?))
                } else {
                    None
                };
                let slot = self.state.depth();
                self.state.locals.push(param_name.name.clone());
                params.push(Param {
                    name: param_name,
                    slot,
                    ty,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
                // Trailing comma.
                if matches!(self.current.token, Token::RightParen) {
                    break;
                }
            }
        }
        self.expect(Token::RightParen, "to close the parameter list")?;

        let ret_ty = if self.eat(&Token::Colon) {
            Some(Shared::new(self.parse_type()?))
        } else {
            None
        };

        self.expect(Token::Equals, "to define the method body")?;
        let body = self.parse_expr()?;

        self.state.locals.truncate(base_depth as usize);

        let header_span = kw_span.union(name.span);
        let mut member = Member::new(
            MemberKind::Method,
            Some(name.name.clone()),
            MemberBody::Expr(Shared::new(body)),
            header_span,
        );
        member.modifiers = modifiers;
        member.ty = ret_ty;
        member.params = params;
        member.annotations = annotations;
        member.frame_depth = base_depth;
        member.doc = doc;

        let member = Shared::new(member);
        Ok(if modifiers.contains(Modifiers::LOCAL) {
            MemberNode::Local(member)
        } else {
            MemberNode::Method(member)
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Parse a full expression.
    pub(crate) fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.level += 1;
        if self.level > MAX_EXPR_DEPTH {
            return Err(PERR::ExprTooDeep.into_err(self.span()));
        }
        let result = self.parse_binary(0);
        self.level -= 1;
        result
    }

    /// Left binding power of the current infix operator, with its
    /// associativity-adjusted right power.
    fn infix_power(token: &Token) -> Option<(BinaryOp, u8, u8)> {
        Some(match token {
            Token::StarStar => (BinaryOp::Pow, 100, 99),
            Token::Star => (BinaryOp::Multiply, 90, 91),
            Token::Slash => (BinaryOp::Divide, 90, 91),
            Token::TildeSlash => (BinaryOp::IntDivide, 90, 91),
            Token::Percent => (BinaryOp::Modulo, 90, 91),
            Token::Plus => (BinaryOp::Add, 80, 81),
            Token::Minus => (BinaryOp::Subtract, 80, 81),
            Token::LessThan => (BinaryOp::LessThan, 70, 71),
            Token::LessThanEquals => (BinaryOp::LessThanEquals, 70, 71),
            Token::GreaterThan => (BinaryOp::GreaterThan, 70, 71),
            Token::GreaterThanEquals => (BinaryOp::GreaterThanEquals, 70, 71),
            Token::EqualsEquals => (BinaryOp::Equals, 60, 61),
            Token::NotEquals => (BinaryOp::NotEquals, 60, 61),
            Token::And => (BinaryOp::And, 50, 51),
            Token::Or => (BinaryOp::Or, 40, 41),
            Token::PipeGreater => (BinaryOp::Pipe, 30, 31),
            Token::QuestionQuestion => (BinaryOp::NullCoalesce, 20, 19),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;

        loop {
            self.check_lex_error()?;

            // `is` / `as` sit between comparisons and equality.
            if matches!(self.current.token, Token::Is | Token::As) && min_bp <= 65 {
                let is_test = matches!(self.current.token, Token::Is);
                self.bump();
                let ty = Shared::new(self.parse_type()?);
                let span = lhs.span().union(self.span());
                lhs = if is_test {
                    Expr::Is(Box::new((lhs, ty)), span)
                } else {
                    Expr::As(Box::new((lhs, ty)), span)
                };
                continue;
            }

            let (op, left_bp, right_bp) = match Self::infix_power(&self.current.token) {
                Some(entry) => entry,
                None => return Ok(lhs),
            };
            if left_bp < min_bp {
                return Ok(lhs);
            }
            self.bump();
            let rhs = self.parse_binary(right_bp)?;
            let span = lhs.span().union(rhs.span());
            lhs = Expr::Binary(op, Box::new((lhs, rhs)), span);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.current.token {
            Token::Minus => {
                let op_span = self.bump().span;
                let operand = self.parse_unary()?;
                let span = op_span.union(operand.span());
                Ok(Expr::Neg(Box::new(operand), span))
            }
            Token::Bang => {
                let op_span = self.bump().span;
                let operand = self.parse_unary()?;
                let span = op_span.union(operand.span());
                Ok(Expr::Not(Box::new(operand), span))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            self.check_lex_error()?;
            match &self.current.token {
                // Member access may continue on the next line.
                Token::Dot | Token::QuestionDot => {
                    let null_safe = matches!(self.current.token, Token::QuestionDot);
                    self.bump();
                    let name = self.expect_ident("expecting a member name after '.'")?;
                    let span = expr.span().union(name.span);
                    expr = Expr::Dot(Box::new((expr, name)), null_safe, span);
                }
                // Calls, subscripts and amending bodies must stay on the
                // same line as their receiver.
                Token::LeftParen if self.same_line() => {
                    self.bump();
                    let mut args = StaticVec::new();
                    if !matches!(self.current.token, Token::RightParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                            if matches!(self.current.token, Token::RightParen) {
                                break;
                            }
                        }
                    }
                    let close = self.expect(Token::RightParen, "to close the argument list")?;
                    let span = expr.span().union(close);
                    expr = Expr::Call(Box::new(CallExpr { target: expr, args }), span);
                }
                Token::LeftBracket if self.same_line() => {
                    self.bump();
                    let index = self.parse_expr()?;
                    let close = self.expect(Token::RightBracket, "to close the subscript")?;
                    let span = expr.span().union(close);
                    expr = Expr::Index(Box::new((expr, index)), span);
                }
                Token::LeftBrace if self.same_line() && Self::can_amend(&expr) => {
                    let body = self.parse_object_body()?;
                    let span = expr.span().union(body.span);
                    expr = Expr::Amend(Box::new((expr, body)), span);
                }
                Token::BangBang => {
                    let op_span = self.bump().span;
                    let span = expr.span().union(op_span);
                    expr = Expr::NonNull(Box::new(expr), span);
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Which expressions may be followed by an amending `{ ... }`.
    fn can_amend(expr: &Expr) -> bool {
        matches!(
            expr,
            Expr::Ident(_)
                | Expr::Slot(_, _)
                | Expr::Dot(_, _, _)
                | Expr::SuperDot(_, _)
                | Expr::This(_)
                | Expr::Outer(_)
                | Expr::ModuleRef(_)
                | Expr::Amend(_, _)
                | Expr::New(_, _)
                | Expr::Paren(_, _)
        )
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.check_lex_error()?;
        let span = self.span();

        match &self.current.token {
            Token::Null => {
                self.bump();
                Ok(Expr::Null(span))
            }
            Token::True => {
                self.bump();
                Ok(Expr::BoolConstant(true, span))
            }
            Token::False => {
                self.bump();
                Ok(Expr::BoolConstant(false, span))
            }
            Token::IntConstant(_) => {
                let st = self.bump();
                match st.token {
                    Token::IntConstant(n) => Ok(Expr::IntConstant(n, span)),
                    _ => unreachable!("matched above"),
                }
            }
            Token::FloatConstant(_) => {
                let st = self.bump();
                match st.token {
                    Token::FloatConstant(f) => Ok(Expr::FloatConstant(f, span)),
                    _ => unreachable!("matched above"),
                }
            }
            Token::StringStart { .. } => self.parse_string_literal(),
            Token::This => {
                self.bump();
                Ok(Expr::This(span))
            }
            Token::Outer => {
                self.bump();
                Ok(Expr::Outer(span))
            }
            Token::Module => {
                self.bump();
                Ok(Expr::ModuleRef(span))
            }
            Token::Super => {
                self.bump();
                if self.eat(&Token::Dot) {
                    let name = self.expect_ident("expecting a member name after 'super.'")?;
                    let full = span.union(name.span);
                    Ok(Expr::SuperDot(Box::new(name), full))
                } else if self.eat(&Token::LeftBracket) {
                    let key = self.parse_expr()?;
                    let close = self.expect(Token::RightBracket, "to close the subscript")?;
                    Ok(Expr::SuperIndex(Box::new(key), span.union(close)))
                } else {
                    Err(PERR::MissingToken(
                        ".".to_string(),
                        "after 'super'".to_string(),
                    )
                    .into_err(self.span()))
                }
            }
            Token::If => self.parse_if(),
            Token::Let => self.parse_let(),
            Token::New => self.parse_new(),
            Token::Throw => {
                self.bump();
                self.expect(Token::LeftParen, "after 'throw'")?;
                let inner = self.parse_expr()?;
                let close = self.expect(Token::RightParen, "to close 'throw'")?;
                Ok(Expr::Throw(Box::new(inner), span.union(close)))
            }
            Token::Trace => {
                self.bump();
                self.expect(Token::LeftParen, "after 'trace'")?;
                let inner = self.parse_expr()?;
                let close = self.expect(Token::RightParen, "to close 'trace'")?;
                Ok(Expr::Trace(Box::new(inner), span.union(close)))
            }
            Token::Read | Token::ReadOrNull | Token::ReadGlob => {
                let mode = match self.current.token {
                    Token::Read => ReadMode::Required,
                    Token::ReadOrNull => ReadMode::OrNull,
                    _ => ReadMode::Glob,
                };
                self.bump();
                self.expect(Token::LeftParen, "after 'read'")?;
                let inner = self.parse_expr()?;
                let close = self.expect(Token::RightParen, "to close 'read'")?;
                Ok(Expr::ReadValue(Box::new(inner), mode, span.union(close)))
            }
            Token::Import | Token::ImportGlob => {
                let glob = matches!(self.current.token, Token::ImportGlob);
                self.bump();
                self.expect(Token::LeftParen, "after 'import'")?;
                let (uri, _) = self.parse_string_constant("import expression")?;
                let close = self.expect(Token::RightParen, "to close 'import'")?;
                Ok(Expr::ImportValue(uri, glob, span.union(close)))
            }
            Token::LeftParen => self.parse_paren_or_lambda(),
            Token::Identifier(_) => {
                let ident = self.expect_ident("expecting an identifier")?;
                match self.state.access_var(ident.as_str()) {
                    Some(slot) => Ok(Expr::Slot(slot, Box::new(ident))),
                    None => Ok(Expr::Ident(Box::new(ident))),
                }
            }
            Token::Eof => Err(PERR::UnexpectedEof.into_err(span)),
            _ => Err(PERR::ExprExpected("a primary".to_string()).into_err(span)),
        }
    }

    fn parse_if(&mut self) -> Result<Expr, ParseError> {
        let kw_span = self.bump().span;
        self.expect(Token::LeftParen, "after 'if'")?;
        let cond = self.parse_expr()?;
        self.expect(Token::RightParen, "to close the 'if' condition")?;
        let then = self.parse_expr()?;
        self.expect(Token::Else, "in the 'if' expression")?;
        let otherwise = self.parse_expr()?;
        let span = kw_span.union(otherwise.span());
        Ok(Expr::If(Box::new((cond, then, otherwise)), span))
    }

    fn parse_let(&mut self) -> Result<Expr, ParseError> {
        let kw_span = self.bump().span;
        self.expect(Token::LeftParen, "after 'let'")?;
        let name = self.expect_ident("expecting a binding name")?;
        let ty = if self.eat(&Token::Colon) {
            Some(Shared::new(self.parse_type()?))
        } else {
            None
        };
        self.expect(Token::Equals, "in the 'let' binding")?;
        // The bound value cannot see the binding.
        let value = self.parse_expr()?;
        self.expect(Token::RightParen, "to close the 'let' binding")?;

        let slot = self.state.depth();
        self.state.locals.push(name.name.clone());
        let body = self.parse_expr();
        self.state.locals.pop();
        let body = body?;

        let span = kw_span.union(body.span());
        Ok(Expr::Let(
            Box::new(LetExpr {
                name,
                slot,
                ty,
                value,
                body,
            }),
            span,
        ))
    }

    fn parse_new(&mut self) -> Result<Expr, ParseError> {
        let kw_span = self.bump().span;
        let ty = if matches!(self.current.token, Token::LeftBrace) {
            None
        } else {
            Some(Shared::new(self.parse_type()?))
        };
        let body = self.parse_object_body()?;
        let span = kw_span.union(body.span);
        Ok(Expr::New(Box::new(NewExpr { ty, body }), span))
    }

    /// `(` starts either a parenthesized expression or a lambda's parameter
    /// list; tell them apart by looking for `->` after the closing paren.
    fn parse_paren_or_lambda(&mut self) -> Result<Expr, ParseError> {
        let snap = self.snapshot();
        match self.try_parse_lambda() {
            Ok(Some(lambda)) => return Ok(lambda),
            Ok(None) | Err(_) => self.restore(snap),
        }

        let open_span = self.bump().span;
        let inner = self.parse_expr()?;
        let close_span = self.expect(Token::RightParen, "to close the parenthesized expression")?;
        Ok(Expr::Paren(Box::new(inner), open_span.union(close_span)))
    }

    /// Speculatively parse `(params) -> expr`. Returns `Ok(None)` when the
    /// input is not a lambda.
    fn try_parse_lambda(&mut self) -> Result<Option<Expr>, ParseError> {
        let open_span = self.bump().span;

        // Scan the parameter list shape without committing.
        let mut names: StaticVec<(Ident, Option<TypeNode>)> = StaticVec::new();
        if !matches!(self.current.token, Token::RightParen) {
            loop {
                let name = match &self.current.token {
                    Token::Identifier(_) => self.expect_ident("expecting a parameter name")?,
                    _ => return Ok(None),
                };
                let ty = if self.eat(&Token::Colon) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                names.push((name, ty));
                if !self.eat(&Token::Comma) {
                    break;
                }
                if matches!(self.current.token, Token::RightParen) {
                    break;
                }
            }
        }
        if !self.eat(&Token::RightParen) {
            return Ok(None);
        }
        if !matches!(self.current.token, Token::Arrow) {
            return Ok(None);
        }
        self.bump();

        let frame_depth = self.state.depth();
        let mut params = StaticVec::new();
        for (name, ty) in names {
            let slot = self.state.depth();
            self.state.locals.push(name.name.clone());
            params.push(Param {
                name,
                slot,
                ty: ty.map(Shared::new),
            });
        }

        let body = self.parse_expr();
        self.state.locals.truncate(frame_depth as usize);
        let body = body?;

        let span = open_span.union(body.span());
        Ok(Some(Expr::Lambda(
            Box::new(FnLiteral {
                params,
                frame_depth,
                body,
            }),
            span,
        )))
    }

    // ------------------------------------------------------------------
    // String literals
    // ------------------------------------------------------------------

    fn parse_string_literal(&mut self) -> Result<Expr, ParseError> {
        let st = self.bump();
        let (multi, start_span) = match st.token {
            Token::StringStart { multi, .. } => (multi, st.span),
            _ => unreachable!("caller checked for StringStart"),
        };

        let mut segments: StaticVec<StringSegment> = StaticVec::new();
        let mut buffer = String::new();
        let end_span;

        loop {
            self.check_lex_error()?;
            match &self.current.token {
                Token::StringPart(_) => {
                    let st = self.bump();
                    if let Token::StringPart(text) = st.token {
                        buffer.push_str(&text);
                    }
                }
                Token::StringEscape(c) => {
                    buffer.push(*c);
                    self.bump();
                }
                Token::StringNewline => {
                    buffer.push('\n');
                    self.bump();
                }
                Token::InterpolationStart => {
                    self.bump();
                    if !buffer.is_empty() {
                        segments.push(StringSegment::Literal(std::mem::take(&mut buffer).into()));
                    }
                    let inner = self.parse_expr()?;
                    // The matching `)` switches the lexer back to string text.
                    self.expect(Token::RightParen, "to close the interpolation")?;
                    segments.push(StringSegment::Interpolated(inner));
                }
                Token::StringEnd => {
                    end_span = self.bump().span;
                    break;
                }
                Token::Eof => return Err(PERR::UnexpectedEof.into_err(self.span())),
                _ => {
                    return Err(PERR::MissingSymbol("expecting string content".to_string())
                        .into_err(self.span()))
                }
            }
        }
        if !buffer.is_empty() || segments.is_empty() {
            segments.push(StringSegment::Literal(buffer.into()));
        }

        let span = start_span.union(end_span);
        if multi {
            segments = strip_margin(segments);
        }

        if segments.len() == 1 {
            if let StringSegment::Literal(text) = &segments[0] {
                return Ok(Expr::StringConstant(text.clone(), span));
            }
        }
        Ok(Expr::InterpolatedString(Box::new(segments), span))
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> Result<TypeNode, ParseError> {
        let mut alternatives: StaticVec<Shared<TypeNode>> = StaticVec::new();
        alternatives.push(Shared::new(self.parse_single_type()?));
        // Unions associate right at parse; the list is flat already.
        while self.eat(&Token::Pipe) {
            alternatives.push(Shared::new(self.parse_single_type()?));
        }
        if alternatives.len() == 1 {
            let only = alternatives.pop().expect("one alternative");
            return Ok(Shared::try_unwrap(only).unwrap_or_else(|shared| (*shared).clone()));
        }
        Ok(TypeNode::Union(alternatives))
    }

    fn parse_single_type(&mut self) -> Result<TypeNode, ParseError> {
        let mut ty = self.parse_atomic_type()?;

        loop {
            match &self.current.token {
                Token::Question => {
                    self.bump();
                    ty = TypeNode::Nullable(Shared::new(ty));
                }
                // Constraints: `Type(expr, ...)` on the same line.
                Token::LeftParen if self.same_line() => {
                    self.bump();
                    let mut constraints = StaticVec::new();
                    loop {
                        let start = self.span();
                        let expr = self.parse_expr()?;
                        let span = start.union(expr.span());
                        let text: ImmutableString = self
                            .src
                            .get(span.start()..span.end())
                            .unwrap_or("")
                            .into();
                        constraints.push(Constraint {
                            expr: Shared::new(expr),
                            text,
                            span,
                        });
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RightParen, "to close the type constraints")?;
                    ty = TypeNode::Constrained {
                        base: Shared::new(ty),
                        constraints,
                    };
                }
                _ => return Ok(ty),
            }
        }
    }

    fn parse_atomic_type(&mut self) -> Result<TypeNode, ParseError> {
        let span = self.span();
        match &self.current.token {
            // A function type `(A, B) -> R`, or a parenthesized type.
            Token::LeftParen => {
                self.bump();
                let mut params: StaticVec<Shared<TypeNode>> = StaticVec::new();
                if !matches!(self.current.token, Token::RightParen) {
                    loop {
                        params.push(Shared::new(self.parse_type()?));
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                        if matches!(self.current.token, Token::RightParen) {
                            break;
                        }
                    }
                }
                self.expect(Token::RightParen, "to close the type")?;
                if self.eat(&Token::Arrow) {
                    let ret = Shared::new(self.parse_type()?);
                    return Ok(TypeNode::Function { params, ret });
                }
                if params.len() == 1 {
                    let only = params.pop().expect("one type");
                    return Ok(Shared::try_unwrap(only).unwrap_or_else(|shared| (*shared).clone()));
                }
                Err(PERR::TypeExpected.into_err(span))
            }
            Token::StringStart { .. } => {
                let literal = self.parse_string_literal()?;
                match literal {
                    Expr::StringConstant(text, _) => Ok(TypeNode::StringConstant(text)),
                    other => Err(PERR::MismatchedType(
                        "a constant string type".to_string(),
                        "an interpolated string".to_string(),
                    )
                    .into_err(other.span())),
                }
            }
            Token::Module => {
                self.bump();
                Ok(TypeNode::ModuleTy)
            }
            Token::Identifier(_) => {
                let is_unknown =
                    matches!(&self.current.token, Token::Identifier(n) if n.as_str() == "unknown");
                let is_nothing =
                    matches!(&self.current.token, Token::Identifier(n) if n.as_str() == "nothing");
                if is_unknown {
                    self.bump();
                    Ok(TypeNode::Unknown)
                } else if is_nothing {
                    self.bump();
                    Ok(TypeNode::Nothing)
                } else {
                    let mut name = self.expect_ident("expecting a type name")?;
                    // Qualified name `mod.Type`: keep the last segment, the
                    // runtime resolves through the import.
                    while matches!(self.current.token, Token::Dot) {
                        self.bump();
                        name = self.expect_ident("expecting a type name")?;
                    }
                    if let Some(alias) = self.state.aliases.get(&name.name) {
                        return Ok((**alias).clone());
                    }
                    let mut args: StaticVec<Shared<TypeNode>> = StaticVec::new();
                    if self.eat(&Token::LessThan) {
                        loop {
                            args.push(Shared::new(self.parse_type()?));
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                            // Trailing comma.
                            if matches!(self.current.token, Token::GreaterThan) {
                                break;
                            }
                        }
                        self.expect(Token::GreaterThan, "to close the type arguments")?;
                    }
                    Ok(TypeNode::Declared { name, args })
                }
            }
            Token::Eof => Err(PERR::UnexpectedEof.into_err(span)),
            _ => Err(PERR::TypeExpected.into_err(span)),
        }
    }
}

/// Post-process a multi-line string: drop the leading newline, then strip
/// the closing delimiter's indentation margin from every line, dropping the
/// final newline-plus-margin altogether.
fn strip_margin(segments: StaticVec<StringSegment>) -> StaticVec<StringSegment> {
    // The margin is the run of whitespace after the last newline of the
    // final constant segment.
    let margin: String = match segments.last() {
        Some(StringSegment::Literal(text)) => {
            let tail = text.rsplit('\n').next().unwrap_or("");
            if tail.chars().all(|c| c == ' ' || c == '\t') {
                tail.to_string()
            } else {
                String::new()
            }
        }
        _ => String::new(),
    };

    let mut out: StaticVec<StringSegment> = StaticVec::new();
    let last_index = segments.len() - 1;
    let mut at_line_start = false;

    for (i, segment) in segments.into_iter().enumerate() {
        match segment {
            StringSegment::Interpolated(expr) => {
                at_line_start = false;
                out.push(StringSegment::Interpolated(expr));
            }
            StringSegment::Literal(text) => {
                let mut text = text.as_str().to_string();
                // Drop the newline right after the opening quotes.
                if i == 0 && text.starts_with('\n') {
                    text.remove(0);
                    at_line_start = true;
                } else if i == 0 {
                    at_line_start = false;
                }
                // Drop the final newline and the closing margin.
                if i == last_index {
                    if let Some(pos) = text.rfind('\n') {
                        if text[pos + 1..].chars().all(|c| c == ' ' || c == '\t') {
                            text.truncate(pos);
                        }
                    }
                }

                let stripped = strip_margin_from_text(&text, &margin, at_line_start);
                at_line_start = text.ends_with('\n');
                out.push(StringSegment::Literal(stripped.into()));
            }
        }
    }
    out
}

fn strip_margin_from_text(text: &str, margin: &str, strip_first: bool) -> String {
    if margin.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let strip = i > 0 || strip_first;
        if strip {
            out.push_str(line.strip_prefix(margin).unwrap_or(line));
        } else {
            out.push_str(line);
        }
    }
    out
}
