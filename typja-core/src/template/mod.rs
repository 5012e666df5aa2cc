//! Jinja template front end: lexer, parser and syntax tree.

mod ast;
mod lexer;
mod parser;

pub use ast::*;
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;

use crate::errors::TemplateSyntaxError;

pub fn parse_template(source: &str) -> Result<Template, TemplateSyntaxError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse()
}
