mod ast;
mod error;
mod import_path;
mod lexer;
mod module_file;
mod parser;
mod tokens;

pub use ast::Clause;
pub use ast::Comment;
pub use ast::Comprehension;
pub use ast::Decl;
pub use ast::Expr;
pub use ast::Field;
pub use ast::Ident;
pub use ast::ImportSpec;
pub use ast::Label;
pub use ast::LabelKind;
pub use ast::LetClause;
pub use ast::Literal;
pub use ast::LiteralKind;
pub use ast::PackageClause;
pub use ast::SourceFile;
pub use error::SyntaxError;
pub use import_path::split_package_version;
pub use import_path::ImportPath;
pub use module_file::ModuleFile;
pub use module_file::ModuleFileError;
pub use module_file::ModuleDep;
pub use parser::parse;
pub use parser::ParseMode;
pub use parser::ParseOutput;
pub use tokens::Punct;
