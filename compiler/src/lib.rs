// emc — Ember compiler front end
//
// Library root. Source text flows through a memoized query database:
// parse → item tree → untyped graph → inference → typed graph, with
// per-function control-flow graphs and initialization analysis alongside.
// `session::Session` is the entry point for embedders and the CLI.

pub mod ast;
pub mod cfg;
pub mod config;
pub mod dataflow;
pub mod diag;
pub mod dot;
pub mod hir;
pub mod id;
pub mod init_check;
pub mod lexer;
pub mod parser;
pub mod queries;
pub mod query;
pub mod resolve;
pub mod session;
pub mod source;
pub mod thir;
pub mod type_infer;
pub mod types;
pub mod unify;
