pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod emit;
pub mod engine;
pub mod instrument;
pub mod normalize;
pub mod policy;
pub mod runtime;
pub mod scope;

mod util;
