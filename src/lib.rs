//! nanocc: a tiny educational C compiler targeting x86-64.
//!
//! The library exposes the compilation pipeline; the binary in `main.rs` is
//! a thin driver that owns all file I/O and argument handling.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod compiler;

pub use compiler::{Diagnostic, Options, Stage, compile};
