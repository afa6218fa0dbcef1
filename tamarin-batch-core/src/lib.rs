//! Core engine for batch execution of an external symbolic-protocol prover.
//!
//! This crate implements the hard-engineering center of a batch runner:
//! recipe loading and unit expansion with inheritance, lemma discovery,
//! a resource-aware scheduler, a process supervisor with two-level
//! cancellation, a content-addressed result cache, an output parser and
//! the execution-report assembler. Surrounding facilities (interactive
//! recipe generation, terminal rendering, report-to-document formatting)
//! are out of scope; only the contracts they would consume are exposed.

pub mod accountant;
pub mod cache;
pub mod compat;
pub mod expand;
pub mod lemma;
pub mod output_layout;
pub mod parse;
pub mod preflight;
pub mod recipe;
pub mod report;
pub mod resources;
pub mod scheduler;
pub mod supervisor;
pub mod unit;

pub use recipe::{Recipe, RecipeError};
pub use report::Batch;
pub use scheduler::{Scheduler, SchedulingPolicy, ShutdownHandle};
pub use unit::Unit;
