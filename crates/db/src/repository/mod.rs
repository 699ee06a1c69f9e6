//! Repository functions, one module per table.

pub mod jobs;
