//! High-level operations.
//!
//! This module contains the implementation of buildrig commands.

pub mod clean;
pub mod doctor;
pub mod matrix;
pub mod pipeline;

pub use clean::{clean, CleanSelector};
pub use doctor::{doctor, format_report, DoctorReport};
pub use matrix::{expand_matrix, run_matrix, MatrixOptions, MatrixOutcome, MatrixReport};
pub use pipeline::{Pipeline, PipelineOptions, PipelineReport, PipelineState, Stage};
