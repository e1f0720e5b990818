// ABOUTME: Template module for pallet workflow definitions
// ABOUTME: Provides the closed reference grammar used by step inputs, conditions and selectors

pub mod error;
pub mod expression;

pub use error::{Result, TemplateError};
pub use expression::{lookup_path, Expression, Segment, Template, TemplateRoot};
