//! Job templates, macro expansion and job collections

/// Templates of single-task batch jobs and their expanded descriptions
pub mod template;

/// Placeholder mini-language and macro expansion
pub mod macros;

/// Named sets of jobs read from and written to JSON
pub mod collection;
