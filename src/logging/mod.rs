//! Log hygiene helpers

pub mod sanitize;
