//! Convenience functions for importing grid descriptions

pub mod json_format;
