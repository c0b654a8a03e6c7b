//! Bundled map/reduce applications.

pub mod wc;
