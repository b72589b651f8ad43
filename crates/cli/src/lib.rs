//! Public library modules for the CLI crate
pub mod collect;
pub mod display;
