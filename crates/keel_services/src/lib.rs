//! Keel Engine Services
//!
//! Engine-facing service layers; currently the input action engine, which
//! normalizes device events and evaluates layered condition programs into
//! stable action values.

pub mod input;

pub use input::{InputActionExecutor, InputActionLayer, InputError, LayerBuilder};
