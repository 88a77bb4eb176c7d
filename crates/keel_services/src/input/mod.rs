// mod.rs - input action engine
//
// Device events flow through three stages each tick:
//   1. normalization - events land in per-source storage slots,
//   2. evaluation    - every action walks its condition/step program,
//   3. resolution    - behaviors, timestamps and modifiers settle values.
//
// Layers are authored through `LayerBuilder` or the text format in
// `script`, frozen into a binary blob, and evaluated from the decoded
// tables.

mod builder;
mod executor;
mod layer;
mod script;
mod types;

pub use builder::{ActionBuilder, LayerBuilder, SeriesBuilder, SourceBuilder};
pub use executor::InputActionExecutor;
pub use layer::InputActionLayer;
pub use script::parse_layers;
pub use types::{
    input_binding_id, ActionInfo, ActionRuntime, Behavior, ConditionData, ConditionFlags,
    ConditionId, DataKind, InputEvent, InputId, InputValue, LayerHeader, ModifierData, ModifierId,
    Range16, SourceEvent, SourceInfo, SourceKind, SourceRef, SourceValue, StepData, StepId, StrRef,
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    /// The supplied layer blob was empty.
    #[error("input layer data was empty")]
    NullPointerData,

    /// The layer blob failed structural validation.
    #[error("input layer data is malformed")]
    InvalidArgument,
}
