// executor.rs - condition, step and modifier evaluation
//
// The executor is the instruction set the layer's condition programs run
// on. It is stateless; all mutation happens on the runtime passed in.

use super::types::{
    ActionRuntime, ConditionId, ModifierId, SourceEvent, SourceValue, StepId,
};

#[derive(Default)]
pub struct InputActionExecutor;

impl InputActionExecutor {
    pub fn new() -> InputActionExecutor {
        InputActionExecutor
    }

    /// Conditions below `ActionEnabled`, evaluated against a source slot.
    pub fn execute_source_condition(
        &self,
        id: ConditionId,
        value: &SourceValue,
        param: f32,
    ) -> bool {
        match id {
            ConditionId::Pressed => value.event == SourceEvent::KeyPress,
            ConditionId::Released => value.event == SourceEvent::KeyRelease,
            ConditionId::Trigger => value.event == SourceEvent::Trigger && value.value > param,
            ConditionId::AxisAbove => value.event == SourceEvent::Axis && value.value > param,
            ConditionId::AxisBelow => value.event == SourceEvent::Axis && value.value < param,
            ConditionId::AxisMoved => value.event == SourceEvent::Axis,
            _ => false,
        }
    }

    /// Conditions at `ActionEnabled` and above, evaluated against a runtime.
    pub fn execute_action_condition(
        &self,
        id: ConditionId,
        runtime: &ActionRuntime,
        _param: f32,
    ) -> bool {
        match id {
            ConditionId::ActionEnabled => runtime.enabled,
            ConditionId::ActionDisabled => !runtime.enabled,
            ConditionId::ActionActive => runtime.active,
            ConditionId::ActionInactive => !runtime.active,
            _ => false,
        }
    }

    /// Steps below `Set`, operating on the runtime action directly.
    pub fn execute_runtime_step(&self, id: StepId, runtime: &mut ActionRuntime) {
        match id {
            StepId::Activate => {
                // Doubling with the low bit set: 1 on the first press, >1
                // while held, and still >1 after counter wrap.
                runtime.state = runtime.state.wrapping_shl(1) | 1;
                runtime.active = true;
            }
            StepId::Deactivate => {
                runtime.state = 0;
                runtime.active = false;
            }
            StepId::Enable => runtime.enabled = true,
            StepId::Disable => {
                runtime.enabled = false;
                runtime.active = false;
                runtime.state = 0;
            }
            StepId::Reset => {
                runtime.raw_value = [0.0; 3];
                runtime.state = 0;
            }
            _ => {}
        }
    }

    /// Steps at `Set` and above: read a source axis, write an action axis.
    pub fn execute_value_step(&self, id: StepId, value: &SourceValue, dst: &mut f32) {
        match id {
            StepId::Set => *dst = value.value,
            StepId::Add => *dst += value.value,
            StepId::Sub => *dst -= value.value,
            _ => {}
        }
    }

    pub fn execute_modifier(&self, id: ModifierId, value: &mut f32, param: f32) {
        match id {
            ModifierId::Negate => *value = -*value,
            ModifierId::Scale => *value *= param,
            ModifierId::Deadzone => {
                if value.abs() < param {
                    *value = 0.0;
                }
            }
            ModifierId::Clamp => *value = value.clamp(-param, param),
            ModifierId::Invalid => {}
        }
    }
}
