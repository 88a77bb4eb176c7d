// layer.rs - input action layers: normalization and the evaluation loop
//
// A layer owns the tables decoded from its finalized blob. Each tick the
// engine first normalizes device events into source slots, then walks every
// action's condition program and resolves its behavior.

use std::collections::HashMap;

use super::executor::InputActionExecutor;
use super::types::{
    ActionInfo, ActionRuntime, Behavior, ConditionData, ConditionFlags, InputEvent, InputValue,
    LayerHeader, ModifierData, Range16, SourceEvent, SourceInfo, SourceValue, StepData, StrRef,
};
use super::InputError;

pub struct InputActionLayer {
    name_len: usize,
    sources: Vec<SourceInfo>,
    actions: Vec<ActionInfo>,
    conditions: Vec<ConditionData>,
    steps: Vec<StepData>,
    modifiers: Vec<ModifierData>,
    strings: String,
}

fn read_table<T: bytemuck::Pod + Default + Clone>(
    bytes: &[u8],
    offset: &mut usize,
    count: usize,
) -> Result<Vec<T>, InputError> {
    let size = std::mem::size_of::<T>();
    let end = *offset + size * count;
    let slice = bytes.get(*offset..end).ok_or(InputError::InvalidArgument)?;
    let mut table = vec![T::default(); count];
    for (index, entry) in table.iter_mut().enumerate() {
        *entry = bytemuck::pod_read_unaligned(&slice[index * size..(index + 1) * size]);
    }
    *offset = end;
    Ok(table)
}

impl InputActionLayer {
    /// Decode a layer from its finalized blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<InputActionLayer, InputError> {
        if bytes.is_empty() {
            return Err(InputError::NullPointerData);
        }
        if bytes.len() < std::mem::size_of::<LayerHeader>() {
            return Err(InputError::InvalidArgument);
        }

        let header: LayerHeader = bytemuck::pod_read_unaligned(&bytes[0..16]);
        let mut offset = 16usize;

        let sources = read_table::<SourceInfo>(bytes, &mut offset, header.count_sources as usize)?;
        let actions = read_table::<ActionInfo>(bytes, &mut offset, header.count_actions as usize)?;
        let conditions =
            read_table::<ConditionData>(bytes, &mut offset, header.count_conditions as usize)?;
        let steps = read_table::<StepData>(bytes, &mut offset, header.count_steps as usize)?;
        let modifiers =
            read_table::<ModifierData>(bytes, &mut offset, header.count_modifiers as usize)?;

        if offset != header.offset_strings as usize {
            return Err(InputError::InvalidArgument);
        }
        let strings = std::str::from_utf8(&bytes[offset..])
            .map_err(|_| InputError::InvalidArgument)?
            .to_string();
        if (header.size_name as usize) > strings.len() {
            return Err(InputError::InvalidArgument);
        }

        Ok(InputActionLayer {
            name_len: header.size_name as usize,
            sources,
            actions,
            conditions,
            steps,
            modifiers,
            strings,
        })
    }

    pub fn name(&self) -> &str {
        &self.strings[..self.name_len]
    }

    pub fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    pub fn actions(&self) -> &[ActionInfo] {
        &self.actions
    }

    fn str_ref(&self, str_ref: StrRef) -> &str {
        let start = str_ref.offset as usize;
        &self.strings[start..start + str_ref.size as usize]
    }

    pub fn source_name(&self, source: &SourceInfo) -> &str {
        self.str_ref(source.name)
    }

    pub fn action_name(&self, action: &ActionInfo) -> &str {
        self.str_ref(action.name)
    }

    /// Number of source storage slots this layer expects.
    pub fn storage_slots(&self) -> usize {
        self.sources
            .iter()
            .map(|s| s.storage_offset as usize + s.source_kind().storage_width())
            .max()
            .unwrap_or(0)
    }

    /// Fresh slot storage for this layer.
    pub fn create_storage(&self) -> Vec<SourceValue> {
        vec![SourceValue::default(); self.storage_slots()]
    }

    /// One runtime per action, keyed by action name.
    pub fn create_runtimes(&self) -> HashMap<String, ActionRuntime> {
        self.actions
            .iter()
            .map(|action| (self.action_name(action).to_string(), ActionRuntime::default()))
            .collect()
    }

    fn conditions_of(&self, range: Range16) -> &[ConditionData] {
        &self.conditions[range.offset as usize..(range.offset + range.count) as usize]
    }

    /// Condition entries of one action.
    pub fn action_conditions(&self, action: &ActionInfo) -> &[ConditionData] {
        self.conditions_of(action.conditions)
    }

    fn steps_of(&self, range: Range16) -> &[StepData] {
        &self.steps[range.offset as usize..(range.offset + range.count) as usize]
    }

    fn modifiers_of(&self, range: Range16) -> &[ModifierData] {
        &self.modifiers[range.offset as usize..(range.offset + range.count) as usize]
    }

    /// Normalize device events into source slots. Matched events are
    /// consumed from `events`; the count of consumed events is returned.
    ///
    /// Key presses persist across event-less ticks (the key is held) and a
    /// repeated press is not re-raised; releases decay to `None` after one
    /// tick.
    pub fn process_inputs(
        &self,
        events: &mut Vec<InputEvent>,
        values: &mut [SourceValue],
    ) -> u32 {
        // Reset the freshly-raised markers.
        for source in &self.sources {
            let offset = source.storage_offset as usize;
            for slot in 0..source.source_kind().storage_width() {
                values[offset + slot].fresh = SourceEvent::None;
            }
        }

        let mut consumed = 0u32;
        for source in &self.sources {
            if source.input == 0 {
                continue;
            }
            let Some(position) = events.iter().position(|event| event.id == source.input) else {
                continue;
            };

            let event = events.swap_remove(position);
            consumed += 1;

            let width = source.source_kind().storage_width();
            let axis = (event.axis as usize).min(width - 1);
            let slot = &mut values[source.storage_offset as usize + axis];

            match event.value {
                InputValue::Trigger(value) => {
                    slot.value = value;
                    slot.fresh = SourceEvent::Trigger;
                }
                InputValue::AxisInt(value) => {
                    slot.value = value as f32;
                    slot.fresh = SourceEvent::Axis;
                }
                InputValue::AxisFloat(value) => {
                    slot.value = value;
                    slot.fresh = if source.param < value {
                        SourceEvent::Axis
                    } else {
                        SourceEvent::AxisDeadzone
                    };
                }
                InputValue::Button { pressed } => {
                    if pressed {
                        // A key already down is not re-raised.
                        if slot.event != SourceEvent::KeyPress
                            && slot.fresh != SourceEvent::KeyPress
                        {
                            slot.value = 1.0;
                            slot.fresh = SourceEvent::KeyPress;
                        }
                    } else {
                        slot.value = 0.0;
                        slot.fresh = SourceEvent::KeyRelease;
                    }
                }
            }
        }

        // Select the final per-slot events.
        for source in &self.sources {
            let offset = source.storage_offset as usize;
            for index in 0..source.source_kind().storage_width() {
                let slot = &mut values[offset + index];
                if slot.fresh != SourceEvent::None {
                    slot.event = slot.fresh;
                } else if slot.event == SourceEvent::KeyRelease {
                    slot.event = SourceEvent::None;
                }
            }
        }

        consumed
    }

    /// Walk every action's condition program and resolve its behavior.
    pub fn update_actions(
        &self,
        executor: &InputActionExecutor,
        values: &[SourceValue],
        runtimes: &mut HashMap<String, ActionRuntime>,
    ) {
        for action in &self.actions {
            let name = self.action_name(action);
            let mut runtime = runtimes.get(name).cloned().unwrap_or_default();

            // Every behavior but Accumulated starts the tick from zero.
            if action.action_behavior() != Behavior::Accumulated {
                runtime.raw_value = [0.0; 3];
            }

            let mut series_success = false;
            for condition in self.conditions_of(action.conditions) {
                let flags = condition.condition_flags();
                let id = condition.condition_id();

                let cond_result = if id.is_action_check() {
                    let checked = if condition.source.is_self() {
                        runtime.clone()
                    } else {
                        let other = &self.actions[condition.source.index() as usize];
                        runtimes
                            .get(self.action_name(other))
                            .cloned()
                            .unwrap_or_default()
                    };
                    executor.execute_action_condition(id, &checked, condition.param)
                } else {
                    let value = &values[condition.source.index() as usize];
                    // Sources with no event this tick evaluate to false.
                    if value.event == SourceEvent::None {
                        false
                    } else {
                        executor.execute_source_condition(id, value, condition.param)
                    }
                };

                if flags.has(ConditionFlags::SERIES_AND) {
                    series_success &= cond_result;
                } else {
                    series_success |= cond_result;
                }

                let check_success = if flags.has(ConditionFlags::SERIES_CHECK) {
                    series_success
                } else {
                    cond_result
                };

                if flags.has(ConditionFlags::RUN_STEPS) && check_success {
                    for step in self.steps_of(condition.steps) {
                        let step_id = step.step_id();
                        if step_id.reads_source() {
                            let slot_index =
                                step.source.index() as usize + step.source.axis() as usize;
                            executor.execute_value_step(
                                step_id,
                                &values[slot_index],
                                &mut runtime.raw_value[step.dst_axis as usize],
                            );
                        } else {
                            executor.execute_runtime_step(step_id, &mut runtime);
                        }
                    }
                }

                if !flags.has(ConditionFlags::SERIES_FINISH) {
                    continue;
                }

                // A failed series (or a disabled action) resets the state so
                // the next press counts as the first again.
                if !series_success || !runtime.enabled {
                    runtime.state = 0;
                    runtime.active = false;
                    continue;
                }

                series_success = false;
                if !flags.has(ConditionFlags::FINAL) {
                    continue;
                }
                break;
            }

            runtimes.insert(name.to_string(), runtime);
        }

        // Behavior resolution, timestamps and modifiers.
        for action in &self.actions {
            let name = self.action_name(action);
            let Some(runtime) = runtimes.get_mut(name) else {
                continue;
            };

            match action.action_behavior() {
                Behavior::Toggled => {
                    if runtime.state == 1 {
                        // First press of a new hold flips the toggle.
                        runtime.toggle_enabled = !runtime.toggle_enabled;
                        runtime.active = runtime.toggle_enabled;
                    } else {
                        runtime.active |= runtime.toggle_enabled;
                    }
                }
                Behavior::ActiveOnce => {
                    if runtime.state > 1 {
                        runtime.active = false;
                    }
                }
                Behavior::Continuous | Behavior::Accumulated => {}
            }

            if !runtime.active {
                runtime.was_active = false;
                continue;
            }

            if !runtime.was_active {
                runtime.was_active = true;
                runtime.timestamp = Some(std::time::Instant::now());
            }

            runtime.value = [runtime.raw_value[0], runtime.raw_value[1]];
            for modifier in self.modifiers_of(action.mods) {
                let axis = modifier.axis as usize;
                if axis < runtime.value.len() {
                    executor.execute_modifier(
                        modifier.modifier_id(),
                        &mut runtime.value[axis],
                        modifier.param,
                    );
                }
            }
        }
    }
}

/// Resolve a `source[.axis]` reference, defaulting to axis x.
pub(crate) fn parse_axis_suffix(reference: &str) -> (&str, u8) {
    if reference.len() > 1 {
        let bytes = reference.as_bytes();
        if bytes[reference.len() - 2] == b'.' {
            let axis = bytes[reference.len() - 1];
            if (b'x'..=b'z').contains(&axis) {
                return (&reference[..reference.len() - 2], axis - b'x');
            }
        }
    }
    (reference, 0)
}

#[cfg(test)]
mod tests {
    use super::super::builder::LayerBuilder;
    use super::super::types::{
        input_binding_id, ConditionId, DataKind, InputEvent, InputValue, SourceKind, StepId,
    };
    use super::*;

    const KEY: &str = "kb.space";

    fn press() -> InputEvent {
        InputEvent {
            id: input_binding_id(KEY),
            axis: 0,
            value: InputValue::Button { pressed: true },
        }
    }

    fn release() -> InputEvent {
        InputEvent {
            id: input_binding_id(KEY),
            axis: 0,
            value: InputValue::Button { pressed: false },
        }
    }

    /// A layer with one key source and one action activating on press.
    fn key_layer(behavior: super::super::types::Behavior) -> InputActionLayer {
        let mut builder = LayerBuilder::new("test");
        builder
            .define_source("jump", SourceKind::Key)
            .bind(input_binding_id(KEY));
        {
            let action = builder.define_action("fire", DataKind::Bool);
            action.set_behavior(behavior);
            action
                .series()
                .condition("jump", ConditionId::Pressed, 0.0)
                .step(StepId::Activate);
        }
        builder.finalize().unwrap()
    }

    #[test]
    fn test_press_raises_exactly_once() {
        let layer = key_layer(super::super::types::Behavior::Continuous);
        let mut values = layer.create_storage();

        let mut events = vec![press()];
        let consumed = layer.process_inputs(&mut events, &mut values);
        assert_eq!(consumed, 1);
        assert!(events.is_empty(), "matched events are consumed");
        assert_eq!(values[0].event, SourceEvent::KeyPress);

        // No event next tick: the key stays held, nothing is re-raised.
        let mut events = Vec::new();
        layer.process_inputs(&mut events, &mut values);
        assert_eq!(values[0].event, SourceEvent::KeyPress);
        assert_eq!(values[0].fresh, SourceEvent::None);

        // A repeated press while held is not re-raised either.
        let mut events = vec![press()];
        layer.process_inputs(&mut events, &mut values);
        assert_eq!(values[0].fresh, SourceEvent::None);
    }

    #[test]
    fn test_release_decays_to_none() {
        let layer = key_layer(super::super::types::Behavior::Continuous);
        let mut values = layer.create_storage();

        layer.process_inputs(&mut vec![press()], &mut values);
        layer.process_inputs(&mut vec![release()], &mut values);
        assert_eq!(values[0].event, SourceEvent::KeyRelease);

        layer.process_inputs(&mut Vec::new(), &mut values);
        assert_eq!(values[0].event, SourceEvent::None);
    }

    #[test]
    fn test_active_once_deactivates_while_held() {
        let layer = key_layer(super::super::types::Behavior::ActiveOnce);
        let executor = InputActionExecutor::new();
        let mut values = layer.create_storage();
        let mut runtimes = layer.create_runtimes();

        layer.process_inputs(&mut vec![press()], &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(runtimes["fire"].active, "first press activates");

        layer.process_inputs(&mut Vec::new(), &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(!runtimes["fire"].active, "held press deactivates");
        assert!(runtimes["fire"].state > 1);
    }

    #[test]
    fn test_toggle_behavior_over_two_presses() {
        // Press/release, then press again: active after frame 1, inactive
        // after frame 3.
        let layer = key_layer(super::super::types::Behavior::Toggled);
        let executor = InputActionExecutor::new();
        let mut values = layer.create_storage();
        let mut runtimes = layer.create_runtimes();

        layer.process_inputs(&mut vec![press()], &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(runtimes["fire"].active, "frame 1: toggled on");

        layer.process_inputs(&mut vec![release()], &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(runtimes["fire"].active, "frame 2: stays on through release");

        layer.process_inputs(&mut vec![press()], &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(!runtimes["fire"].active, "frame 3: toggled off");

        layer.process_inputs(&mut vec![release()], &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(!runtimes["fire"].active, "frame 4: stays off");
    }

    #[test]
    fn test_series_and_gate() {
        // Two-condition AND series succeeds only when both hold on the
        // same tick.
        let other = "kb.lshift";
        let mut builder = LayerBuilder::new("test");
        builder
            .define_source("jump", SourceKind::Key)
            .bind(input_binding_id(KEY));
        builder
            .define_source("mod", SourceKind::Key)
            .bind(input_binding_id(other));
        {
            let action = builder.define_action("boosted", DataKind::Bool);
            action
                .series()
                .condition("jump", ConditionId::Pressed, 0.0)
                .and_condition("mod", ConditionId::Pressed, 0.0)
                .step(StepId::Activate);
        }
        let layer = builder.finalize().unwrap();
        let executor = InputActionExecutor::new();
        let mut values = layer.create_storage();
        let mut runtimes = layer.create_runtimes();

        // Only one of the two pressed.
        layer.process_inputs(&mut vec![press()], &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(!runtimes["boosted"].active);

        // Both held on the same tick.
        let mut events = vec![InputEvent {
            id: input_binding_id(other),
            axis: 0,
            value: InputValue::Button { pressed: true },
        }];
        layer.process_inputs(&mut events, &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(runtimes["boosted"].active);
    }

    #[test]
    fn test_axis_source_feeds_action_value() {
        let stick = "pad.left";
        let mut builder = LayerBuilder::new("test");
        builder
            .define_source("move", SourceKind::Axis2d)
            .bind(input_binding_id(stick))
            .deadzone(0.2);
        {
            let action = builder.define_action("walk", DataKind::Axis2);
            action
                .series()
                .condition("move", ConditionId::AxisMoved, 0.0)
                .step(StepId::Activate)
                .value_step("move.x", StepId::Set, ".x")
                .value_step("move.y", StepId::Set, ".y");
            action.modifier(super::super::types::ModifierId::Scale, 2.0, ".xy");
        }
        let layer = builder.finalize().unwrap();
        let executor = InputActionExecutor::new();
        let mut values = layer.create_storage();
        let mut runtimes = layer.create_runtimes();

        let mut events = vec![
            InputEvent {
                id: input_binding_id(stick),
                axis: 0,
                value: InputValue::AxisFloat(0.5),
            },
            InputEvent {
                id: input_binding_id(stick),
                axis: 1,
                value: InputValue::AxisFloat(0.75),
            },
        ];
        // One event per source is consumed per tick; the second axis value
        // lands on the following tick while the first slot keeps its event.
        layer.process_inputs(&mut events, &mut values);
        layer.process_inputs(&mut events, &mut values);

        layer.update_actions(&executor, &values, &mut runtimes);
        let walk = &runtimes["walk"];
        assert!(walk.active);
        assert_eq!(walk.value[0], 1.0);
        assert_eq!(walk.value[1], 1.5);
    }

    #[test]
    fn test_accumulated_keeps_raw_value_across_ticks() {
        let wheel = "mouse.wheel";
        let mut builder = LayerBuilder::new("test");
        builder
            .define_source("scroll", SourceKind::Axis1d)
            .bind(input_binding_id(wheel));
        {
            let action = builder.define_action("zoom", DataKind::Axis1);
            action.set_behavior(super::super::types::Behavior::Accumulated);
            action
                .series()
                .condition("scroll", ConditionId::AxisMoved, 0.0)
                .step(StepId::Activate)
                .value_step("scroll", StepId::Add, ".x");
        }
        let layer = builder.finalize().unwrap();
        let executor = InputActionExecutor::new();
        let mut values = layer.create_storage();
        let mut runtimes = layer.create_runtimes();

        for _ in 0..3 {
            let mut events = vec![InputEvent {
                id: input_binding_id(wheel),
                axis: 0,
                value: InputValue::AxisFloat(1.0),
            }];
            layer.process_inputs(&mut events, &mut values);
            layer.update_actions(&executor, &values, &mut runtimes);
        }

        // No reset between ticks: three updates sum up.
        assert_eq!(runtimes["zoom"].value[0], 3.0);
    }

    #[test]
    fn test_timestamp_set_on_first_active_tick() {
        let layer = key_layer(super::super::types::Behavior::Continuous);
        let executor = InputActionExecutor::new();
        let mut values = layer.create_storage();
        let mut runtimes = layer.create_runtimes();

        assert!(runtimes["fire"].timestamp.is_none());
        layer.process_inputs(&mut vec![press()], &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);

        let stamped = runtimes["fire"].timestamp.expect("activation stamps time");
        // Held: the stamp does not move while the action stays active.
        layer.process_inputs(&mut Vec::new(), &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert_eq!(runtimes["fire"].timestamp, Some(stamped));
    }

    #[test]
    fn test_deadzone_blocks_axis_condition() {
        let stick = "pad.left";
        let mut builder = LayerBuilder::new("test");
        builder
            .define_source("move", SourceKind::Axis1d)
            .bind(input_binding_id(stick))
            .deadzone(0.3);
        {
            let action = builder.define_action("walk", DataKind::Axis1);
            action
                .series()
                .condition("move", ConditionId::AxisMoved, 0.0)
                .step(StepId::Activate);
        }
        let layer = builder.finalize().unwrap();
        let executor = InputActionExecutor::new();
        let mut values = layer.create_storage();
        let mut runtimes = layer.create_runtimes();

        let mut events = vec![InputEvent {
            id: input_binding_id(stick),
            axis: 0,
            value: InputValue::AxisFloat(0.1),
        }];
        layer.process_inputs(&mut events, &mut values);
        assert_eq!(values[0].event, SourceEvent::AxisDeadzone);

        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(!runtimes["walk"].active);
    }

    #[test]
    fn test_parse_axis_suffix() {
        assert_eq!(parse_axis_suffix("move.x"), ("move", 0));
        assert_eq!(parse_axis_suffix("move.z"), ("move", 2));
        assert_eq!(parse_axis_suffix("move"), ("move", 0));
        assert_eq!(parse_axis_suffix(".y"), ("", 1));
    }
}
