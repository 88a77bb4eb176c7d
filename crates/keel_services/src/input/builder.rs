// builder.rs - assembling input action layers
//
// The builder collects sources, actions, condition series, steps and
// modifiers by name, then resolves every reference and packs the layer into
// its binary blob. Named references resolve against source storage offsets
// and action indices at finalize time.

use super::layer::{parse_axis_suffix, InputActionLayer};
use super::types::{
    ActionInfo, Behavior, ConditionData, ConditionFlags, ConditionId, DataKind, InputId,
    LayerHeader, ModifierData, ModifierId, Range16, SourceInfo, SourceKind, SourceRef, StepData,
    StepId, StrRef,
};
use super::InputError;

pub struct LayerBuilder {
    name: String,
    sources: Vec<SourceBuilder>,
    actions: Vec<ActionBuilder>,
}

pub struct SourceBuilder {
    name: String,
    kind: SourceKind,
    inputs: Vec<InputId>,
    param: f32,
}

impl SourceBuilder {
    /// Bind a device input to this source. A source may carry several
    /// bindings; they share one storage slot.
    pub fn bind(&mut self, input: InputId) -> &mut SourceBuilder {
        self.inputs.push(input);
        self
    }

    /// Deadzone threshold applied to float axis events.
    pub fn deadzone(&mut self, param: f32) -> &mut SourceBuilder {
        self.param = param;
        self
    }
}

struct ModifierEntry {
    id: ModifierId,
    axis: u8,
    param: f32,
}

pub struct ActionBuilder {
    name: String,
    data: DataKind,
    behavior: Behavior,
    series: Vec<SeriesBuilder>,
    modifiers: Vec<ModifierEntry>,
}

impl ActionBuilder {
    pub fn set_behavior(&mut self, behavior: Behavior) -> &mut ActionBuilder {
        self.behavior = behavior;
        self
    }

    /// Start a new condition series. The last condition of every series is
    /// marked as its finish at finalize time.
    pub fn series(&mut self) -> &mut SeriesBuilder {
        self.series.push(SeriesBuilder {
            conditions: Vec::new(),
            final_series: false,
        });
        self.series.last_mut().expect("just pushed")
    }

    pub(crate) fn last_series_mut(&mut self) -> Option<&mut SeriesBuilder> {
        self.series.last_mut()
    }

    /// Apply a modifier to the given axes, e.g. `".xy"`.
    pub fn modifier(&mut self, id: ModifierId, param: f32, axes: &str) -> &mut ActionBuilder {
        let list = axes.strip_prefix('.').unwrap_or(axes);
        for axis in list.bytes() {
            assert!((b'x'..=b'z').contains(&axis), "modifier axes are .x to .z");
            self.modifiers.push(ModifierEntry {
                id,
                axis: axis - b'x',
                param,
            });
        }
        self
    }
}

struct ConditionEntry {
    source: String,
    axis: u8,
    id: ConditionId,
    series_and: bool,
    from_action: bool,
    param: f32,
    steps: Vec<StepEntry>,
}

struct StepEntry {
    id: StepId,
    source: String,
    read_axis: u8,
    write_axis: u8,
}

pub struct SeriesBuilder {
    conditions: Vec<ConditionEntry>,
    final_series: bool,
}

impl SeriesBuilder {
    fn push(&mut self, source: &str, id: ConditionId, series_and: bool, from_action: bool, param: f32) {
        let (name, axis) = parse_axis_suffix(source);
        self.conditions.push(ConditionEntry {
            source: name.to_string(),
            axis,
            id,
            series_and,
            from_action,
            param,
            steps: Vec::new(),
        });
    }

    /// Add a condition ORed into the series (also used for the first one).
    pub fn condition(&mut self, source: &str, id: ConditionId, param: f32) -> &mut SeriesBuilder {
        self.push(source, id, false, false, param);
        self
    }

    /// Add a condition ANDed into the series.
    pub fn and_condition(
        &mut self,
        source: &str,
        id: ConditionId,
        param: f32,
    ) -> &mut SeriesBuilder {
        self.push(source, id, true, false, param);
        self
    }

    /// Condition against a runtime action; `None` checks the action being
    /// evaluated.
    pub fn action_condition(
        &mut self,
        action: Option<&str>,
        id: ConditionId,
        param: f32,
    ) -> &mut SeriesBuilder {
        debug_assert!(id.is_action_check());
        self.push(action.unwrap_or(""), id, false, true, param);
        self
    }

    pub fn and_action_condition(
        &mut self,
        action: Option<&str>,
        id: ConditionId,
        param: f32,
    ) -> &mut SeriesBuilder {
        debug_assert!(id.is_action_check());
        self.push(action.unwrap_or(""), id, true, true, param);
        self
    }

    fn last_condition(&mut self) -> &mut ConditionEntry {
        self.conditions
            .last_mut()
            .expect("steps attach to a previously added condition")
    }

    /// Attach a runtime step (activate, deactivate, ...) to the latest
    /// condition.
    pub fn step(&mut self, id: StepId) -> &mut SeriesBuilder {
        debug_assert!(!id.reads_source());
        self.last_condition().steps.push(StepEntry {
            id,
            source: String::new(),
            read_axis: 0,
            write_axis: 0,
        });
        self
    }

    /// Attach a value step copying `source[.axis]` into the action's
    /// `target_axis` (e.g. `".y"`).
    pub fn value_step(
        &mut self,
        source: &str,
        id: StepId,
        target_axis: &str,
    ) -> &mut SeriesBuilder {
        debug_assert!(id.reads_source());
        let (name, read_axis) = parse_axis_suffix(source);
        let (_, write_axis) = parse_axis_suffix(target_axis);
        self.last_condition().steps.push(StepEntry {
            id,
            source: name.to_string(),
            read_axis,
            write_axis,
        });
        self
    }

    /// Stop evaluating further series once this one succeeds.
    pub fn make_final(&mut self) -> &mut SeriesBuilder {
        self.final_series = true;
        self
    }

    pub(crate) fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }
}

impl LayerBuilder {
    pub fn new(name: &str) -> LayerBuilder {
        LayerBuilder {
            name: name.to_string(),
            sources: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn set_name(&mut self, name: &str) -> &mut LayerBuilder {
        self.name = name.to_string();
        self
    }

    pub fn define_source(&mut self, name: &str, kind: SourceKind) -> &mut SourceBuilder {
        self.sources.push(SourceBuilder {
            name: name.to_string(),
            kind,
            inputs: Vec::new(),
            param: 0.0,
        });
        self.sources.last_mut().expect("just pushed")
    }

    pub fn define_action(&mut self, name: &str, data: DataKind) -> &mut ActionBuilder {
        self.actions.push(ActionBuilder {
            name: name.to_string(),
            data,
            behavior: Behavior::Continuous,
            series: Vec::new(),
            modifiers: Vec::new(),
        });
        self.actions.last_mut().expect("just pushed")
    }

    pub(crate) fn action_mut(&mut self, name: &str) -> Option<&mut ActionBuilder> {
        self.actions.iter_mut().find(|action| action.name == name)
    }

    /// Pack the layer into its binary blob.
    pub fn finalize_bytes(&self) -> Vec<u8> {
        let mut strings = self.name.clone();

        // Sources: one entry per binding, sharing a dense storage offset.
        let mut final_sources: Vec<SourceInfo> = Vec::new();
        let mut source_storage: Vec<(String, u16)> = Vec::new();
        let mut storage: u16 = 0;
        for source in &self.sources {
            let name = StrRef {
                offset: strings.len() as u16,
                size: source.name.len() as u16,
            };
            let entry = SourceInfo {
                input: 0,
                name,
                param: source.param,
                storage_offset: storage,
                kind: source.kind as u8,
                _pad: 0,
                _pad2: 0,
            };
            if source.inputs.is_empty() {
                final_sources.push(entry);
            }
            for &input in &source.inputs {
                final_sources.push(SourceInfo { input, ..entry });
            }
            strings.push_str(&source.name);
            source_storage.push((source.name.clone(), storage));

            storage += source.kind.storage_width() as u16;
            assert!(storage <= SourceRef::SELF_INDEX, "source storage overflow");
        }

        let storage_of = move |name: &str| -> u16 {
            source_storage
                .iter()
                .find(|(source, _)| source == name)
                .unwrap_or_else(|| panic!("unknown source '{name}' referenced"))
                .1
        };
        let action_index_of = |name: &str| -> u16 {
            self.actions
                .iter()
                .position(|action| action.name == name)
                .unwrap_or_else(|| panic!("unknown action '{name}' referenced"))
                as u16
        };

        let mut final_actions: Vec<ActionInfo> = Vec::new();
        let mut final_conditions: Vec<ConditionData> = Vec::new();
        let mut final_steps: Vec<StepData> = Vec::new();
        let mut final_modifiers: Vec<ModifierData> = Vec::new();

        for action in &self.actions {
            let condition_offset = final_conditions.len() as u16;

            for series in &action.series {
                let last_index = series.conditions.len().saturating_sub(1);
                for (index, condition) in series.conditions.iter().enumerate() {
                    let step_offset = final_steps.len() as u16;
                    for step in &condition.steps {
                        let source = if step.id.reads_source() {
                            SourceRef::new(storage_of(&step.source), step.read_axis)
                        } else {
                            SourceRef::default()
                        };
                        final_steps.push(StepData {
                            source,
                            id: step.id as u8,
                            dst_axis: step.write_axis,
                        });
                    }

                    let mut flags = ConditionFlags::NONE;
                    if condition.series_and {
                        flags |= ConditionFlags::SERIES_AND;
                    }
                    if !condition.steps.is_empty() {
                        flags |= ConditionFlags::RUN_STEPS;
                    }
                    if index == last_index {
                        // The series finish gates its steps on the folded
                        // series result.
                        flags |= ConditionFlags::SERIES_FINISH | ConditionFlags::SERIES_CHECK;
                        if series.final_series {
                            flags |= ConditionFlags::FINAL;
                        }
                    }

                    let source = if condition.from_action {
                        if condition.source.is_empty() {
                            SourceRef::self_ref()
                        } else {
                            SourceRef::new(action_index_of(&condition.source), condition.axis)
                        }
                    } else {
                        SourceRef::new(storage_of(&condition.source), condition.axis)
                    };

                    final_conditions.push(ConditionData {
                        source,
                        id: condition.id as u8,
                        flags: flags.0,
                        steps: Range16 {
                            offset: step_offset,
                            count: condition.steps.len() as u16,
                        },
                        param: condition.param,
                    });
                }
            }

            let modifier_offset = final_modifiers.len() as u16;
            for modifier in &action.modifiers {
                final_modifiers.push(ModifierData {
                    id: modifier.id as u8,
                    axis: modifier.axis,
                    _pad: 0,
                    param: modifier.param,
                });
            }

            final_actions.push(ActionInfo {
                name: StrRef {
                    offset: strings.len() as u16,
                    size: action.name.len() as u16,
                },
                conditions: Range16 {
                    offset: condition_offset,
                    count: final_conditions.len() as u16 - condition_offset,
                },
                mods: Range16 {
                    offset: modifier_offset,
                    count: final_modifiers.len() as u16 - modifier_offset,
                },
                data: action.data as u8,
                behavior: action.behavior as u8,
                _pad: 0,
            });
            strings.push_str(&action.name);
        }

        let offset_strings = (16
            + 24 * final_sources.len()
            + 16 * final_actions.len()
            + 12 * final_conditions.len()
            + 4 * final_steps.len()
            + 8 * final_modifiers.len()) as u32;

        let header = LayerHeader {
            size_name: self.name.len() as u8,
            _pad: 0,
            count_sources: final_sources.len() as u16,
            count_actions: final_actions.len() as u16,
            count_conditions: final_conditions.len() as u16,
            count_steps: final_steps.len() as u16,
            count_modifiers: final_modifiers.len() as u16,
            offset_strings,
        };

        let mut blob = Vec::with_capacity(offset_strings as usize + strings.len());
        blob.extend_from_slice(bytemuck::bytes_of(&header));
        blob.extend_from_slice(bytemuck::cast_slice(&final_sources));
        blob.extend_from_slice(bytemuck::cast_slice(&final_actions));
        blob.extend_from_slice(bytemuck::cast_slice(&final_conditions));
        blob.extend_from_slice(bytemuck::cast_slice(&final_steps));
        blob.extend_from_slice(bytemuck::cast_slice(&final_modifiers));
        blob.extend_from_slice(strings.as_bytes());
        blob
    }

    pub fn finalize(&self) -> Result<InputActionLayer, InputError> {
        InputActionLayer::from_bytes(&self.finalize_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::input_binding_id;
    use super::*;

    fn sample_builder() -> LayerBuilder {
        let mut builder = LayerBuilder::new("gameplay");
        builder
            .define_source("jump", SourceKind::Key)
            .bind(input_binding_id("kb.space"))
            .bind(input_binding_id("pad.a"));
        builder
            .define_source("look", SourceKind::Axis2d)
            .bind(input_binding_id("mouse.pos"))
            .deadzone(0.1);
        {
            let action = builder.define_action("fire", DataKind::Bool);
            action.set_behavior(Behavior::ActiveOnce);
            action
                .series()
                .condition("jump", ConditionId::Pressed, 0.0)
                .step(StepId::Activate)
                .make_final();
        }
        {
            let action = builder.define_action("aim", DataKind::Axis2);
            action
                .series()
                .condition("look", ConditionId::AxisMoved, 0.0)
                .step(StepId::Activate)
                .value_step("look.x", StepId::Set, ".x")
                .value_step("look.y", StepId::Set, ".y");
            action.modifier(ModifierId::Scale, 0.5, ".xy");
        }
        builder
    }

    #[test]
    fn test_blob_roundtrip() {
        let layer = sample_builder().finalize().unwrap();

        assert_eq!(layer.name(), "gameplay");
        // "jump" has two bindings, "look" one: three source entries.
        assert_eq!(layer.sources().len(), 3);
        assert_eq!(layer.actions().len(), 2);
        assert_eq!(layer.action_name(&layer.actions()[0]), "fire");
        assert_eq!(layer.action_name(&layer.actions()[1]), "aim");
        // jump (1 slot) + look (2 slots).
        assert_eq!(layer.storage_slots(), 3);
    }

    #[test]
    fn test_multi_bound_source_shares_storage() {
        let layer = sample_builder().finalize().unwrap();
        let jump_entries: Vec<_> = layer
            .sources()
            .iter()
            .filter(|s| layer.source_name(s) == "jump")
            .collect();
        assert_eq!(jump_entries.len(), 2);
        assert_eq!(
            jump_entries[0].storage_offset,
            jump_entries[1].storage_offset
        );
        assert_ne!(jump_entries[0].input, jump_entries[1].input);
    }

    #[test]
    fn test_storage_offsets_are_dense_and_unique() {
        let layer = sample_builder().finalize().unwrap();
        let mut offsets: Vec<u16> = layer.sources().iter().map(|s| s.storage_offset).collect();
        offsets.dedup();
        assert_eq!(offsets, vec![0, 1]);
    }

    #[test]
    fn test_condition_ranges_do_not_overlap() {
        let layer = sample_builder().finalize().unwrap();
        let first = layer.actions()[0].conditions;
        let second = layer.actions()[1].conditions;
        assert_eq!(first.offset + first.count, second.offset);
        assert!(first.count >= 1 && second.count >= 1);
    }

    #[test]
    fn test_final_flag_set_on_series_finish() {
        let layer = sample_builder().finalize().unwrap();
        let fire = layer.actions()[0];
        let condition = &layer.action_conditions(&fire)[0];
        let flags = condition.condition_flags();
        assert!(flags.has(ConditionFlags::SERIES_FINISH));
        assert!(flags.has(ConditionFlags::SERIES_CHECK));
        assert!(flags.has(ConditionFlags::FINAL));
        assert!(flags.has(ConditionFlags::RUN_STEPS));
    }
}
