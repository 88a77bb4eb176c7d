// types.rs - input action data model
//
// A layer is finalized into one binary blob: a header, five packed tables
// (sources, actions, conditions, steps, modifiers) and a string pack. The
// runtime records here mirror that blob bit for bit.

use bytemuck::{Pod, Zeroable};

/// Stable identifier of a device input. 0 means "not bound".
pub type InputId = u64;

/// Canonical id for a binding name such as `"kb.space"` or `"mouse.pos"`.
/// Device drivers and layers agree on ids through this function.
pub const fn input_binding_id(name: &str) -> InputId {
    let bytes = name.as_bytes();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

/// One normalized device event handed to a layer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InputEvent {
    pub id: InputId,
    /// Which storage slot of the source this event feeds (Axis2d uses two).
    pub axis: u8,
    pub value: InputValue,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InputValue {
    Button { pressed: bool },
    Trigger(f32),
    AxisInt(i32),
    AxisFloat(f32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceKind {
    Key = 0,
    Button = 1,
    Trigger = 2,
    Axis1d = 3,
    Axis2d = 4,
}

impl SourceKind {
    pub fn from_raw(raw: u8) -> Option<SourceKind> {
        Some(match raw {
            0 => SourceKind::Key,
            1 => SourceKind::Button,
            2 => SourceKind::Trigger,
            3 => SourceKind::Axis1d,
            4 => SourceKind::Axis2d,
            _ => return None,
        })
    }

    /// Number of storage slots the source occupies.
    pub fn storage_width(self) -> usize {
        if self == SourceKind::Axis2d {
            2
        } else {
            1
        }
    }
}

/// Value type an action produces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DataKind {
    Bool = 0,
    Axis1 = 1,
    Axis2 = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Behavior {
    /// Value mirrors the active state every tick.
    Continuous = 0,
    /// Deactivates as soon as the press is held (`state > 1`).
    ActiveOnce = 1,
    /// Press toggles the active state on and off.
    Toggled = 2,
    /// `raw_value` is not reset between ticks.
    Accumulated = 3,
}

impl Behavior {
    pub fn from_raw(raw: u8) -> Option<Behavior> {
        Some(match raw {
            0 => Behavior::Continuous,
            1 => Behavior::ActiveOnce,
            2 => Behavior::Toggled,
            3 => Behavior::Accumulated,
            _ => return None,
        })
    }
}

/// Normalized event state of one source storage slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceEvent {
    #[default]
    None = 0,
    KeyPress = 1,
    KeyRelease = 2,
    Trigger = 3,
    Axis = 4,
    /// Axis update below the source's deadzone parameter.
    AxisDeadzone = 5,
}

/// One source storage slot: the latest value, the event visible to
/// conditions this tick, and the event freshly raised while normalizing.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SourceValue {
    pub value: f32,
    pub event: SourceEvent,
    pub(crate) fresh: SourceEvent,
}

/// Packed source reference: `{ index:13, axis:3 }`. Index is a source
/// storage offset, or an action index for action-family conditions, or
/// `SELF_INDEX` for the action being evaluated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct SourceRef(pub u16);

impl SourceRef {
    pub const SELF_INDEX: u16 = 8191;

    pub fn new(index: u16, axis: u8) -> SourceRef {
        debug_assert!(index <= Self::SELF_INDEX);
        debug_assert!(axis < 8);
        SourceRef(index | ((axis as u16) << 13))
    }

    pub fn self_ref() -> SourceRef {
        SourceRef::new(Self::SELF_INDEX, 0)
    }

    #[inline]
    pub fn index(self) -> u16 {
        self.0 & 0x1FFF
    }

    #[inline]
    pub fn axis(self) -> u8 {
        (self.0 >> 13) as u8
    }

    pub fn is_self(self) -> bool {
        self.index() == Self::SELF_INDEX
    }
}

/// Condition checks. Ids at `ActionEnabled` and above inspect a runtime
/// action instead of a source slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConditionId {
    Invalid = 0,
    Pressed = 1,
    Released = 2,
    Trigger = 3,
    AxisAbove = 4,
    AxisBelow = 5,
    AxisMoved = 6,
    ActionEnabled = 7,
    ActionDisabled = 8,
    ActionActive = 9,
    ActionInactive = 10,
}

impl ConditionId {
    pub fn from_raw(raw: u8) -> Option<ConditionId> {
        Some(match raw {
            0 => ConditionId::Invalid,
            1 => ConditionId::Pressed,
            2 => ConditionId::Released,
            3 => ConditionId::Trigger,
            4 => ConditionId::AxisAbove,
            5 => ConditionId::AxisBelow,
            6 => ConditionId::AxisMoved,
            7 => ConditionId::ActionEnabled,
            8 => ConditionId::ActionDisabled,
            9 => ConditionId::ActionActive,
            10 => ConditionId::ActionInactive,
            _ => return None,
        })
    }

    /// Reads a runtime action rather than a source slot.
    pub fn is_action_check(self) -> bool {
        self >= ConditionId::ActionEnabled
    }
}

/// Condition behavior flags. A cleared `SERIES_AND` bit means the condition
/// ORs into the running series.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct ConditionFlags(pub u8);

impl ConditionFlags {
    pub const NONE: ConditionFlags = ConditionFlags(0);
    pub const SERIES_AND: ConditionFlags = ConditionFlags(1 << 0);
    pub const SERIES_CHECK: ConditionFlags = ConditionFlags(1 << 1);
    pub const SERIES_FINISH: ConditionFlags = ConditionFlags(1 << 2);
    pub const RUN_STEPS: ConditionFlags = ConditionFlags(1 << 3);
    pub const FINAL: ConditionFlags = ConditionFlags(1 << 4);
    pub const ACTIVATE: ConditionFlags = ConditionFlags(1 << 5);
    pub const DEACTIVATE: ConditionFlags = ConditionFlags(1 << 6);

    pub fn has(self, flags: ConditionFlags) -> bool {
        self.0 & flags.0 == flags.0
    }
}

impl std::ops::BitOr for ConditionFlags {
    type Output = ConditionFlags;
    fn bitor(self, rhs: ConditionFlags) -> ConditionFlags {
        ConditionFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ConditionFlags {
    fn bitor_assign(&mut self, rhs: ConditionFlags) {
        self.0 |= rhs.0;
    }
}

/// Steps below `Set` operate on the runtime action itself; `Set` and above
/// read a source axis and write an action axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StepId {
    Invalid = 0,
    Activate = 1,
    Deactivate = 2,
    Enable = 3,
    Disable = 4,
    Reset = 5,
    Set = 6,
    Add = 7,
    Sub = 8,
}

impl StepId {
    pub fn from_raw(raw: u8) -> Option<StepId> {
        Some(match raw {
            0 => StepId::Invalid,
            1 => StepId::Activate,
            2 => StepId::Deactivate,
            3 => StepId::Enable,
            4 => StepId::Disable,
            5 => StepId::Reset,
            6 => StepId::Set,
            7 => StepId::Add,
            8 => StepId::Sub,
            _ => return None,
        })
    }

    pub fn reads_source(self) -> bool {
        self >= StepId::Set
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ModifierId {
    Invalid = 0,
    Negate = 1,
    Scale = 2,
    Deadzone = 3,
    Clamp = 4,
}

impl ModifierId {
    pub fn from_raw(raw: u8) -> Option<ModifierId> {
        Some(match raw {
            0 => ModifierId::Invalid,
            1 => ModifierId::Negate,
            2 => ModifierId::Scale,
            3 => ModifierId::Deadzone,
            4 => ModifierId::Clamp,
            _ => return None,
        })
    }
}

/// Reference into the layer's string pack.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct StrRef {
    pub offset: u16,
    pub size: u16,
}

/// Contiguous range into one of the layer tables.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Range16 {
    pub offset: u16,
    pub count: u16,
}

/// Layer blob header, 16 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct LayerHeader {
    pub size_name: u8,
    pub _pad: u8,
    pub count_sources: u16,
    pub count_actions: u16,
    pub count_conditions: u16,
    pub count_steps: u16,
    pub count_modifiers: u16,
    pub offset_strings: u32,
}

/// One source binding entry, 24 bytes. Sources bound to several inputs emit
/// one entry per input, all sharing one storage offset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SourceInfo {
    pub input: InputId,
    pub name: StrRef,
    /// Deadzone threshold for float axes.
    pub param: f32,
    pub storage_offset: u16,
    pub kind: u8,
    pub _pad: u8,
    pub _pad2: u32,
}

impl SourceInfo {
    pub fn source_kind(&self) -> SourceKind {
        SourceKind::from_raw(self.kind).unwrap_or(SourceKind::Key)
    }
}

/// One action entry, 16 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ActionInfo {
    pub name: StrRef,
    pub conditions: Range16,
    pub mods: Range16,
    pub data: u8,
    pub behavior: u8,
    pub _pad: u16,
}

impl ActionInfo {
    pub fn action_behavior(&self) -> Behavior {
        Behavior::from_raw(self.behavior).unwrap_or(Behavior::Continuous)
    }
}

/// One condition entry, 12 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ConditionData {
    pub source: SourceRef,
    pub id: u8,
    pub flags: u8,
    pub steps: Range16,
    pub param: f32,
}

impl ConditionData {
    pub fn condition_id(&self) -> ConditionId {
        ConditionId::from_raw(self.id).unwrap_or(ConditionId::Invalid)
    }

    pub fn condition_flags(&self) -> ConditionFlags {
        ConditionFlags(self.flags)
    }
}

/// One step entry, 4 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct StepData {
    pub source: SourceRef,
    pub id: u8,
    pub dst_axis: u8,
}

impl StepData {
    pub fn step_id(&self) -> StepId {
        StepId::from_raw(self.id).unwrap_or(StepId::Invalid)
    }
}

/// One modifier entry, 8 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ModifierData {
    pub id: u8,
    pub axis: u8,
    pub _pad: u16,
    pub param: f32,
}

impl ModifierData {
    pub fn modifier_id(&self) -> ModifierId {
        ModifierId::from_raw(self.id).unwrap_or(ModifierId::Invalid)
    }
}

/// Mutable evaluation state of one action.
#[derive(Clone, Debug)]
pub struct ActionRuntime {
    pub raw_value: [f32; 3],
    pub value: [f32; 2],
    /// Doubles (and sets the low bit) every active tick; 1 on the first
    /// press, greater while held, 0 when inactive.
    pub state: u32,
    pub enabled: bool,
    pub active: bool,
    pub was_active: bool,
    pub toggle_enabled: bool,
    /// Set on the tick the action becomes active.
    pub timestamp: Option<std::time::Instant>,
}

impl Default for ActionRuntime {
    fn default() -> Self {
        ActionRuntime {
            raw_value: [0.0; 3],
            value: [0.0; 2],
            state: 0,
            enabled: true,
            active: false,
            was_active: false,
            toggle_enabled: false,
            timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<LayerHeader>(), 16);
        assert_eq!(std::mem::size_of::<SourceInfo>(), 24);
        assert_eq!(std::mem::size_of::<ActionInfo>(), 16);
        assert_eq!(std::mem::size_of::<ConditionData>(), 12);
        assert_eq!(std::mem::size_of::<StepData>(), 4);
        assert_eq!(std::mem::size_of::<ModifierData>(), 8);
    }

    #[test]
    fn test_source_ref_packing() {
        let source = SourceRef::new(137, 2);
        assert_eq!(source.index(), 137);
        assert_eq!(source.axis(), 2);
        assert!(!source.is_self());
        assert!(SourceRef::self_ref().is_self());
    }

    #[test]
    fn test_id_thresholds() {
        assert!(!ConditionId::AxisMoved.is_action_check());
        assert!(ConditionId::ActionEnabled.is_action_check());
        assert!(!StepId::Reset.reads_source());
        assert!(StepId::Set.reads_source());
    }

    #[test]
    fn test_binding_ids_are_stable() {
        assert_eq!(input_binding_id("kb.space"), input_binding_id("kb.space"));
        assert_ne!(input_binding_id("kb.space"), input_binding_id("kb.enter"));
    }
}
