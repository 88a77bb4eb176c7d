// builder.rs - mutable config tree and the two-pass freeze into a blob
//
// Containers are reference counted; cursors alias entries inside a container
// and keep the container alive. Dropping the last handle releases the
// subtree. Finalization walks the tree twice: once to size the blob and
// intern key strings, once to emit keys, values and payload bytes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::types::{ConfigKey, KeyType, ValueType, EMPTY_CONTAINER};
use super::ConfigError;
use crate::memory::{align_to, Alignment};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ContainerKind {
    Object,
    Table,
}

struct Container {
    kind: ContainerKind,
    entries: Vec<Entry>,
}

struct Entry {
    /// `None` for table entries, which are addressed by position.
    key: Option<String>,
    value: Value,
}

enum Value {
    None,
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Blob(Vec<u8>),
    Container(Rc<RefCell<Container>>),
}

impl Value {
    fn value_type(&self) -> ValueType {
        match self {
            Value::None => ValueType::None,
            Value::Bool(_) => ValueType::Bool,
            Value::U8(_) => ValueType::U8,
            Value::U16(_) => ValueType::U16,
            Value::U32(_) => ValueType::U32,
            Value::U64(_) => ValueType::U64,
            Value::I8(_) => ValueType::I8,
            Value::I16(_) => ValueType::I16,
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::Str(_) => ValueType::String,
            Value::Blob(_) => ValueType::Blob,
            Value::Container(c) => match c.borrow().kind {
                ContainerKind::Object => ValueType::Object,
                ContainerKind::Table => ValueType::Table,
            },
        }
    }
}

fn new_container(kind: ContainerKind) -> Rc<RefCell<Container>> {
    Rc::new(RefCell::new(Container {
        kind,
        entries: Vec::new(),
    }))
}

/// True if `target` is reachable from `candidate` (including identity).
fn reaches(candidate: &Rc<RefCell<Container>>, target: &Rc<RefCell<Container>>) -> bool {
    if Rc::ptr_eq(candidate, target) {
        return true;
    }
    for entry in &candidate.borrow().entries {
        if let Value::Container(sub) = &entry.value {
            if reaches(sub, target) {
                return true;
            }
        }
    }
    false
}

/// Mutable configuration tree. The root is always an object.
pub struct ConfigBuilder {
    root: Rc<RefCell<Container>>,
}

impl ConfigBuilder {
    pub fn new() -> ConfigBuilder {
        ConfigBuilder {
            root: new_container(ContainerKind::Object),
        }
    }

    /// Get or create a top-level entry.
    pub fn entry(&self, key: &str) -> ConfigCursor {
        let index = object_entry_index(&self.root, key);
        ConfigCursor {
            container: Rc::clone(&self.root),
            index,
        }
    }

    /// Navigate a `/`- or `.`-separated path, creating objects along the way.
    pub fn entry_path(&self, path: &str) -> ConfigCursor {
        let mut segments = path.split(['/', '.']).filter(|s| !s.is_empty());
        let first = segments.next().expect("empty config path");

        let mut cursor = self.entry(first);
        for segment in segments {
            cursor = cursor.entry(segment);
        }
        cursor
    }

    /// Drop every entry in the tree.
    pub fn reset(&self) {
        self.root.borrow_mut().entries.clear();
    }

    /// Freeze the tree into an immutable blob. An empty tree produces an
    /// empty vector.
    pub fn finalize(&self) -> Vec<u8> {
        let root = self.root.borrow();
        if root.entries.is_empty() {
            return Vec::new();
        }

        // Pass 1: intern keys and accumulate exact byte counts.
        let mut interner = KeyInterner::default();
        let mut totals = SizeTotals::default();
        measure(&root, &mut interner, &mut totals);

        let n = totals.entries as usize;
        let keyvalue_end = 8 + 8 * (n + 2);
        let keystrings_end = keyvalue_end + interner.total_len;
        debug_assert!(interner.total_len <= 0xFFFF, "interned key area overflow");

        // One guard NUL below the string area keeps the byte before every
        // string zero even when the scalar payloads end in non-zero bytes.
        let tail_guard = usize::from(totals.tail_bytes > 0);
        let payload = totals.large_bytes + totals.tail_bytes + tail_guard;
        let data_offset = if payload > 0 {
            align_to(keystrings_end, Alignment::B8)
        } else {
            keystrings_end
        };
        let total = data_offset + payload;

        let mut blob = vec![0u8; total];
        blob[0..4].copy_from_slice(&(total as u32).to_le_bytes());
        blob[4..8].copy_from_slice(&(data_offset as u32).to_le_bytes());

        // Interned key text, first-seen order.
        let mut text_offset = keyvalue_end;
        for text in &interner.order {
            blob[text_offset..text_offset + text.len()].copy_from_slice(text.as_bytes());
            text_offset += text.len();
        }

        // Pass 2: emit keys, values and payload. Entry 0 is the synthetic
        // root, entry n+1 stays the zero sentinel.
        let mut keys = vec![ConfigKey::default(); n + 2];
        let mut values = vec![0u32; n + 2];
        keys[0] = ConfigKey::with_count(true, KeyType::None, ValueType::Root, n as u32);
        values[0] = data_offset as u32;

        let mut state = EmitState {
            large_offset: data_offset,
            tail_offset: total,
        };
        let written = emit_container(
            &root,
            &mut keys,
            &mut values,
            1,
            &interner,
            &mut blob,
            &mut state,
        );
        debug_assert_eq!(written, n, "emit pass disagrees with size pass");
        debug_assert_eq!(
            state.large_offset, data_offset + totals.large_bytes,
            "large payload accounting mismatch"
        );
        debug_assert_eq!(
            state.tail_offset,
            total - totals.tail_bytes,
            "tail payload accounting mismatch"
        );

        let mut off = 8;
        for key in &keys {
            blob[off..off + 4].copy_from_slice(&key.0.to_le_bytes());
            off += 4;
        }
        for value in &values {
            blob[off..off + 4].copy_from_slice(&value.to_le_bytes());
            off += 4;
        }
        blob
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder::new()
    }
}

fn object_entry_index(container: &Rc<RefCell<Container>>, key: &str) -> usize {
    assert!(key.len() <= 255, "config keys are limited to 255 bytes");
    let mut c = container.borrow_mut();
    debug_assert_eq!(c.kind, ContainerKind::Object);

    if let Some(index) = c.entries.iter().position(|e| e.key.as_deref() == Some(key)) {
        return index;
    }
    c.entries.push(Entry {
        key: Some(key.to_string()),
        value: Value::None,
    });
    c.entries.len() - 1
}

/// A shared handle to a container subtree, used to alias one subtree under
/// several parents.
pub struct SharedContainer(Rc<RefCell<Container>>);

/// Cursor aliasing a single entry inside a container. Creating a cursor
/// keeps the container alive; dropping it releases the reference.
pub struct ConfigCursor {
    container: Rc<RefCell<Container>>,
    index: usize,
}

impl ConfigCursor {
    /// Container reference of this entry, materializing it when unset.
    fn container_value(&self, kind: ContainerKind) -> Rc<RefCell<Container>> {
        let mut c = self.container.borrow_mut();
        let entry = &mut c.entries[self.index];

        if matches!(entry.value, Value::None) {
            entry.value = Value::Container(new_container(kind));
        }

        match &entry.value {
            Value::Container(sub) => {
                assert_eq!(
                    sub.borrow().kind,
                    kind,
                    "config entry is a container of the other kind"
                );
                Rc::clone(sub)
            }
            _ => panic!("config entry holds a value, not a container"),
        }
    }

    /// Get or create a child entry, treating this entry as an object.
    pub fn entry(&self, key: &str) -> ConfigCursor {
        let container = self.container_value(ContainerKind::Object);
        let index = object_entry_index(&container, key);
        ConfigCursor { container, index }
    }

    /// Get or create a table slot, filling holes with `None` entries.
    /// `u32::MAX` appends past the current end.
    pub fn at(&self, index: u32) -> ConfigCursor {
        let container = self.container_value(ContainerKind::Table);
        let slot = {
            let mut c = container.borrow_mut();
            let slot = if index == u32::MAX {
                c.entries.len()
            } else {
                index as usize
            };
            while c.entries.len() <= slot {
                c.entries.push(Entry {
                    key: None,
                    value: Value::None,
                });
            }
            slot
        };
        ConfigCursor {
            container,
            index: slot,
        }
    }

    fn set_value(&self, value: Value) {
        let mut c = self.container.borrow_mut();
        // Drops the previous value; a container subtree is destroyed once
        // its last alias goes away.
        c.entries[self.index].value = value;
    }

    pub fn set_bool(&self, value: bool) {
        self.set_value(Value::Bool(value));
    }

    pub fn set_u8(&self, value: u8) {
        self.set_value(Value::U8(value));
    }

    pub fn set_u16(&self, value: u16) {
        self.set_value(Value::U16(value));
    }

    pub fn set_u32(&self, value: u32) {
        self.set_value(Value::U32(value));
    }

    pub fn set_u64(&self, value: u64) {
        self.set_value(Value::U64(value));
    }

    pub fn set_i8(&self, value: i8) {
        self.set_value(Value::I8(value));
    }

    pub fn set_i16(&self, value: i16) {
        self.set_value(Value::I16(value));
    }

    pub fn set_i32(&self, value: i32) {
        self.set_value(Value::I32(value));
    }

    pub fn set_i64(&self, value: i64) {
        self.set_value(Value::I64(value));
    }

    pub fn set_f32(&self, value: f32) {
        self.set_value(Value::F32(value));
    }

    pub fn set_f64(&self, value: f64) {
        self.set_value(Value::F64(value));
    }

    pub fn set_str(&self, value: &str) {
        self.set_value(Value::Str(value.to_string()));
    }

    pub fn set_blob(&self, value: &[u8]) {
        self.set_value(Value::Blob(value.to_vec()));
    }

    /// Force this entry into an (empty if new) object container.
    pub fn make_object(&self) {
        self.container_value(ContainerKind::Object);
    }

    /// Force this entry into an (empty if new) table container.
    pub fn make_table(&self) {
        self.container_value(ContainerKind::Table);
    }

    /// Clear this entry back to `None`, releasing any container subtree.
    pub fn reset(&self) {
        self.set_value(Value::None);
    }

    /// Share the container stored at this entry.
    pub fn share(&self) -> Result<SharedContainer, ConfigError> {
        let c = self.container.borrow();
        match &c.entries[self.index].value {
            Value::Container(sub) => Ok(SharedContainer(Rc::clone(sub))),
            _ => Err(ConfigError::InvalidArgument),
        }
    }

    /// Assign an already-built container as this entry's value, bumping its
    /// reference count. Rejects assignments that would close a cycle.
    pub fn set_shared(&self, shared: &SharedContainer) -> Result<(), ConfigError> {
        if reaches(&shared.0, &self.container) {
            return Err(ConfigError::ContainerCycle);
        }
        self.set_value(Value::Container(Rc::clone(&shared.0)));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Finalization

#[derive(Default)]
struct KeyInterner {
    map: HashMap<String, usize>,
    /// First-seen order; offsets are assigned as text accumulates.
    order: Vec<String>,
    offsets: Vec<usize>,
    total_len: usize,
}

impl KeyInterner {
    fn intern(&mut self, key: &str) {
        if self.map.contains_key(key) {
            return;
        }
        self.map.insert(key.to_string(), self.order.len());
        self.order.push(key.to_string());
        self.offsets.push(self.total_len);
        self.total_len += key.len();
    }

    fn lookup(&self, key: &str) -> (u32, u32) {
        let index = self.map[key];
        (self.offsets[index] as u32, key.len() as u32)
    }
}

#[derive(Default)]
struct SizeTotals {
    entries: u32,
    large_bytes: usize,
    tail_bytes: usize,
}

fn measure(container: &Container, interner: &mut KeyInterner, totals: &mut SizeTotals) {
    for entry in &container.entries {
        totals.entries += 1;
        if container.kind == ContainerKind::Object {
            interner.intern(entry.key.as_deref().expect("object entry without key"));
        }

        match &entry.value {
            Value::Container(sub) => measure(&sub.borrow(), interner, totals),
            Value::Str(s) => totals.tail_bytes += s.len() + 1,
            Value::Blob(b) => totals.large_bytes += align_to(4 + b.len(), Alignment::B8),
            Value::U64(_) | Value::I64(_) | Value::F64(_) => totals.large_bytes += 8,
            _ => {}
        }
    }
}

struct EmitState {
    /// Next 8-byte payload slot, absolute. Stays 8-aligned.
    large_offset: usize,
    /// Strings grow from here toward the head; starts at the blob end.
    tail_offset: usize,
}

fn emit_large(blob: &mut [u8], state: &mut EmitState, bytes: [u8; 8]) -> u32 {
    debug_assert_eq!(state.large_offset % 8, 0);
    let offset = state.large_offset;
    blob[offset..offset + 8].copy_from_slice(&bytes);
    state.large_offset += 8;
    offset as u32
}

fn emit_container(
    container: &Container,
    keys: &mut [ConfigKey],
    values: &mut [u32],
    base: usize,
    interner: &KeyInterner,
    blob: &mut [u8],
    state: &mut EmitState,
) -> usize {
    let len = container.entries.len();

    // Sibling keys first so each container's children form one run.
    for (i, entry) in container.entries.iter().enumerate() {
        let vtype = entry.value.value_type();
        let (ktype, offset, size) = if container.kind == ContainerKind::Object {
            let key = entry.key.as_deref().expect("object entry without key");
            let (offset, size) = interner.lookup(key);
            (KeyType::String, offset, size)
        } else {
            (KeyType::None, 0, 0)
        };
        keys[base + i] = ConfigKey::new(i + 1 < len, ktype, vtype, offset, size);
    }

    if container.kind == ContainerKind::Table {
        // The table length rides in the first key's offset/size fields.
        let head = keys[base];
        keys[base] = ConfigKey::with_count(
            head.next(),
            KeyType::None,
            head.vtype().expect("emitted key has a valid vtype"),
            len as u32,
        );
    }

    let mut child_base = base + len;
    for (i, entry) in container.entries.iter().enumerate() {
        let idx = base + i;
        match &entry.value {
            Value::None => {}
            Value::Bool(v) => values[idx] = *v as u32,
            Value::U8(v) => values[idx] = *v as u32,
            Value::U16(v) => values[idx] = *v as u32,
            Value::U32(v) => values[idx] = *v,
            Value::I8(v) => values[idx] = *v as u8 as u32,
            Value::I16(v) => values[idx] = *v as u16 as u32,
            Value::I32(v) => values[idx] = *v as u32,
            Value::F32(v) => values[idx] = v.to_bits(),
            Value::U64(v) => values[idx] = emit_large(blob, state, v.to_le_bytes()),
            Value::I64(v) => values[idx] = emit_large(blob, state, v.to_le_bytes()),
            Value::F64(v) => values[idx] = emit_large(blob, state, v.to_bits().to_le_bytes()),
            Value::Str(s) => {
                // Strings pack from the tail; the terminator of this string
                // is the byte before the previously written one.
                blob[state.tail_offset - 1] = 0;
                state.tail_offset -= s.len() + 1;
                values[idx] = state.tail_offset as u32;
                blob[state.tail_offset..state.tail_offset + s.len()]
                    .copy_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                debug_assert_eq!(state.large_offset % 8, 0);
                values[idx] = state.large_offset as u32;
                let at = state.large_offset;
                blob[at..at + 4].copy_from_slice(&(b.len() as u32).to_le_bytes());
                blob[at + 4..at + 4 + b.len()].copy_from_slice(b);
                state.large_offset += align_to(4 + b.len(), Alignment::B8);
            }
            Value::Container(sub) => {
                let sub = sub.borrow();
                if sub.entries.is_empty() {
                    values[idx] = EMPTY_CONTAINER;
                } else {
                    values[idx] = (child_base - idx) as u32;
                    child_base += emit_container(
                        &sub, keys, values, child_base, interner, blob, state,
                    );
                }
            }
        }
    }

    child_base - base
}
