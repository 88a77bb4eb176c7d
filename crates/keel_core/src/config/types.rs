// types.rs - packed key/value words of the frozen config blob

use bytemuck::{Pod, Zeroable};

/// How an entry is addressed inside its parent container.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    None = 0,
    String = 1,
}

/// Value type tag stored in the packed key.
///
/// Discriminants are ordered so the writer and reader can range-check:
/// everything below `U64` is stored inline in the value word, `U64..=F64`
/// live as 8-byte payloads, `String`/`Blob` reference the payload area and
/// `Object`/`Table` are containers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    None = 0,
    Bool = 1,
    U8 = 2,
    U16 = 3,
    U32 = 4,
    I8 = 5,
    I16 = 6,
    I32 = 7,
    F32 = 8,
    U64 = 9,
    I64 = 10,
    F64 = 11,
    String = 12,
    Blob = 13,
    Object = 16,
    Table = 17,
    Root = 18,
}

impl ValueType {
    pub fn from_raw(raw: u8) -> Option<ValueType> {
        Some(match raw {
            0 => ValueType::None,
            1 => ValueType::Bool,
            2 => ValueType::U8,
            3 => ValueType::U16,
            4 => ValueType::U32,
            5 => ValueType::I8,
            6 => ValueType::I16,
            7 => ValueType::I32,
            8 => ValueType::F32,
            9 => ValueType::U64,
            10 => ValueType::I64,
            11 => ValueType::F64,
            12 => ValueType::String,
            13 => ValueType::Blob,
            16 => ValueType::Object,
            17 => ValueType::Table,
            18 => ValueType::Root,
            _ => return None,
        })
    }

    /// Stored as an 8-byte payload instead of inline in the value word.
    pub fn is_large(self) -> bool {
        matches!(self, ValueType::U64 | ValueType::I64 | ValueType::F64)
    }

    pub fn is_container(self) -> bool {
        matches!(self, ValueType::Object | ValueType::Table | ValueType::Root)
    }
}

/// Packed key word: `{ next:1, ktype:2, vtype:5, offset:16, size:8 }`.
///
/// `offset`/`size` address the interned key text for object entries. The
/// synthetic root key and the first key of a table reuse the two fields to
/// carry an entry count as `(count >> 8, count & 0xff)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct ConfigKey(pub u32);

const OFFSET_MAX: u32 = 0xFFFF;
const SIZE_MAX: u32 = 0xFF;

impl ConfigKey {
    pub fn new(next: bool, ktype: KeyType, vtype: ValueType, offset: u32, size: u32) -> ConfigKey {
        debug_assert!(offset <= OFFSET_MAX, "key offset out of range");
        debug_assert!(size <= SIZE_MAX, "key size out of range");
        ConfigKey(
            (next as u32)
                | ((ktype as u32) << 1)
                | ((vtype as u32) << 3)
                | ((offset & OFFSET_MAX) << 8)
                | ((size & SIZE_MAX) << 24),
        )
    }

    /// Key word carrying an entry count (root and table-head keys).
    pub fn with_count(next: bool, ktype: KeyType, vtype: ValueType, count: u32) -> ConfigKey {
        ConfigKey::new(next, ktype, vtype, count >> 8, count & SIZE_MAX)
    }

    pub fn next(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn ktype(self) -> KeyType {
        if (self.0 >> 1) & 0b11 == 1 {
            KeyType::String
        } else {
            KeyType::None
        }
    }

    pub fn vtype_raw(self) -> u8 {
        ((self.0 >> 3) & 0b1_1111) as u8
    }

    pub fn vtype(self) -> Option<ValueType> {
        ValueType::from_raw(self.vtype_raw())
    }

    pub fn offset(self) -> u32 {
        (self.0 >> 8) & OFFSET_MAX
    }

    pub fn size(self) -> u32 {
        (self.0 >> 24) & SIZE_MAX
    }

    pub fn count(self) -> u32 {
        (self.offset() << 8) | self.size()
    }
}

/// Value word. Inline scalar bits, or an offset into the payload area, or a
/// relative entry index for containers (`u32::MAX` = empty container).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct ConfigValue {
    pub internal: u32,
}

/// `Value.internal` marker for containers with no entries.
pub const EMPTY_CONTAINER: u32 = u32::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_packing_roundtrip() {
        let key = ConfigKey::new(true, KeyType::String, ValueType::F64, 513, 37);
        assert!(key.next());
        assert_eq!(key.ktype(), KeyType::String);
        assert_eq!(key.vtype(), Some(ValueType::F64));
        assert_eq!(key.offset(), 513);
        assert_eq!(key.size(), 37);
    }

    #[test]
    fn test_key_count_packing() {
        let key = ConfigKey::with_count(true, KeyType::None, ValueType::Root, 0x1234);
        assert_eq!(key.count(), 0x1234);
        assert_eq!(key.offset(), 0x12);
        assert_eq!(key.size(), 0x34);
    }

    #[test]
    fn test_value_type_thresholds() {
        assert!(!ValueType::U32.is_large());
        assert!(ValueType::U64.is_large());
        assert!(ValueType::F64.is_large());
        assert!(!ValueType::String.is_large());
        assert!(ValueType::Object.is_container());
        assert!(ValueType::Table.is_container());
        assert!(!ValueType::Blob.is_container());
    }
}
