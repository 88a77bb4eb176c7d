// reader.rs - navigation and typed reads over a frozen config blob
//
// Key text is interned, so lookups resolve a search name to its interned
// offset once per path segment; the sibling scan itself compares key
// offsets and sizes as integers, never text. Every typed access validates
// the stored value-type tag.

use super::types::{ConfigKey, KeyType, ValueType, EMPTY_CONTAINER};
use super::ConfigError;

/// Immutable view over a finalized config blob.
#[derive(Copy, Clone, Debug)]
pub struct Config<'a> {
    bytes: &'a [u8],
    /// Entry count, excluding the synthetic root and the sentinel.
    count: usize,
    data_offset: usize,
}

impl<'a> Config<'a> {
    pub fn from_slice(bytes: &'a [u8]) -> Result<Config<'a>, ConfigError> {
        if bytes.is_empty() {
            return Err(ConfigError::NullPointerData);
        }
        if bytes.len() < 8 {
            return Err(ConfigError::InvalidArgument);
        }

        let total = read_u32(bytes, 0)? as usize;
        let data_offset = read_u32(bytes, 4)? as usize;
        if total < 8 || total > bytes.len() || data_offset > total {
            return Err(ConfigError::InvalidArgument);
        }

        let config = Config {
            bytes: &bytes[..total],
            count: 0,
            data_offset,
        };

        let root = config.key(0)?;
        if root.vtype() != Some(ValueType::Root) {
            return Err(ConfigError::InvalidArgument);
        }

        let count = root.count() as usize;
        if 8 + 8 * (count + 2) > data_offset {
            return Err(ConfigError::InvalidArgument);
        }

        Ok(Config { count, ..config })
    }

    pub fn entry_count(&self) -> usize {
        self.count
    }

    fn key(&self, index: usize) -> Result<ConfigKey, ConfigError> {
        Ok(ConfigKey(read_u32(self.bytes, 8 + 4 * index)?))
    }

    fn value(&self, index: usize) -> Result<u32, ConfigError> {
        read_u32(self.bytes, 8 + 4 * (self.count + 2) + 4 * index)
    }

    fn keystrings_base(&self) -> usize {
        8 + 8 * (self.count + 2)
    }

    /// The interned key text area between the value table and the payload.
    fn keystrings_region(&self) -> &'a [u8] {
        self.bytes
            .get(self.keystrings_base()..self.data_offset)
            .unwrap_or(&[])
    }

    #[cfg(test)]
    fn key_text(&self, key: ConfigKey) -> Result<&'a str, ConfigError> {
        let start = self.keystrings_base() + key.offset() as usize;
        let end = start + key.size() as usize;
        let bytes = self
            .bytes
            .get(start..end)
            .ok_or(ConfigError::InvalidArgument)?;
        std::str::from_utf8(bytes).map_err(|_| ConfigError::InvalidArgument)
    }

    /// Offsets in the interned region where `name`'s bytes occur. The
    /// canonical interned entry of an existing key is always among them;
    /// extra hits are substrings of longer keys and simply never match a
    /// sibling's offset field.
    fn interned_candidates(&self, name: &str) -> Vec<u32> {
        let region = self.keystrings_region();
        let needle = name.as_bytes();
        if needle.is_empty() || needle.len() > region.len() {
            return Vec::new();
        }
        (0..=region.len() - needle.len())
            .filter(|&at| &region[at..at + needle.len()] == needle)
            .map(|at| at as u32)
            .collect()
    }

    /// Index of the first child entry, or `None` for an empty container.
    fn first_child(&self, index: usize) -> Result<Option<usize>, ConfigError> {
        if index == 0 {
            return Ok(if self.count > 0 { Some(1) } else { None });
        }
        let relative = self.value(index)?;
        if relative == EMPTY_CONTAINER {
            return Ok(None);
        }
        Ok(Some(index + relative as usize))
    }

    fn find(&self, path: &str) -> Result<usize, ConfigError> {
        let mut current = 0usize;

        for segment in path.split(['/', '.']).filter(|s| !s.is_empty()) {
            let vtype = if current == 0 {
                ValueType::Root
            } else {
                self.key(current)?
                    .vtype()
                    .ok_or(ConfigError::InvalidArgument)?
            };

            let first = match vtype {
                ValueType::Root | ValueType::Object | ValueType::Table => {
                    self.first_child(current)?.ok_or_else(|| {
                        ConfigError::ResourceNotFound {
                            path: path.to_string(),
                        }
                    })?
                }
                _ => {
                    return Err(ConfigError::ResourceNotFound {
                        path: path.to_string(),
                    })
                }
            };

            current = if vtype == ValueType::Table {
                let wanted: usize =
                    segment
                        .parse()
                        .map_err(|_| ConfigError::ResourceNotFound {
                            path: path.to_string(),
                        })?;
                self.nth_sibling(first, wanted, path)?
            } else {
                self.named_sibling(first, segment, path)?
            };
        }

        if current == 0 {
            return Err(ConfigError::ResourceNotFound {
                path: path.to_string(),
            });
        }
        Ok(current)
    }

    fn named_sibling(
        &self,
        first: usize,
        name: &str,
        path: &str,
    ) -> Result<usize, ConfigError> {
        // Resolve the name to its interned location once; keys interning
        // means equal text shares one offset, so the scan below compares
        // nothing but integers.
        let candidates = self.interned_candidates(name);
        let size = name.len() as u32;
        if candidates.is_empty() {
            return Err(ConfigError::ResourceNotFound {
                path: path.to_string(),
            });
        }

        let mut index = first;
        loop {
            let key = self.key(index)?;
            if key.ktype() == KeyType::String
                && key.size() == size
                && candidates.contains(&key.offset())
            {
                return Ok(index);
            }
            if !key.next() {
                return Err(ConfigError::ResourceNotFound {
                    path: path.to_string(),
                });
            }
            index += 1;
        }
    }

    fn nth_sibling(&self, first: usize, wanted: usize, path: &str) -> Result<usize, ConfigError> {
        let mut index = first;
        let mut position = 0usize;
        loop {
            if position == wanted {
                return Ok(index);
            }
            if !self.key(index)?.next() {
                return Err(ConfigError::ResourceNotFound {
                    path: path.to_string(),
                });
            }
            index += 1;
            position += 1;
        }
    }

    fn typed(&self, path: &str, expected: ValueType) -> Result<u32, ConfigError> {
        let index = self.find(path)?;
        let found = self
            .key(index)?
            .vtype()
            .ok_or(ConfigError::InvalidArgument)?;
        if found != expected {
            return Err(ConfigError::WrongValueType {
                path: path.to_string(),
                found,
                expected,
            });
        }
        self.value(index)
    }

    fn large(&self, path: &str, expected: ValueType) -> Result<[u8; 8], ConfigError> {
        let offset = self.typed(path, expected)? as usize;
        let bytes = self
            .bytes
            .get(offset..offset + 8)
            .ok_or(ConfigError::InvalidArgument)?;
        Ok(bytes.try_into().expect("slice of length 8"))
    }

    pub fn value_type(&self, path: &str) -> Result<ValueType, ConfigError> {
        let index = self.find(path)?;
        self.key(index)?.vtype().ok_or(ConfigError::InvalidArgument)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.find(path).is_ok()
    }

    /// Number of entries in a table container.
    pub fn table_len(&self, path: &str) -> Result<u32, ConfigError> {
        let index = self.find(path)?;
        let key = self.key(index)?;
        if key.vtype() != Some(ValueType::Table) {
            return Err(ConfigError::WrongValueType {
                path: path.to_string(),
                found: key.vtype().ok_or(ConfigError::InvalidArgument)?,
                expected: ValueType::Table,
            });
        }
        match self.first_child(index)? {
            Some(first) => Ok(self.key(first)?.count()),
            None => Ok(0),
        }
    }

    pub fn get_bool(&self, path: &str) -> Result<bool, ConfigError> {
        Ok(self.typed(path, ValueType::Bool)? != 0)
    }

    pub fn get_u8(&self, path: &str) -> Result<u8, ConfigError> {
        Ok(self.typed(path, ValueType::U8)? as u8)
    }

    pub fn get_u16(&self, path: &str) -> Result<u16, ConfigError> {
        Ok(self.typed(path, ValueType::U16)? as u16)
    }

    pub fn get_u32(&self, path: &str) -> Result<u32, ConfigError> {
        self.typed(path, ValueType::U32)
    }

    pub fn get_u64(&self, path: &str) -> Result<u64, ConfigError> {
        Ok(u64::from_le_bytes(self.large(path, ValueType::U64)?))
    }

    pub fn get_i8(&self, path: &str) -> Result<i8, ConfigError> {
        Ok(self.typed(path, ValueType::I8)? as u8 as i8)
    }

    pub fn get_i16(&self, path: &str) -> Result<i16, ConfigError> {
        Ok(self.typed(path, ValueType::I16)? as u16 as i16)
    }

    pub fn get_i32(&self, path: &str) -> Result<i32, ConfigError> {
        Ok(self.typed(path, ValueType::I32)? as i32)
    }

    pub fn get_i64(&self, path: &str) -> Result<i64, ConfigError> {
        Ok(i64::from_le_bytes(self.large(path, ValueType::I64)?))
    }

    pub fn get_f32(&self, path: &str) -> Result<f32, ConfigError> {
        Ok(f32::from_bits(self.typed(path, ValueType::F32)?))
    }

    pub fn get_f64(&self, path: &str) -> Result<f64, ConfigError> {
        Ok(f64::from_bits(u64::from_le_bytes(
            self.large(path, ValueType::F64)?,
        )))
    }

    pub fn get_str(&self, path: &str) -> Result<&'a str, ConfigError> {
        let offset = self.typed(path, ValueType::String)? as usize;
        let tail = self
            .bytes
            .get(offset..)
            .ok_or(ConfigError::InvalidArgument)?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(ConfigError::InvalidArgument)?;
        std::str::from_utf8(&tail[..end]).map_err(|_| ConfigError::InvalidArgument)
    }

    pub fn get_blob(&self, path: &str) -> Result<&'a [u8], ConfigError> {
        let offset = self.typed(path, ValueType::Blob)? as usize;
        let len = read_u32(self.bytes, offset)? as usize;
        self.bytes
            .get(offset + 4..offset + 4 + len)
            .ok_or(ConfigError::InvalidArgument)
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, ConfigError> {
    let slice = bytes
        .get(offset..offset + 4)
        .ok_or(ConfigError::InvalidArgument)?;
    Ok(u32::from_le_bytes(slice.try_into().expect("length 4")))
}
