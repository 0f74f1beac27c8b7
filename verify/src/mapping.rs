use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::Path;

use jzon::JsonValue;
use simple_error::{bail, simple_error};

use crate::fasm::{Half, LINE_BITS, LineKind};

/// Name of the mapping table file inside a design directory.
pub const MAPPING_FILE: &str = "mapping.json";

/// Where one logical memory bit lives in the FASM file and in the bitstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BitMapping {
    pub word: usize,
    pub bit: usize,
    pub half: Half,
    pub kind: LineKind,
    /// INIT/INITP line index.
    pub line: usize,
    /// Bit within the line.
    pub line_bit: usize,
    /// Frame address.
    pub frame: u32,
    /// Bit offset within the frame.
    pub offset: usize,
}

impl Display for BitMapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{w}:{b} -> {half}.{kind}_{line:02X}[{lb}] frame {frame:08x} offset {off}",
            w = self.word,
            b = self.bit,
            half = self.half,
            kind = self.kind,
            line = self.line,
            lb = self.line_bit,
            frame = self.frame,
            off = self.offset
        )
    }
}

/// Resolves logical (word, bit) coordinates of a memory `width` bits wide.
pub trait BitMapper {
    fn resolve(&self, word: usize, bit: usize, width: usize) -> Option<BitMapping>;
}

/// A precomputed mapping covering every bit of one memory.
#[derive(Clone, Debug, Default)]
pub struct MappingTable {
    pub memory: String,
    pub words: usize,
    pub width: usize,
    bits: HashMap<(usize, usize), BitMapping>,
}

impl MappingTable {
    pub fn new(memory: &str, words: usize, width: usize) -> Self {
        MappingTable {
            memory: memory.to_string(),
            words,
            width,
            bits: HashMap::new(),
        }
    }

    pub fn insert(&mut self, mapping: BitMapping) -> Result<(), Box<dyn Error>> {
        if mapping.word >= self.words || mapping.bit >= self.width {
            bail!("mapping {mapping} is outside the {w}x{b} memory", w = self.words, b = self.width);
        }
        if mapping.line >= mapping.kind.expected_lines() || mapping.line_bit >= LINE_BITS {
            bail!("mapping {mapping} points past the end of the {k} lines", k = mapping.kind);
        }
        if self.bits.insert((mapping.word, mapping.bit), mapping).is_some() {
            bail!("bit {w}:{b} mapped twice", w = mapping.word, b = mapping.bit);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// All mappings in (word, bit) order.
    pub fn sorted(&self) -> Vec<&BitMapping> {
        let mut res: Vec<_> = self.bits.values().collect();
        res.sort_by_key(|m| (m.word, m.bit));
        res
    }

    pub fn parse(data: &str) -> Result<MappingTable, Box<dyn Error>> {
        let json = jzon::parse(data)?;
        let field = |v: &JsonValue, name: &str| -> Result<usize, Box<dyn Error>> {
            v[name]
                .as_usize()
                .ok_or_else(|| simple_error!("missing or bad {n} field", n = name).into())
        };
        let Some(memory) = json["memory"].as_str() else {
            bail!("missing memory field");
        };
        let mut res = MappingTable::new(memory, field(&json, "words")?, field(&json, "width")?);
        if !json["bits"].is_array() {
            bail!("missing bits array");
        }
        for entry in json["bits"].members() {
            let half = field(entry, "half")?;
            let Some(half) = Half::from_index(half) else {
                bail!("bad half {h}", h = half);
            };
            let Some(parity) = entry["parity"].as_bool() else {
                bail!("missing or bad parity field");
            };
            let Some(frame) = entry["frame"].as_u32() else {
                bail!("missing or bad frame field");
            };
            res.insert(BitMapping {
                word: field(entry, "word")?,
                bit: field(entry, "bit")?,
                half,
                kind: LineKind::from_parity(parity),
                line: field(entry, "line")?,
                line_bit: field(entry, "line_bit")?,
                frame,
                offset: field(entry, "offset")?,
            })?;
        }
        Ok(res)
    }

    /// Loads a mapping table file and checks that it was made for the given
    /// memory and geometry.
    pub fn load(
        path: impl AsRef<Path>,
        words: usize,
        width: usize,
        memory: &str,
    ) -> Result<MappingTable, Box<dyn Error>> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| simple_error!("cannot read {p}: {e}", p = path.display()))?;
        let res = MappingTable::parse(&data)
            .map_err(|e| simple_error!("{p}: {e}", p = path.display()))?;
        if res.memory != memory {
            bail!(
                "{p}: mapping is for memory {m}, not {memory}",
                p = path.display(),
                m = res.memory
            );
        }
        if res.words != words || res.width != width {
            bail!(
                "{p}: mapping is for a {w}x{b} memory, not {words}x{width}",
                p = path.display(),
                w = res.words,
                b = res.width
            );
        }
        Ok(res)
    }
}

impl BitMapper for MappingTable {
    fn resolve(&self, word: usize, bit: usize, width: usize) -> Option<BitMapping> {
        if width != self.width {
            return None;
        }
        self.bits.get(&(word, bit)).copied()
    }
}

impl From<&BitMapping> for JsonValue {
    fn from(mapping: &BitMapping) -> Self {
        jzon::object! {
            word: mapping.word,
            bit: mapping.bit,
            half: mapping.half.index(),
            parity: mapping.kind.is_parity(),
            line: mapping.line,
            line_bit: mapping.line_bit,
            frame: mapping.frame,
            offset: mapping.offset,
        }
    }
}

impl From<&MappingTable> for JsonValue {
    fn from(table: &MappingTable) -> Self {
        jzon::object! {
            memory: table.memory.as_str(),
            words: table.words,
            width: table.width,
            bits: JsonValue::Array(table.sorted().into_iter().map(JsonValue::from).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(word: usize, bit: usize) -> BitMapping {
        BitMapping {
            word,
            bit,
            half: Half::Y1,
            kind: LineKind::InitP,
            line: word / 32,
            line_bit: (word % 32) * 8 + bit,
            frame: 0x00c00000 + word as u32,
            offset: 96 + bit,
        }
    }

    #[test]
    fn test_resolve() {
        let mut table = MappingTable::new("mem/ram", 4, 2);
        for w in 0..4 {
            for b in 0..2 {
                table.insert(mapping(w, b)).unwrap();
            }
        }
        assert_eq!(table.len(), 8);
        assert_eq!(table.resolve(3, 1, 2), Some(mapping(3, 1)));
        assert_eq!(table.resolve(3, 1, 4), None);
        assert_eq!(table.resolve(4, 0, 2), None);
    }

    #[test]
    fn test_insert_errors() {
        let mut table = MappingTable::new("mem/ram", 4, 2);
        table.insert(mapping(0, 0)).unwrap();
        assert!(table.insert(mapping(0, 0)).is_err());
        assert!(table.insert(mapping(4, 0)).is_err());
        assert!(table.insert(mapping(0, 2)).is_err());
        assert!(
            table
                .insert(BitMapping {
                    line: 8,
                    ..mapping(1, 0)
                })
                .is_err()
        );
        assert!(
            table
                .insert(BitMapping {
                    kind: LineKind::Init,
                    line_bit: 256,
                    ..mapping(1, 0)
                })
                .is_err()
        );
    }

    #[test]
    fn test_json() {
        let mut table = MappingTable::new("mem/ram", 2, 2);
        for w in 0..2 {
            for b in 0..2 {
                table.insert(mapping(w, b)).unwrap();
            }
        }
        let text = JsonValue::from(&table).dump();
        let parsed = MappingTable::parse(&text).unwrap();
        assert_eq!(parsed.memory, "mem/ram");
        assert_eq!((parsed.words, parsed.width), (2, 2));
        assert_eq!(parsed.sorted(), table.sorted());
    }

    #[test]
    fn test_parse_errors() {
        assert!(MappingTable::parse("{").is_err());
        assert!(MappingTable::parse(r#"{"words": 1, "width": 1, "bits": []}"#).is_err());
        assert!(
            MappingTable::parse(
                r#"{"memory": "m", "words": 1, "width": 1, "bits": [
                    {"word": 0, "bit": 0, "half": 2, "parity": false,
                     "line": 0, "line_bit": 0, "frame": 0, "offset": 0}]}"#
            )
            .is_err()
        );
        assert!(
            MappingTable::parse(
                r#"{"memory": "m", "words": 1, "width": 1, "bits": [
                    {"word": 0, "bit": 0, "half": 0, "parity": false,
                     "line": 0, "line_bit": 0, "offset": 0}]}"#
            )
            .is_err()
        );
    }
}
