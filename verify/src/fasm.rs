//! Block RAM initialization lines of a FASM file.
//!
//! A RAMB18 half (`Y0` or `Y1`) of a BRAM tile is described by 64 `INIT_xx`
//! lines and 8 `INITP_xx` lines of 256 bits each:
//!
//! ```text
//! BRAM_L_X6Y5.RAMB18_Y0.INIT_00[255:0] = 256'b1101...
//! ```
//!
//! The value is written most significant bit first with leading zeros
//! dropped, and lines that are entirely zero may be left out.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::sync::LazyLock;

use bitvec::prelude::*;
use enum_map::{Enum, EnumMap};
use regex::Regex;
use simple_error::simple_error;

/// Width of one INIT/INITP line.
pub const LINE_BITS: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Enum)]
pub enum Half {
    Y0,
    Y1,
}

impl Half {
    pub fn from_index(idx: usize) -> Option<Half> {
        match idx {
            0 => Some(Half::Y0),
            1 => Some(Half::Y1),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Half::Y0 => 0,
            Half::Y1 => 1,
        }
    }
}

impl Display for Half {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Y{}", self.index())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Enum)]
pub enum LineKind {
    Init,
    InitP,
}

impl LineKind {
    pub fn from_parity(parity: bool) -> LineKind {
        if parity {
            LineKind::InitP
        } else {
            LineKind::Init
        }
    }

    pub fn is_parity(self) -> bool {
        self == LineKind::InitP
    }

    /// Number of lines of this kind in one half.
    pub fn expected_lines(self) -> usize {
        match self {
            LineKind::Init => 64,
            LineKind::InitP => 8,
        }
    }
}

impl Display for LineKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LineKind::Init => write!(f, "INIT"),
            LineKind::InitP => write!(f, "INITP"),
        }
    }
}

/// What to do with the lines missing after the last line present for a tile.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Backfill {
    /// Omitted lines are all zero; fill up to the full line count.
    #[default]
    Zeros,
    /// Keep exactly the lines present in the file.
    Off,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FasmErrorKind {
    /// The line does not look like `TILE.SITE.INIT_xx[..] = n'b...`.
    Malformed,
    /// The value is not a binary string of at most 256 digits.
    BadValue,
    /// The line index differs from the number of lines seen so far.
    LineOrder { expected: usize, found: usize },
    /// More lines than a half can hold.
    TooManyLines,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FasmError {
    pub kind: FasmErrorKind,
    pub tile: String,
    pub half: Half,
    pub line_kind: LineKind,
    pub line: String,
}

impl Display for FasmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{tile} {half}.{lk}: ",
            tile = self.tile,
            half = self.half,
            lk = self.line_kind
        )?;
        match self.kind {
            FasmErrorKind::Malformed => write!(f, "malformed line")?,
            FasmErrorKind::BadValue => write!(f, "bad value")?,
            FasmErrorKind::LineOrder { expected, found } => {
                write!(f, "line index {found:#04x} where {expected:#04x} was expected")?
            }
            FasmErrorKind::TooManyLines => write!(
                f,
                "more than {n} lines",
                n = self.line_kind.expected_lines()
            )?,
        }
        write!(f, " in {line:?}", line = self.line)
    }
}

impl Error for FasmError {}

/// Converts the textual value of a line into bits indexed by ascending bit
/// position.  The text is left-padded with zeros to [`LINE_BITS`] digits and
/// read from its end, since FASM writes the most significant bit first.
pub fn decode_init_value(value: &str) -> Option<BitVec> {
    if value.len() > LINE_BITS {
        return None;
    }
    let mut res = bitvec![0; LINE_BITS];
    for (i, c) in value.bytes().rev().enumerate() {
        match c {
            b'0' => (),
            b'1' => res.set(i, true),
            _ => return None,
        }
    }
    Some(res)
}

/// Inverse of [`decode_init_value`]: renders bits as a full-width,
/// most-significant-first binary string.
pub fn encode_init_value(bits: &BitSlice) -> String {
    bits.iter()
        .rev()
        .map(|b| if *b { '1' } else { '0' })
        .collect()
}

static INIT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^.\s]+\.[^.\s]+\.INITP?_([0-9A-Fa-f]{2})\[[0-9:]+\]\s*=\s*[0-9]+'b([0-9A-Za-z]*)$")
        .unwrap()
});

/// Rebuilds the lines of one tile from the raw lines of one half and kind.
///
/// An empty `lines` means the file has no lines of this half and kind at all
/// and gives an empty result regardless of `backfill`.
pub fn reconstruct(
    lines: &[String],
    half: Half,
    kind: LineKind,
    tile: &str,
    backfill: Backfill,
) -> Result<Vec<BitVec>, FasmError> {
    if lines.is_empty() {
        return Ok(vec![]);
    }
    let mut res = vec![];
    for line in lines {
        let line = line.trim_end();
        if line.split('.').next() != Some(tile) {
            continue;
        }
        let err = |ek| FasmError {
            kind: ek,
            tile: tile.to_string(),
            half,
            line_kind: kind,
            line: line.to_string(),
        };
        let Some(cap) = INIT_LINE.captures(line) else {
            return Err(err(FasmErrorKind::Malformed));
        };
        let Ok(idx) = usize::from_str_radix(&cap[1], 16) else {
            return Err(err(FasmErrorKind::Malformed));
        };
        if idx != res.len() {
            return Err(err(FasmErrorKind::LineOrder {
                expected: res.len(),
                found: idx,
            }));
        }
        if idx >= kind.expected_lines() {
            return Err(err(FasmErrorKind::TooManyLines));
        }
        let Some(bits) = decode_init_value(&cap[2]) else {
            return Err(err(FasmErrorKind::BadValue));
        };
        res.push(bits);
    }
    if backfill == Backfill::Zeros {
        while res.len() < kind.expected_lines() {
            res.push(bitvec![0; LINE_BITS]);
        }
    }
    Ok(res)
}

/// Raw INIT/INITP lines of a FASM file, bucketed by half and kind in file
/// order.
#[derive(Clone, Debug, Default)]
pub struct InitLines {
    pub lines: EnumMap<Half, EnumMap<LineKind, Vec<String>>>,
}

impl InitLines {
    pub fn extract(text: &str) -> InitLines {
        let mut res = InitLines::default();
        for line in text.lines() {
            for (half, marker, marker_p) in [
                (Half::Y0, "Y0.INIT", "Y0.INITP"),
                (Half::Y1, "Y1.INIT", "Y1.INITP"),
            ] {
                // the parity marker contains the plain one
                let kind = if line.contains(marker_p) {
                    LineKind::InitP
                } else if line.contains(marker) {
                    LineKind::Init
                } else {
                    continue;
                };
                res.lines[half][kind].push(line.to_string());
            }
        }
        res
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<InitLines, Box<dyn Error>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| simple_error!("cannot read {p}: {e}", p = path.display()))?;
        Ok(InitLines::extract(&text))
    }

    pub fn get(&self, half: Half, kind: LineKind) -> &[String] {
        &self.lines[half][kind]
    }

    pub fn reconstruct(
        &self,
        half: Half,
        kind: LineKind,
        tile: &str,
        backfill: Backfill,
    ) -> Result<Vec<BitVec>, FasmError> {
        reconstruct(self.get(half, kind), half, kind, tile, backfill)
    }
}

/// Decoded INIT/INITP lines of a single tile.
#[derive(Clone, Debug, Default)]
pub struct InitTable {
    pub lines: EnumMap<Half, EnumMap<LineKind, Vec<BitVec>>>,
}

impl InitTable {
    pub fn build(lines: &InitLines, tile: &str, backfill: Backfill) -> Result<InitTable, FasmError> {
        let mut res = InitTable::default();
        for (half, kinds) in &mut res.lines {
            for (kind, slot) in kinds {
                *slot = lines.reconstruct(half, kind, tile, backfill)?;
            }
        }
        Ok(res)
    }

    pub fn get(&self, half: Half, kind: LineKind) -> &[BitVec] {
        &self.lines[half][kind]
    }

    /// Bit `bit` of line `line`, or `None` if the line is not present.
    pub fn bit(&self, half: Half, kind: LineKind, line: usize, bit: usize) -> Option<bool> {
        self.lines[half][kind]
            .get(line)
            .and_then(|l| l.get(bit).map(|b| *b))
    }
}
