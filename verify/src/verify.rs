//! The three-way comparison of a memory image against FASM and frame data.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use bramcheck_bitstream::Frames;
use itertools::iproduct;

use crate::cells::Cell;
use crate::fasm::{Backfill, FasmError, InitLines, InitTable};
use crate::initmem::MemImage;
use crate::mapping::{BitMapper, BitMapping};

#[derive(Clone, Copy, Debug, Default)]
pub struct VerifyOptions {
    /// Print every resolved mapping and the frame word it was checked against.
    pub verbose: bool,
    pub backfill: Backfill,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyErrorKind {
    Fasm(FasmError),
    /// The cell covers words or bits past the end of the memory image.
    OutOfRange {
        addr_end: usize,
        slice_end: usize,
        words: usize,
        width: usize,
    },
    /// No mapping for a bit the cell claims to hold.
    Unmapped { word: usize, bit: usize, width: usize },
    /// The mapping points at a FASM line that the file does not have.
    MissingFasmLine(BitMapping),
    /// The mapping points at a frame or frame word missing from the bitstream.
    MissingFrameBit(BitMapping),
    Mismatch {
        mapping: BitMapping,
        init: bool,
        fasm: bool,
        frame: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyError {
    pub design: String,
    pub tile: String,
    pub typ: String,
    pub kind: VerifyErrorKind,
}

impl VerifyError {
    /// The (word, bit) coordinate the error is about, if any.
    pub fn coord(&self) -> Option<(usize, usize)> {
        match self.kind {
            VerifyErrorKind::Fasm(_) | VerifyErrorKind::OutOfRange { .. } => None,
            VerifyErrorKind::Unmapped { word, bit, .. } => Some((word, bit)),
            VerifyErrorKind::MissingFasmLine(m)
            | VerifyErrorKind::MissingFrameBit(m)
            | VerifyErrorKind::Mismatch { mapping: m, .. } => Some((m.word, m.bit)),
        }
    }
}

impl Display for VerifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{design} cell {tile} {typ}: ",
            design = self.design,
            tile = self.tile,
            typ = self.typ
        )?;
        match &self.kind {
            VerifyErrorKind::Fasm(e) => write!(f, "{e}"),
            VerifyErrorKind::OutOfRange {
                addr_end,
                slice_end,
                words,
                width,
            } => write!(
                f,
                "reaches word {addr_end} bit {slice_end}, but the image is {words} words of {width} bits"
            ),
            VerifyErrorKind::Unmapped { word, bit, width } => {
                write!(f, "no mapping for word {word} bit {bit} (width {width})")
            }
            VerifyErrorKind::MissingFasmLine(m) => write!(
                f,
                "word {w} bit {b}: FASM has no {half}.{kind} line {line} ({m})",
                w = m.word,
                b = m.bit,
                half = m.half,
                kind = m.kind,
                line = m.line
            ),
            VerifyErrorKind::MissingFrameBit(m) => write!(
                f,
                "word {w} bit {b}: bitstream has no bit {off} in frame {frame:08x} ({m})",
                w = m.word,
                b = m.bit,
                off = m.offset,
                frame = m.frame
            ),
            VerifyErrorKind::Mismatch {
                mapping,
                init,
                fasm,
                frame,
            } => write!(
                f,
                "word {w} bit {b}: init={i} fasm={fa} frame={fr} ({mapping})",
                w = mapping.word,
                b = mapping.bit,
                i = u8::from(*init),
                fa = u8::from(*fasm),
                fr = u8::from(*frame)
            ),
        }
    }
}

impl Error for VerifyError {}

/// Outcome of a fully verified design.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesignReport {
    pub design: String,
    pub cells: usize,
    pub bits: usize,
}

pub struct Verifier<'a> {
    pub design: &'a str,
    pub cells: &'a [Cell],
    pub image: &'a MemImage,
    pub lines: &'a InitLines,
    pub frames: &'a Frames,
    pub mapper: &'a dyn BitMapper,
    pub opts: VerifyOptions,
}

impl<'a> Verifier<'a> {
    pub fn new(
        design: &'a str,
        cells: &'a [Cell],
        image: &'a MemImage,
        lines: &'a InitLines,
        frames: &'a Frames,
        mapper: &'a dyn BitMapper,
    ) -> Self {
        Verifier {
            design,
            cells,
            image,
            lines,
            frames,
            mapper,
            opts: VerifyOptions::default(),
        }
    }

    pub fn with_options(self, opts: VerifyOptions) -> Self {
        Verifier { opts, ..self }
    }

    fn error(&self, cell: &Cell, kind: VerifyErrorKind) -> VerifyError {
        VerifyError {
            design: self.design.to_string(),
            tile: cell.tile.clone(),
            typ: cell.typ.clone(),
            kind,
        }
    }

    /// Checks every bit of `cell` against an already decoded table.  Returns
    /// the number of bits checked.
    pub fn verify_cell_with(&self, cell: &Cell, table: &InitTable) -> Result<usize, VerifyError> {
        let width = self.image.width;
        if cell.addr_end >= self.image.len() || cell.slice_end >= width {
            return Err(self.error(
                cell,
                VerifyErrorKind::OutOfRange {
                    addr_end: cell.addr_end,
                    slice_end: cell.slice_end,
                    words: self.image.len(),
                    width,
                },
            ));
        }
        let mut num = 0;
        for (w, b) in iproduct!(cell.words(), cell.bits()) {
            let init = self.image.bit(w, b);
            let Some(mapping) = self.mapper.resolve(w, b, width) else {
                return Err(self.error(
                    cell,
                    VerifyErrorKind::Unmapped {
                        word: w,
                        bit: b,
                        width,
                    },
                ));
            };
            let Some(fasm) = table.bit(mapping.half, mapping.kind, mapping.line, mapping.line_bit)
            else {
                return Err(self.error(cell, VerifyErrorKind::MissingFasmLine(mapping)));
            };
            let Some(frame) = self.frames.bit(mapping.frame, mapping.offset) else {
                return Err(self.error(cell, VerifyErrorKind::MissingFrameBit(mapping)));
            };
            if self.opts.verbose {
                let frwd = self.frames.frame(mapping.frame).map_or(0, |f| f[mapping.offset / 32]);
                println!("Mapping: {mapping}");
                println!(
                    "Frame = {frame_addr:x} bitOffset = {off} frwd = {frwd:08x} frbit = {fb}",
                    frame_addr = mapping.frame,
                    off = mapping.offset,
                    fb = u8::from(frame)
                );
            }
            if init != fasm || init != frame {
                return Err(self.error(
                    cell,
                    VerifyErrorKind::Mismatch {
                        mapping,
                        init,
                        fasm,
                        frame,
                    },
                ));
            }
            num += 1;
        }
        Ok(num)
    }

    /// Rebuilds the FASM table for `cell` and checks all of its bits.
    pub fn verify_cell(&self, cell: &Cell) -> Result<usize, VerifyError> {
        let table = InitTable::build(self.lines, &cell.tile, self.opts.backfill)
            .map_err(|e| self.error(cell, VerifyErrorKind::Fasm(e)))?;
        self.verify_cell_with(cell, &table)
    }

    /// Checks all cells in order, calling `on_verified` after each one passes.
    /// Stops at the first failure.
    pub fn run(&self, mut on_verified: impl FnMut(&Cell)) -> Result<DesignReport, VerifyError> {
        let mut report = DesignReport {
            design: self.design.to_string(),
            ..Default::default()
        };
        for cell in self.cells {
            report.bits += self.verify_cell(cell)?;
            report.cells += 1;
            on_verified(cell);
        }
        Ok(report)
    }
}
