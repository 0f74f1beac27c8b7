//! Checks that the initial contents of a block RAM memory survive the trip
//! from the `.mem` image through the FASM file into the bitstream frames.

pub mod cells;
pub mod design;
pub mod fasm;
pub mod initmem;
pub mod mapping;
pub mod verify;

pub use bramcheck_bitstream::FRAME_WORDS_7SERIES;
pub use design::{CheckOptions, DesignPaths, check_all, check_design};
pub use fasm::Backfill;
pub use verify::{DesignReport, Verifier, VerifyError, VerifyErrorKind, VerifyOptions};
