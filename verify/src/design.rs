use std::error::Error;
use std::path::{Path, PathBuf};

use bramcheck_bitstream::{FRAME_WORDS_7SERIES, Frames};
use indicatif::ProgressBar;
use simple_error::{bail, simple_error};
use walkdir::WalkDir;

use crate::cells::{Cell, load_cells};
use crate::fasm::{Backfill, InitLines};
use crate::initmem::read_mem_image;
use crate::mapping::{MAPPING_FILE, MappingTable};
use crate::verify::{DesignReport, Verifier, VerifyOptions};

/// Files making up one design directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesignPaths {
    pub name: String,
    pub dir: PathBuf,
    pub mdd: PathBuf,
    pub mem: PathBuf,
    pub fasm: PathBuf,
    pub bit: PathBuf,
    pub mapping: PathBuf,
}

impl DesignPaths {
    pub fn new(dir: impl AsRef<Path>) -> Result<DesignPaths, Box<dyn Error>> {
        let dir = dir.as_ref();
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            bail!("cannot determine design name of {p}", p = dir.display());
        };
        Ok(DesignPaths {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            mdd: dir.join(format!("{name}.mdd")),
            mem: dir.join("init").join("init.mem"),
            fasm: dir.join("real.fasm"),
            bit: dir.join("vivado").join(format!("{name}.bit")),
            mapping: dir.join(MAPPING_FILE),
        })
    }
}

#[derive(Clone, Debug)]
pub struct CheckOptions {
    pub memory: String,
    /// Memory width in bits; taken from the cells when not given.
    pub width: Option<usize>,
    pub verbose: bool,
    pub print_mappings: bool,
    pub backfill: Backfill,
    pub frame_words: usize,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            memory: "mem/ram".to_string(),
            width: None,
            verbose: false,
            print_mappings: false,
            backfill: Backfill::Zeros,
            frame_words: FRAME_WORDS_7SERIES,
        }
    }
}

/// Width of the memory covered by `cells`.
pub fn infer_width(cells: &[Cell]) -> Option<usize> {
    cells.iter().map(|cell| cell.slice_end + 1).max()
}

pub fn check_design(
    dir: impl AsRef<Path>,
    opts: &CheckOptions,
) -> Result<DesignReport, Box<dyn Error>> {
    let paths = DesignPaths::new(dir)?;
    let cells = load_cells(&paths.mdd, &opts.memory)?;
    let width = match opts.width {
        Some(width) => width,
        None => infer_width(&cells)
            .ok_or_else(|| simple_error!("{n}: cannot infer memory width", n = paths.name))?,
    };
    let image = read_mem_image(&paths.mem, width)?;

    println!("Loading mappings for {n}...", n = paths.name);
    let table = MappingTable::load(&paths.mapping, image.len(), width, &opts.memory)?;
    println!("  Done loading mappings");
    if opts.print_mappings {
        for mapping in table.sorted() {
            println!("  {mapping}");
        }
    }

    let frames = Frames::from_file(&paths.bit, opts.frame_words)
        .map_err(|e| simple_error!("{p}: {e}", p = paths.bit.display()))?;
    if opts.verbose {
        if let Some(header) = &frames.header {
            println!(
                "Bitstream: design {d} part {p} built {date} {time}",
                d = header.design,
                p = header.part,
                date = header.date,
                time = header.time
            );
        }
        if let Some(idcode) = frames.idcode {
            println!("Bitstream: IDCODE {idcode:08x}");
        }
        println!("Bitstream: {n} frames", n = frames.len());
    }
    let lines = InitLines::from_file(&paths.fasm)?;

    let verifier = Verifier::new(&paths.name, &cells, &image, &lines, &frames, &table)
        .with_options(VerifyOptions {
            verbose: opts.verbose,
            backfill: opts.backfill,
        });
    let report = verifier.run(|cell| {
        println!(
            "    Cell: {n} {tile} {typ} all checked out and correct!",
            n = paths.name,
            tile = cell.tile,
            typ = cell.typ
        );
    })?;
    Ok(report)
}

/// Subdirectories of `base_dir`, sorted by name.
pub fn design_dirs(base_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut res = vec![];
    for entry in WalkDir::new(base_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_dir() {
            res.push(entry.into_path());
        }
    }
    Ok(res)
}

/// Checks every design under `base_dir` in turn, stopping at the first one
/// that fails.
pub fn check_all(
    base_dir: impl AsRef<Path>,
    opts: &CheckOptions,
) -> Result<Vec<DesignReport>, Box<dyn Error>> {
    let dirs = design_dirs(base_dir)?;
    let pb = ProgressBar::new(dirs.len() as u64);
    let mut res = vec![];
    for dir in dirs {
        let report = pb.suspend(|| check_design(&dir, opts))?;
        res.push(report);
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(res)
}

#[test]
fn test_design_paths() {
    let paths = DesignPaths::new("/data/designs/512b18").unwrap();
    assert_eq!(paths.name, "512b18");
    assert_eq!(paths.mdd, Path::new("/data/designs/512b18/512b18.mdd"));
    assert_eq!(paths.mem, Path::new("/data/designs/512b18/init/init.mem"));
    assert_eq!(paths.fasm, Path::new("/data/designs/512b18/real.fasm"));
    assert_eq!(paths.bit, Path::new("/data/designs/512b18/vivado/512b18.bit"));
    assert_eq!(paths.mapping, Path::new("/data/designs/512b18/mapping.json"));
}

#[test]
fn test_infer_width() {
    let cells = crate::cells::parse_cells(
        "\
CELL mem/ram_reg_0
  TILE BRAM_L_X6Y5
  TYPE RAMB36E1
  ADDR_BEGIN 0
  ADDR_END 1023
  SLICE_BEGIN 0
  SLICE_END 31
ENDCELL
CELL mem/ram_reg_1
  TILE BRAM_L_X6Y10
  TYPE RAMB36E1
  ADDR_BEGIN 0
  ADDR_END 1023
  SLICE_BEGIN 32
  SLICE_END 35
ENDCELL
",
    )
    .unwrap();
    assert_eq!(infer_width(&cells), Some(36));
    assert_eq!(infer_width(&[]), None);
}
