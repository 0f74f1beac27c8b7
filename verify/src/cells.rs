use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;

use simple_error::{bail, simple_error};

/// A placed block RAM primitive and the slice of the logical memory it holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub name: String,
    pub tile: String,
    pub typ: String,
    pub addr_beg: usize,
    pub addr_end: usize,
    pub slice_beg: usize,
    pub slice_end: usize,
    pub kv: BTreeMap<String, String>,
}

impl Cell {
    pub fn words(&self) -> std::ops::RangeInclusive<usize> {
        self.addr_beg..=self.addr_end
    }

    pub fn bits(&self) -> std::ops::RangeInclusive<usize> {
        self.slice_beg..=self.slice_end
    }

    /// Whether this cell belongs to the given logical memory.
    pub fn is_part_of(&self, memory: &str) -> bool {
        match self.name.strip_prefix(memory) {
            Some(rest) => rest.is_empty() || rest.starts_with('_'),
            None => false,
        }
    }
}

#[derive(Default)]
struct CellBuilder {
    name: String,
    tile: Option<String>,
    typ: Option<String>,
    addr_beg: Option<usize>,
    addr_end: Option<usize>,
    slice_beg: Option<usize>,
    slice_end: Option<usize>,
    kv: BTreeMap<String, String>,
}

fn set_once<T>(slot: &mut Option<T>, val: T, key: &str, cell: &str) -> Result<(), Box<dyn Error>> {
    if slot.is_some() {
        bail!("cell {c}: duplicate {key}", c = cell);
    }
    *slot = Some(val);
    Ok(())
}

impl CellBuilder {
    fn set(&mut self, key: &str, val: &str) -> Result<(), Box<dyn Error>> {
        let num = || -> Result<usize, Box<dyn Error>> {
            val.parse()
                .map_err(|_| simple_error!("cell {c}: bad {key} value {val:?}", c = self.name).into())
        };
        match key {
            "TILE" => set_once(&mut self.tile, val.to_string(), key, &self.name)?,
            "TYPE" | "CELLTYPE" => set_once(&mut self.typ, val.to_string(), key, &self.name)?,
            "ADDR_BEGIN" | "BRAM_ADDR_BEGIN" => {
                let n = num()?;
                set_once(&mut self.addr_beg, n, key, &self.name)?
            }
            "ADDR_END" | "BRAM_ADDR_END" => {
                let n = num()?;
                set_once(&mut self.addr_end, n, key, &self.name)?
            }
            "SLICE_BEGIN" | "BRAM_SLICE_BEGIN" => {
                let n = num()?;
                set_once(&mut self.slice_beg, n, key, &self.name)?
            }
            "SLICE_END" | "BRAM_SLICE_END" => {
                let n = num()?;
                set_once(&mut self.slice_end, n, key, &self.name)?
            }
            _ => {
                if self.kv.insert(key.to_string(), val.to_string()).is_some() {
                    bail!("cell {c}: duplicate {key}", c = self.name);
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Cell, Box<dyn Error>> {
        let name = self.name;
        let missing = |key: &str| simple_error!("cell {n}: missing {key}", n = name);
        let cell = Cell {
            tile: self.tile.ok_or_else(|| missing("TILE"))?,
            typ: self.typ.ok_or_else(|| missing("TYPE"))?,
            addr_beg: self.addr_beg.ok_or_else(|| missing("ADDR_BEGIN"))?,
            addr_end: self.addr_end.ok_or_else(|| missing("ADDR_END"))?,
            slice_beg: self.slice_beg.ok_or_else(|| missing("SLICE_BEGIN"))?,
            slice_end: self.slice_end.ok_or_else(|| missing("SLICE_END"))?,
            kv: self.kv,
            name,
        };
        if cell.addr_beg > cell.addr_end {
            bail!(
                "cell {n}: address range {b}..{e} is empty",
                n = cell.name,
                b = cell.addr_beg,
                e = cell.addr_end
            );
        }
        if cell.slice_beg > cell.slice_end {
            bail!(
                "cell {n}: slice range {b}..{e} is empty",
                n = cell.name,
                b = cell.slice_beg,
                e = cell.slice_end
            );
        }
        Ok(cell)
    }
}

/// Parses the contents of an MDD file, returning every cell in file order.
pub fn parse_cells(data: &str) -> Result<Vec<Cell>, Box<dyn Error>> {
    let mut res = vec![];
    let mut cur: Option<CellBuilder> = None;
    for (lnum, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (kw, val) = match line.split_once(char::is_whitespace) {
            Some((kw, val)) => (kw, val.trim()),
            None => (line, ""),
        };
        match kw {
            "CELL" => {
                if let Some(cell) = &cur {
                    bail!("line {l}: CELL inside cell {c}", l = lnum + 1, c = cell.name);
                }
                if val.is_empty() {
                    bail!("line {l}: CELL without a name", l = lnum + 1);
                }
                cur = Some(CellBuilder {
                    name: val.to_string(),
                    ..Default::default()
                });
            }
            "ENDCELL" => {
                let Some(cell) = cur.take() else {
                    bail!("line {l}: ENDCELL outside a cell", l = lnum + 1);
                };
                res.push(cell.finish()?);
            }
            _ => match &mut cur {
                Some(cell) => cell.set(kw, val)?,
                None if matches!(kw, "DESIGN" | "PART") => (),
                None => bail!("line {l}: unexpected {kw} outside a cell", l = lnum + 1),
            },
        }
    }
    if let Some(cell) = cur {
        bail!("cell {c}: missing ENDCELL", c = cell.name);
    }
    Ok(res)
}

/// Loads the cells of one logical memory from an MDD file.
pub fn load_cells(mdd: impl AsRef<Path>, memory: &str) -> Result<Vec<Cell>, Box<dyn Error>> {
    let mdd = mdd.as_ref();
    let data = std::fs::read_to_string(mdd)
        .map_err(|e| simple_error!("cannot read {p}: {e}", p = mdd.display()))?;
    let cells: Vec<_> = parse_cells(&data)?
        .into_iter()
        .filter(|cell| cell.is_part_of(memory))
        .collect();
    if cells.is_empty() {
        bail!("no cells of memory {memory} in {p}", p = mdd.display());
    }
    Ok(cells)
}

#[cfg(test)]
const MDD: &str = "\
DESIGN 512b18
PART xc7a50tcsg324-1
CELL mem/ram_reg_0
  TILE BRAM_L_X6Y5
  CELLTYPE RAMB18E1
  LOC RAMB18_X0Y2
  BRAM_ADDR_BEGIN 0
  BRAM_ADDR_END 511
  BRAM_SLICE_BEGIN 0
  BRAM_SLICE_END 17
ENDCELL

# a different memory
CELL mem/ramb_reg_0
  TILE BRAM_L_X6Y10
  TYPE RAMB18E1
  ADDR_BEGIN 0
  ADDR_END 511
  SLICE_BEGIN 0
  SLICE_END 17
ENDCELL
";

#[test]
fn test_parse_cells() {
    let cells = parse_cells(MDD).unwrap();
    assert_eq!(cells.len(), 2);
    let cell = &cells[0];
    assert_eq!(cell.name, "mem/ram_reg_0");
    assert_eq!(cell.tile, "BRAM_L_X6Y5");
    assert_eq!(cell.typ, "RAMB18E1");
    assert_eq!(cell.words(), 0..=511);
    assert_eq!(cell.bits(), 0..=17);
    assert_eq!(cell.kv["LOC"], "RAMB18_X0Y2");
    assert!(cell.is_part_of("mem/ram"));
    assert!(!cells[1].is_part_of("mem/ram"));
    assert!(cells[1].is_part_of("mem/ramb"));
}

#[test]
fn test_parse_cells_errors() {
    assert!(parse_cells("CELL a\n TILE X\nENDCELL\n").is_err());
    assert!(parse_cells("TILE X\n").is_err());
    assert!(parse_cells("CELL a\n TILE X\n").is_err());
    let dup = MDD.replace("  LOC RAMB18_X0Y2\n", "  TILE BRAM_L_X6Y6\n");
    assert!(parse_cells(&dup).is_err());
    let empty = MDD.replace("BRAM_ADDR_END 511", "BRAM_ADDR_END 0\n  X 1").replace(
        "BRAM_ADDR_BEGIN 0",
        "BRAM_ADDR_BEGIN 1",
    );
    assert!(parse_cells(&empty).is_err());
}
