use std::fs;
use std::path::Path;

use assert_matches::assert_matches;
use bramcheck_verify::fasm::{Half, LineKind, encode_init_value};
use bramcheck_verify::mapping::{BitMapping, MappingTable};
use bramcheck_verify::{CheckOptions, VerifyError, VerifyErrorKind, check_all, check_design};
use jzon::JsonValue;

const TILE: &str = "BRAM_L_X6Y5";
const FRAME: u32 = 0x00c00100;
const WIDTH: usize = 18;
const WORDS: [u32; 4] = [0x3ffff, 0x00001, 0x2aaaa, 0x00000];

fn line_bit(w: usize, b: usize) -> usize {
    w * WIDTH + b
}

fn offset(w: usize, b: usize) -> usize {
    64 + w * WIDTH + b
}

fn type1_write(reg: u32, num: usize) -> u32 {
    0x30000000 | reg << 13 | num as u32
}

fn bitstream(frame: &[u32]) -> Vec<u8> {
    let mut words = vec![0xffffffff, 0xaa995566];
    words.push(type1_write(0x02, frame.len()));
    words.extend(frame);
    words.extend([type1_write(0x08, 1), FRAME]);
    words.extend([type1_write(0x04, 1), 0x0d]);
    words.into_iter().flat_map(u32::to_be_bytes).collect()
}

fn write_design(dir: &Path, flip_frame_bit: Option<(usize, usize)>) {
    let name = dir.file_name().unwrap().to_str().unwrap();
    fs::create_dir_all(dir.join("init")).unwrap();
    fs::create_dir_all(dir.join("vivado")).unwrap();

    fs::write(
        dir.join(format!("{name}.mdd")),
        format!(
            "\
DESIGN {name}
PART xc7a50tcsg324-1
CELL mem/ram_reg_0
  TILE {TILE}
  TYPE RAMB18E1
  ADDR_BEGIN 0
  ADDR_END 3
  SLICE_BEGIN 0
  SLICE_END 17
ENDCELL
CELL mem/other_reg_0
  TILE BRAM_L_X6Y10
  TYPE RAMB18E1
  ADDR_BEGIN 0
  ADDR_END 3
  SLICE_BEGIN 0
  SLICE_END 35
ENDCELL
"
        ),
    )
    .unwrap();

    let mem: Vec<_> = WORDS.iter().map(|w| format!("{w:05x}")).collect();
    fs::write(dir.join("init/init.mem"), mem.join("\n") + "\n").unwrap();

    let mut table = MappingTable::new("mem/ram", WORDS.len(), WIDTH);
    let mut line = bitvec::bitvec![0; 256];
    let mut frame = vec![0u32; 101];
    for (w, &val) in WORDS.iter().enumerate() {
        for b in 0..WIDTH {
            table
                .insert(BitMapping {
                    word: w,
                    bit: b,
                    half: Half::Y0,
                    kind: LineKind::Init,
                    line: 0,
                    line_bit: line_bit(w, b),
                    frame: FRAME,
                    offset: offset(w, b),
                })
                .unwrap();
            if (val >> b & 1) != 0 {
                line.set(line_bit(w, b), true);
                frame[offset(w, b) / 32] |= 1 << (offset(w, b) % 32);
            }
        }
    }
    if let Some((w, b)) = flip_frame_bit {
        frame[offset(w, b) / 32] ^= 1 << (offset(w, b) % 32);
    }
    fs::write(dir.join("mapping.json"), JsonValue::from(&table).dump()).unwrap();
    fs::write(dir.join(format!("vivado/{name}.bit")), bitstream(&frame)).unwrap();

    let value = encode_init_value(&line);
    let value = value.trim_start_matches('0');
    let mut fasm = vec![
        "BRAM_L_X6Y10.RAMB18_Y0.INIT_00[255:0] = 256'b1".to_string(),
        format!("{TILE}.RAMB18_Y0.INIT_00[255:0] = 256'b{value}"),
    ];
    for i in 1..64 {
        fasm.push(format!("{TILE}.RAMB18_Y0.INIT_{i:02X}[255:0] = 256'b0"));
    }
    fasm.push(format!("{TILE}.RAMB18_Y0.IN_USE"));
    fs::write(dir.join("real.fasm"), fasm.join("\n") + "\n").unwrap();
}

#[test]
fn test_check_design() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("bram18");
    write_design(&dir, None);
    let report = check_design(&dir, &CheckOptions::default()).unwrap();
    assert_eq!(report.design, "bram18");
    assert_eq!(report.cells, 1);
    assert_eq!(report.bits, WORDS.len() * WIDTH);
}

#[test]
fn test_check_design_mismatch() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("bram18");
    write_design(&dir, Some((2, 3)));
    let err = check_design(&dir, &CheckOptions::default()).unwrap_err();
    let err = err.downcast_ref::<VerifyError>().unwrap();
    assert_eq!(err.design, "bram18");
    assert_eq!(err.tile, TILE);
    assert_eq!(err.coord(), Some((2, 3)));
    // 0x2aaaa has bit 3 set
    assert_matches!(
        err.kind,
        VerifyErrorKind::Mismatch {
            init: true,
            fasm: true,
            frame: false,
            ..
        }
    );
}

#[test]
fn test_check_design_wrong_width() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("bram18");
    write_design(&dir, None);
    let opts = CheckOptions {
        width: Some(36),
        ..Default::default()
    };
    assert!(check_design(&dir, &opts).is_err());
    let opts = CheckOptions {
        memory: "mem/nothing".to_string(),
        ..Default::default()
    };
    assert!(check_design(&dir, &opts).is_err());
}

#[test]
fn test_check_all() {
    let tmp = tempfile::tempdir().unwrap();
    write_design(&tmp.path().join("a"), None);
    write_design(&tmp.path().join("b"), None);
    fs::write(tmp.path().join("notes.txt"), "not a design\n").unwrap();
    let reports = check_all(tmp.path(), &CheckOptions::default()).unwrap();
    let names: Vec<_> = reports.iter().map(|r| r.design.as_str()).collect();
    assert_eq!(names, ["a", "b"]);

    write_design(&tmp.path().join("c"), Some((0, 0)));
    let err = check_all(tmp.path(), &CheckOptions::default()).unwrap_err();
    let err = err.downcast_ref::<VerifyError>().unwrap();
    assert_eq!(err.design, "c");
}

#[test]
fn test_check_design_short_image() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("bram18");
    write_design(&dir, None);
    fs::write(dir.join("init/init.mem"), "3ffff\n00001\n2aaaa\n").unwrap();
    assert!(check_design(&dir, &CheckOptions::default()).is_err());
}

#[test]
fn test_check_design_verbose() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("bram18");
    write_design(&dir, None);
    let opts = CheckOptions {
        verbose: true,
        print_mappings: true,
        ..Default::default()
    };
    let report = check_design(&dir, &opts).unwrap();
    assert_eq!(report.bits, WORDS.len() * WIDTH);
}
