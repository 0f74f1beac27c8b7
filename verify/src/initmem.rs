use std::error::Error;
use std::path::Path;

use bitvec::prelude::*;
use simple_error::{bail, simple_error};

/// Logical contents of a memory: one bit vector per word, bit `b` of a word
/// being bit `b` of its numeric value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemImage {
    pub width: usize,
    pub words: Vec<BitVec>,
}

impl MemImage {
    pub fn new(num_words: usize, width: usize) -> Self {
        MemImage {
            width,
            words: vec![bitvec![0; width]; num_words],
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn bit(&self, word: usize, bit: usize) -> bool {
        self.words[word][bit]
    }

    pub fn set_bit(&mut self, word: usize, bit: usize, val: bool) {
        self.words[word].set(bit, val);
    }
}

/// Largest word count accepted from a `.mem` file.  Well above the deepest
/// memory a device can hold.
pub const MAX_MEM_WORDS: usize = 1 << 24;

fn parse_word(tok: &str, width: usize) -> Option<BitVec> {
    let mut res = bitvec![0; width];
    for (i, c) in tok.chars().rev().enumerate() {
        let digit = c.to_digit(16)?;
        for j in 0..4 {
            if (digit >> j & 1) == 0 {
                continue;
            }
            let pos = i * 4 + j;
            if pos >= width {
                return None;
            }
            res.set(pos, true);
        }
    }
    Some(res)
}

/// Parses a Vivado `.mem` file: hexadecimal words separated by whitespace,
/// `//` comments, and `@<hex address>` directives.
pub fn parse_mem_image(data: &str, width: usize) -> Result<MemImage, Box<dyn Error>> {
    let mut image = MemImage::new(0, width);
    for (lnum, line) in data.lines().enumerate() {
        let line = match line.split_once("//") {
            Some((line, _)) => line,
            None => line,
        };
        for tok in line.split_ascii_whitespace() {
            if let Some(addr) = tok.strip_prefix('@') {
                let addr = usize::from_str_radix(addr, 16)
                    .map_err(|_| simple_error!("line {l}: bad address {tok}", l = lnum + 1))?;
                if addr >= MAX_MEM_WORDS {
                    bail!(
                        "line {l}: address {addr:#x} is past the {max:#x} word limit",
                        l = lnum + 1,
                        max = MAX_MEM_WORDS
                    );
                }
                if addr < image.len() {
                    bail!(
                        "line {l}: address {addr:#x} goes backwards (next word is {n:#x})",
                        l = lnum + 1,
                        n = image.len()
                    );
                }
                image.words.resize(addr, bitvec![0; width]);
                continue;
            }
            let Some(word) = parse_word(tok, width) else {
                bail!(
                    "line {l}: {tok} is not a hex word of at most {width} bits",
                    l = lnum + 1
                );
            };
            if image.len() >= MAX_MEM_WORDS {
                bail!("line {l}: more than {max:#x} words", l = lnum + 1, max = MAX_MEM_WORDS);
            }
            image.words.push(word);
        }
    }
    if image.is_empty() {
        bail!("memory image has no words");
    }
    Ok(image)
}

pub fn read_mem_image(path: impl AsRef<Path>, width: usize) -> Result<MemImage, Box<dyn Error>> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .map_err(|e| simple_error!("cannot read {p}: {e}", p = path.display()))?;
    parse_mem_image(&data, width)
        .map_err(|e| simple_error!("{p}: {e}", p = path.display()).into())
}

#[test]
fn test_parse_mem_image() {
    let image = parse_mem_image("3ffff\n00001 // first\n\n@4\n20\n", 18).unwrap();
    assert_eq!(image.len(), 5);
    assert_eq!(image.width, 18);
    assert!(image.words[0].all());
    assert!(image.bit(1, 0));
    assert_eq!(image.words[1].count_ones(), 1);
    assert!(image.words[2].not_any());
    assert!(image.words[3].not_any());
    assert!(image.bit(4, 5));
    assert_eq!(image.words[4].count_ones(), 1);

    let image = parse_mem_image("@3ff\n1\n", 18).unwrap();
    assert_eq!(image.len(), 0x400);
    assert!(image.bit(0x3ff, 0));
}

#[test]
fn test_parse_mem_image_errors() {
    // bit 18 set in an 18-bit memory
    assert!(parse_mem_image("40000\n", 18).is_err());
    assert!(parse_mem_image("xyz\n", 18).is_err());
    assert!(parse_mem_image("1\n2\n@1\n3\n", 18).is_err());
    assert!(parse_mem_image("// nothing\n", 18).is_err());
    assert!(parse_mem_image("@ffffffffff\n1\n", 18).is_err());
    assert!(parse_mem_image(&format!("@{MAX_MEM_WORDS:x}\n1\n"), 18).is_err());
    // leading zero digits beyond the width are fine
    assert!(parse_mem_image("0003ffff\n", 18).is_ok());
}
