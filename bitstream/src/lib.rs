//! Configuration frame extraction for Xilinx 7-series style bitstreams.
//!
//! Only debug bitstreams carry enough information to place every frame without
//! device geometry: bitgen writes each frame as a separate FDRI packet followed
//! by a LOUT write of its frame address.  That is what [`Frames::parse`]
//! understands.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::Path;

use arrayref::array_ref;

mod packet;
pub use packet::{Packet, PacketParser};

/// Frame length in 32-bit words on 7-series devices.
pub const FRAME_WORDS_7SERIES: usize = 101;

const BIT_MAGIC: [u8; 13] = [
    0x00, 0x09, 0x0f, 0xf0, 0x0f, 0xf0, 0x0f, 0xf0, 0x0f, 0xf0, 0x00, 0x00, 0x01,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Ran out of data at the given byte offset.
    Truncated(usize),
    /// Malformed `.bit` file header.
    BadHeader,
    UnknownWord(usize, u32),
    /// Type 2 packet without a preceding type 1 packet.
    OrphanType2(usize),
    /// FDRI payload that is not a whole number of frames.
    BadFdriLength(usize),
    /// FDRI payload holding several frames with no per-frame address.
    UnaddressedFrames(usize),
    /// Frame data without any frame address to store it at.
    MissingFrameAddress,
    DuplicateFrame(u32),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Truncated(pos) => write!(f, "bitstream truncated at byte {pos}"),
            ParseError::BadHeader => write!(f, "malformed bit file header"),
            ParseError::UnknownWord(pos, word) => {
                write!(f, "unknown word {word:08x} at byte {pos}")
            }
            ParseError::OrphanType2(pos) => {
                write!(f, "type 2 packet without type 1 header at byte {pos}")
            }
            ParseError::BadFdriLength(num) => {
                write!(f, "FDRI write of {num} words is not a whole number of frames")
            }
            ParseError::UnaddressedFrames(num) => write!(
                f,
                "FDRI write of {num} frames without per-frame addresses (not a debug bitstream?)"
            ),
            ParseError::MissingFrameAddress => write!(f, "frame data written with no frame address"),
            ParseError::DuplicateFrame(far) => write!(f, "frame {far:08x} set twice"),
        }
    }
}

impl Error for ParseError {}

/// Metadata fields of a `.bit` file header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitHeader {
    pub design: String,
    pub part: String,
    pub date: String,
    pub time: String,
}

/// Splits a `.bit` file into its header and the raw packet stream.  Data that
/// does not start with the `.bit` magic is returned unchanged as the packet
/// stream.
pub fn split_header(data: &[u8]) -> Result<(Option<BitHeader>, &[u8]), ParseError> {
    if !data.starts_with(&BIT_MAGIC) {
        return Ok((None, data));
    }
    let mut pos = BIT_MAGIC.len();
    let mut meta = vec![];
    for l in [b'a', b'b', b'c', b'd'] {
        if data.get(pos) != Some(&l) || pos + 3 > data.len() {
            return Err(ParseError::BadHeader);
        }
        pos += 1;
        let len = u16::from_be_bytes(*array_ref!(data, pos, 2)) as usize;
        pos += 2;
        if len == 0 || pos + len > data.len() {
            return Err(ParseError::BadHeader);
        }
        // strings are NUL-terminated
        let s = &data[pos..pos + len - 1];
        meta.push(String::from_utf8_lossy(s).into_owned());
        pos += len;
    }
    if data.get(pos) != Some(&b'e') || pos + 5 > data.len() {
        return Err(ParseError::BadHeader);
    }
    pos += 1;
    let len = u32::from_be_bytes(*array_ref!(data, pos, 4)) as usize;
    pos += 4;
    if pos + len != data.len() {
        return Err(ParseError::BadHeader);
    }
    let mut meta = meta.into_iter();
    let mut next = || meta.next().unwrap_or_default();
    let header = BitHeader {
        design: next(),
        part: next(),
        date: next(),
        time: next(),
    };
    Ok((Some(header), &data[pos..]))
}

/// Decoded configuration frames, keyed by frame address.
#[derive(Clone, Debug, Default)]
pub struct Frames {
    pub header: Option<BitHeader>,
    pub idcode: Option<u32>,
    pub frame_words: usize,
    pub frames: BTreeMap<u32, Vec<u32>>,
}

struct FrameCollector {
    frames: Frames,
    far: Option<u32>,
    pending: Option<Vec<u32>>,
}

impl FrameCollector {
    fn store(&mut self, far: u32, data: Vec<u32>) -> Result<(), ParseError> {
        if self.frames.frames.insert(far, data).is_some() {
            return Err(ParseError::DuplicateFrame(far));
        }
        Ok(())
    }

    // Stores the pending frame at the last FAR value.  Addresses are not
    // auto-incremented, so the FAR is consumed.
    fn flush(&mut self) -> Result<(), ParseError> {
        if let Some(data) = self.pending.take() {
            let Some(far) = self.far.take() else {
                return Err(ParseError::MissingFrameAddress);
            };
            self.store(far, data)?;
        }
        Ok(())
    }

    fn packet(&mut self, packet: Packet) -> Result<(), ParseError> {
        let frame_words = self.frames.frame_words;
        match packet {
            Packet::Far(far) => {
                self.flush()?;
                self.far = Some(far);
            }
            Packet::Fdri(data) => {
                if data.is_empty() {
                    return Ok(());
                }
                if frame_words == 0 || !data.len().is_multiple_of(frame_words) {
                    return Err(ParseError::BadFdriLength(data.len()));
                }
                if data.len() != frame_words {
                    return Err(ParseError::UnaddressedFrames(data.len() / frame_words));
                }
                self.flush()?;
                self.pending = Some(data);
            }
            Packet::Lout(far) => {
                if let Some(data) = self.pending.take() {
                    self.store(far, data)?;
                    self.far = None;
                }
            }
            Packet::Idcode(idcode) => self.frames.idcode = Some(idcode),
            Packet::Cmd(packet::CMD_DESYNC) => self.flush()?,
            _ => (),
        }
        Ok(())
    }
}

impl Frames {
    /// Parses a `.bit` file (or a headerless packet stream) with frames of
    /// `frame_words` words each.
    pub fn parse(data: &[u8], frame_words: usize) -> Result<Frames, ParseError> {
        let (header, data) = split_header(data)?;
        let mut collector = FrameCollector {
            frames: Frames {
                header,
                idcode: None,
                frame_words,
                frames: BTreeMap::new(),
            },
            far: None,
            pending: None,
        };
        for packet in PacketParser::new(data) {
            collector.packet(packet?)?;
        }
        collector.flush()?;
        Ok(collector.frames)
    }

    pub fn from_file(path: impl AsRef<Path>, frame_words: usize) -> Result<Frames, Box<dyn Error>> {
        let data = std::fs::read(path)?;
        Ok(Frames::parse(&data, frame_words)?)
    }

    pub fn frame(&self, far: u32) -> Option<&[u32]> {
        self.frames.get(&far).map(|f| &f[..])
    }

    /// Returns bit `offset % 32` of word `offset / 32` of the given frame.
    pub fn bit(&self, far: u32, offset: usize) -> Option<bool> {
        let word = *self.frame(far)?.get(offset / 32)?;
        Some((word >> (offset % 32) & 1) != 0)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{REG_CMD, REG_FAR, REG_FDRI, REG_IDCODE, REG_LOUT, type1_write, type2_write};
    use assert_matches::assert_matches;

    fn stream(words: &[u32]) -> Vec<u8> {
        let mut res = vec![];
        for w in [0xffffffff, 0xaa995566] {
            res.extend(u32::to_be_bytes(w));
        }
        for w in words {
            res.extend(w.to_be_bytes());
        }
        res
    }

    fn frame(words: usize, seed: u32) -> Vec<u32> {
        (0..words as u32).map(|i| i.wrapping_mul(0x9e3779b9) ^ seed).collect()
    }

    fn debug_frame(far: u32, data: &[u32]) -> Vec<u32> {
        let mut res = vec![type1_write(REG_FDRI, data.len())];
        res.extend(data);
        res.extend([type1_write(REG_LOUT, 1), far]);
        res
    }

    #[test]
    fn test_debug_frames() {
        let f0 = frame(4, 0);
        let f1 = frame(4, 0x5555);
        let mut words = vec![type1_write(REG_IDCODE, 1), 0x0362c093];
        words.extend([type1_write(REG_FAR, 1), 0x00000000]);
        words.extend(debug_frame(0x00000000, &f0));
        words.extend(debug_frame(0x00000001, &f1));
        words.extend([type1_write(REG_CMD, 1), packet::CMD_DESYNC]);
        let frames = Frames::parse(&stream(&words), 4).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.idcode, Some(0x0362c093));
        assert_eq!(frames.header, None);
        assert_eq!(frames.frame(0), Some(&f0[..]));
        assert_eq!(frames.frame(1), Some(&f1[..]));
    }

    #[test]
    fn test_far_then_fdri() {
        let f0 = frame(4, 7);
        let mut words = vec![type1_write(REG_FAR, 1), 0x00420000];
        words.extend([type1_write(REG_FDRI, 0), type2_write(4)]);
        words.extend(&f0);
        let frames = Frames::parse(&stream(&words), 4).unwrap();
        assert_eq!(frames.frame(0x00420000), Some(&f0[..]));
    }

    #[test]
    fn test_bit() {
        let mut words = vec![type1_write(REG_FDRI, 2), 0x00000001, 0x80000020];
        words.extend([type1_write(REG_LOUT, 1), 0x10]);
        let frames = Frames::parse(&stream(&words), 2).unwrap();
        assert_eq!(frames.bit(0x10, 0), Some(true));
        assert_eq!(frames.bit(0x10, 1), Some(false));
        assert_eq!(frames.bit(0x10, 37), Some(true));
        assert_eq!(frames.bit(0x10, 63), Some(true));
        assert_eq!(frames.bit(0x10, 64), None);
        assert_eq!(frames.bit(0x11, 0), None);
    }

    #[test]
    fn test_errors() {
        let words = [type1_write(REG_FDRI, 8), 0, 0, 0, 0, 0, 0, 0, 0];
        assert_matches!(
            Frames::parse(&stream(&words), 4),
            Err(ParseError::UnaddressedFrames(2))
        );
        let words = [type1_write(REG_FDRI, 3), 0, 0, 0];
        assert_matches!(
            Frames::parse(&stream(&words), 4),
            Err(ParseError::BadFdriLength(3))
        );
        let words = [type1_write(REG_FDRI, 1), 0];
        assert_matches!(
            Frames::parse(&stream(&words), 1),
            Err(ParseError::MissingFrameAddress)
        );
        let mut words = debug_frame(3, &[1]);
        words.extend(debug_frame(3, &[2]));
        assert_matches!(
            Frames::parse(&stream(&words), 1),
            Err(ParseError::DuplicateFrame(3))
        );
    }

    #[test]
    fn test_header() {
        let mut data = BIT_MAGIC.to_vec();
        for (l, s) in [
            (b'a', "top;UserID=0XFFFFFFFF"),
            (b'b', "7a50tcsg324"),
            (b'c', "2020/06/24"),
            (b'd', "12:00:00"),
        ] {
            data.push(l);
            data.extend(((s.len() + 1) as u16).to_be_bytes());
            data.extend(s.as_bytes());
            data.push(0);
        }
        let body = stream(&debug_frame(0x20, &[0xdeadbeef]));
        data.push(b'e');
        data.extend((body.len() as u32).to_be_bytes());
        data.extend(&body);
        let frames = Frames::parse(&data, 1).unwrap();
        let header = frames.header.as_ref().unwrap();
        assert_eq!(header.part, "7a50tcsg324");
        assert_eq!(header.time, "12:00:00");
        assert_eq!(frames.frame(0x20), Some(&[0xdeadbeef][..]));

        data.pop();
        assert_matches!(Frames::parse(&data, 1), Err(ParseError::BadHeader));
    }
}
