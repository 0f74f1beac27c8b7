use arrayref::array_ref;

use crate::ParseError;

pub const REG_CRC: u32 = 0x00;
pub const REG_FAR: u32 = 0x01;
pub const REG_FDRI: u32 = 0x02;
pub const REG_CMD: u32 = 0x04;
pub const REG_LOUT: u32 = 0x08;
pub const REG_IDCODE: u32 = 0x0c;

pub const CMD_DESYNC: u32 = 0x0d;

#[derive(Debug, Clone)]
pub struct PacketParser<'a> {
    data: &'a [u8],
    pos: usize,
    sync: bool,
    last_reg: Option<u32>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Packet {
    // unsynced
    DummyWord,
    WidthDetect,
    SyncWord,
    // synced
    Nop,
    Crc(u32),
    Far(u32),
    Fdri(Vec<u32>),
    Cmd(u32),
    Lout(u32),
    Idcode(u32),
    // anything else we have no use for
    Write(u32, Vec<u32>),
}

impl<'a> PacketParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            sync: false,
            last_reg: None,
        }
    }

    fn word(&self, pos: usize) -> Result<u32, ParseError> {
        if pos + 4 > self.data.len() {
            return Err(ParseError::Truncated(pos));
        }
        Ok(u32::from_be_bytes(*array_ref!(self.data, pos, 4)))
    }

    fn payload(&mut self, num: usize) -> Result<Vec<u32>, ParseError> {
        let dpos = self.pos;
        if dpos + num * 4 > self.data.len() {
            return Err(ParseError::Truncated(dpos));
        }
        self.pos += num * 4;
        (0..num).map(|i| self.word(dpos + i * 4)).collect()
    }

    fn write(&mut self, reg: u32, num: usize) -> Result<Packet, ParseError> {
        let data = self.payload(num)?;
        Ok(match (reg, num) {
            (REG_CRC, 1) => Packet::Crc(data[0]),
            (REG_FAR, 1) => Packet::Far(data[0]),
            (REG_FDRI, _) => Packet::Fdri(data),
            (REG_CMD, 1) => {
                if data[0] == CMD_DESYNC {
                    self.sync = false;
                }
                Packet::Cmd(data[0])
            }
            (REG_LOUT, 1) => Packet::Lout(data[0]),
            (REG_IDCODE, 1) => Packet::Idcode(data[0]),
            _ => Packet::Write(reg, data),
        })
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, ParseError> {
        loop {
            if self.pos + 4 > self.data.len() {
                return Ok(None);
            }
            let hpos = self.pos;
            let ph = self.word(hpos)?;
            self.pos += 4;
            if !self.sync {
                return Ok(Some(match ph {
                    0xffffffff => Packet::DummyWord,
                    0x000000bb => {
                        let w2 = self.word(self.pos)?;
                        if w2 != 0x11220044 {
                            return Err(ParseError::UnknownWord(hpos, ph));
                        }
                        self.pos += 4;
                        Packet::WidthDetect
                    }
                    0xaa995566 => {
                        self.sync = true;
                        Packet::SyncWord
                    }
                    // padding between the header and the sync word
                    0x00000000 => continue,
                    _ => return Err(ParseError::UnknownWord(hpos, ph)),
                }));
            }
            if ph == 0x20000000 {
                return Ok(Some(Packet::Nop));
            } else if ph == 0xffffffff {
                self.sync = false;
                return Ok(Some(Packet::DummyWord));
            } else if (ph >> 27) == 6 {
                let reg = ph >> 13 & 0x3fff;
                let num = (ph & 0x7ff) as usize;
                self.last_reg = Some(reg);
                if num == 0 {
                    // a type 2 packet carries the payload
                    continue;
                }
                return self.write(reg, num).map(Some);
            } else if (ph >> 27) == 5 {
                // type 1 read requests carry no payload in a bitstream
                self.last_reg = Some(ph >> 13 & 0x3fff);
                continue;
            } else if (ph >> 27) == 0xa {
                let Some(reg) = self.last_reg else {
                    return Err(ParseError::OrphanType2(hpos));
                };
                let num = (ph & 0x7ffffff) as usize;
                return self.write(reg, num).map(Some);
            } else {
                return Err(ParseError::UnknownWord(hpos, ph));
            }
        }
    }
}

impl Iterator for PacketParser<'_> {
    type Item = Result<Packet, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}

#[cfg(test)]
pub(crate) fn type1_write(reg: u32, num: usize) -> u32 {
    0x30000000 | reg << 13 | num as u32
}

#[cfg(test)]
pub(crate) fn type2_write(num: usize) -> u32 {
    0x50000000 | num as u32
}

#[cfg(test)]
fn to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

#[test]
fn test_packets() {
    let data = to_bytes(&[
        0xffffffff,
        0x000000bb,
        0x11220044,
        0xffffffff,
        0xaa995566,
        0x20000000,
        type1_write(REG_FAR, 1),
        0x00420100,
        type1_write(REG_FDRI, 0),
        type2_write(3),
        1,
        2,
        3,
        type1_write(REG_LOUT, 1),
        0x00420100,
        type1_write(REG_CMD, 1),
        CMD_DESYNC,
    ]);
    let packets: Vec<_> = PacketParser::new(&data)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        packets,
        [
            Packet::DummyWord,
            Packet::WidthDetect,
            Packet::DummyWord,
            Packet::SyncWord,
            Packet::Nop,
            Packet::Far(0x00420100),
            Packet::Fdri(vec![1, 2, 3]),
            Packet::Lout(0x00420100),
            Packet::Cmd(CMD_DESYNC),
        ]
    );
}

#[test]
fn test_truncated() {
    let data = to_bytes(&[0xaa995566, type1_write(REG_FDRI, 4), 1, 2]);
    let res: Result<Vec<_>, _> = PacketParser::new(&data).collect();
    assert_eq!(res, Err(ParseError::Truncated(8)));
}

#[test]
fn test_orphan_type2() {
    let data = to_bytes(&[0xaa995566, type2_write(1), 0]);
    let res: Result<Vec<_>, _> = PacketParser::new(&data).collect();
    assert_eq!(res, Err(ParseError::OrphanType2(4)));
}
