//! IVF container framing for the ingestion -> transcode boundary.
//!
//! Layout (all little-endian):
//!
//! ```text
//! file header (32 bytes)
//!   0  "DKIF"
//!   4  version (u16) = 0
//!   6  header length (u16) = 32
//!   8  fourcc
//!  12  width (u16), height (u16)
//!  16  timebase denominator (u32), numerator (u32)
//!  24  frame count (u32), reserved (u32)
//! record, one per MediaPacket
//!   0  payload length (u32)
//!   4  timestamp (u64) = packet sequence number
//!  12  payload
//! ```

use std::io::{self, Read, Write};

use crate::error::PipelineError;
use crate::session::MediaPacket;

pub const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
pub const FILE_HEADER_LEN: usize = 32;
pub const RECORD_HEADER_LEN: usize = 12;

/// Records larger than this are treated as corruption, not allocated.
pub const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub timebase_den: u32,
    pub timebase_num: u32,
    pub frame_count: u32,
}

impl ContainerHeader {
    pub fn new(fourcc: [u8; 4], width: u16, height: u16) -> Self {
        Self {
            fourcc,
            width,
            height,
            timebase_den: 30,
            timebase_num: 1,
            frame_count: 0,
        }
    }

    pub fn encode(&self) -> [u8; FILE_HEADER_LEN] {
        let mut out = [0u8; FILE_HEADER_LEN];
        out[0..4].copy_from_slice(IVF_SIGNATURE);
        out[4..6].copy_from_slice(&0u16.to_le_bytes());
        out[6..8].copy_from_slice(&(FILE_HEADER_LEN as u16).to_le_bytes());
        out[8..12].copy_from_slice(&self.fourcc);
        out[12..14].copy_from_slice(&self.width.to_le_bytes());
        out[14..16].copy_from_slice(&self.height.to_le_bytes());
        out[16..20].copy_from_slice(&self.timebase_den.to_le_bytes());
        out[20..24].copy_from_slice(&self.timebase_num.to_le_bytes());
        out[24..28].copy_from_slice(&self.frame_count.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8; FILE_HEADER_LEN]) -> Result<Self, PipelineError> {
        if &raw[0..4] != IVF_SIGNATURE {
            return Err(PipelineError::Container(
                "missing DKIF signature".to_string(),
            ));
        }
        let header_len = u16::from_le_bytes([raw[6], raw[7]]);
        if header_len as usize != FILE_HEADER_LEN {
            return Err(PipelineError::Container(format!(
                "unsupported header length {}",
                header_len
            )));
        }
        let u32_at = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        Ok(Self {
            fourcc: [raw[8], raw[9], raw[10], raw[11]],
            width: u16::from_le_bytes([raw[12], raw[13]]),
            height: u16::from_le_bytes([raw[14], raw[15]]),
            timebase_den: u32_at(16),
            timebase_num: u32_at(20),
            frame_count: u32_at(24),
        })
    }
}

/// Appends one record per packet after writing the file header.
pub struct ContainerWriter<W: Write> {
    out: W,
    records: u64,
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(mut out: W, header: ContainerHeader) -> io::Result<Self> {
        out.write_all(&header.encode())?;
        Ok(Self { out, records: 0 })
    }

    pub fn write_packet(&mut self, packet: &MediaPacket) -> io::Result<()> {
        let len = u32::try_from(packet.payload.len())
            .ok()
            .filter(|len| *len <= MAX_RECORD_LEN)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("packet {} payload too large", packet.sequence),
                )
            })?;
        let mut record = [0u8; RECORD_HEADER_LEN];
        record[0..4].copy_from_slice(&len.to_le_bytes());
        record[4..12].copy_from_slice(&packet.sequence.to_le_bytes());
        self.out.write_all(&record)?;
        self.out.write_all(&packet.payload)?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Parses a container stream back into packets.
pub struct ContainerReader<R: Read> {
    input: R,
    header: ContainerHeader,
}

impl<R: Read> ContainerReader<R> {
    pub fn new(mut input: R) -> Result<Self, PipelineError> {
        let mut raw = [0u8; FILE_HEADER_LEN];
        input.read_exact(&mut raw).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                PipelineError::Container("truncated file header".to_string())
            }
            _ => PipelineError::from(e),
        })?;
        let header = ContainerHeader::decode(&raw)?;
        Ok(Self { input, header })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Next packet, or `None` at a clean record boundary EOF.
    pub fn next_packet(&mut self) -> Result<Option<MediaPacket>, PipelineError> {
        let mut record = [0u8; RECORD_HEADER_LEN];
        let filled = read_full(&mut self.input, &mut record)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < RECORD_HEADER_LEN {
            return Err(PipelineError::Container(format!(
                "truncated record header ({} of {} bytes)",
                filled, RECORD_HEADER_LEN
            )));
        }
        let len = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        if len > MAX_RECORD_LEN {
            return Err(PipelineError::Container(format!(
                "record length {} exceeds limit",
                len
            )));
        }
        let mut sequence = [0u8; 8];
        sequence.copy_from_slice(&record[4..12]);
        let sequence = u64::from_le_bytes(sequence);

        let mut payload = vec![0u8; len as usize];
        let filled = read_full(&mut self.input, &mut payload)?;
        if filled < payload.len() {
            return Err(PipelineError::Container(format!(
                "truncated payload for packet {} ({} of {} bytes)",
                sequence, filled, len
            )));
        }
        Ok(Some(MediaPacket::new(sequence, payload)))
    }
}

impl<R: Read> Iterator for ContainerReader<R> {
    type Item = Result<MediaPacket, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}

/// Fill `buf` until it is full or the reader reports end of stream.
pub(crate) fn read_full<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
