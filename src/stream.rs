//! Bounded cursor over a byte slice.
//!
//! Feeds the DWARF `eh_frame_hdr` walker: fixed-width reads, LEB128, and
//! the composite "DWARF-encoded" pointer forms used by exception tables.
//! All reads are bounds-checked; a short read surfaces as
//! [`Error::Corrupted`] so callers can log and keep a partial result.

use crate::error::{Error, Result};

/// DWARF exception-header encoding: value omitted entirely.
pub const DW_EH_PE_OMIT: u8 = 0xff;
/// Low nibble of the encoding byte selects the value format.
pub const DW_EH_PE_ULEB128: u8 = 0x01;
pub const DW_EH_PE_UDATA2: u8 = 0x02;
pub const DW_EH_PE_UDATA4: u8 = 0x03;
pub const DW_EH_PE_UDATA8: u8 = 0x04;
pub const DW_EH_PE_SLEB128: u8 = 0x09;
pub const DW_EH_PE_SDATA2: u8 = 0x0a;
pub const DW_EH_PE_SDATA4: u8 = 0x0b;
pub const DW_EH_PE_SDATA8: u8 = 0x0c;
/// High nibble of the encoding byte selects the relative base.
pub const DW_EH_PE_PCREL: u8 = 0x10;
pub const DW_EH_PE_TEXTREL: u8 = 0x20;
pub const DW_EH_PE_DATAREL: u8 = 0x30;
pub const DW_EH_PE_FUNCREL: u8 = 0x40;
pub const DW_EH_PE_ALIGNED: u8 = 0x50;

/// Cursor with an explicit position over an immutable byte slice.
pub struct Stream<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Stream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::Corrupted(format!(
                    "stream read of {count} bytes at {:#x} past end ({:#x})",
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_le_bytes(bytes))
    }

    /// Read a NUL-terminated string, leaving the cursor past the NUL.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Corrupted("unterminated string in stream".to_string()))?;
        let out = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(out)
    }

    /// Unsigned little-endian base-128.
    pub fn read_uleb128(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(Error::Corrupted("uleb128 exceeds 64 bits".to_string()));
            }
        }
    }

    /// Signed little-endian base-128.
    pub fn read_sleb128(&mut self) -> Result<i64> {
        let mut value: i64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                return Ok(value);
            }
            if shift >= 64 {
                return Err(Error::Corrupted("sleb128 exceeds 64 bits".to_string()));
            }
        }
    }

    /// Read a value in one of the DWARF exception-header formats. The high
    /// nibble (the relative base) is the caller's concern.
    pub fn read_dwarf_encoded(&mut self, encoding: u8) -> Result<i64> {
        match encoding & 0x0f {
            0x00 => Ok(self.read_u32()? as i64), // absptr stored as udata4 in eh_frame_hdr
            DW_EH_PE_ULEB128 => Ok(self.read_uleb128()? as i64),
            DW_EH_PE_UDATA2 => Ok(self.read_u16()? as i64),
            DW_EH_PE_UDATA4 => Ok(self.read_u32()? as i64),
            DW_EH_PE_UDATA8 => Ok(self.read_u64()? as i64),
            DW_EH_PE_SLEB128 => self.read_sleb128(),
            DW_EH_PE_SDATA2 => Ok(self.read_u16()? as i16 as i64),
            DW_EH_PE_SDATA4 => Ok(self.read_u32()? as i32 as i64),
            DW_EH_PE_SDATA8 => Ok(self.read_u64()? as i64),
            other => Err(Error::Corrupted(format!(
                "unknown DWARF pointer encoding {other:#x}"
            ))),
        }
    }
}
