// VCDIFF file header and per-window header (RFC 3284, Section 4).
//
// Parsing works on a byte buffer that may end anywhere: an incomplete
// header yields `Ok(None)` so the caller can wait for more input.

use bitflags::bitflags;

use super::CodecError;
use super::varint::{self, VarInt};

pub const VCDIFF_MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

/// Largest target window accepted by the decoder.
pub const HARD_MAX_WINSIZE: u64 = 1 << 24;

bitflags! {
    /// Header indicator (`hdr_ind`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HdrIndicator: u8 {
        const SECONDARY = 1 << 0;
        const CODETABLE = 1 << 1;
        const APPHEADER = 1 << 2;
    }

    /// Window indicator (`win_ind`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WinIndicator: u8 {
        const SOURCE = 1 << 0;
        const TARGET = 1 << 1;
        const ADLER32 = 1 << 2;
    }

    /// Delta indicator (`del_ind`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DelIndicator: u8 {
        const DATACOMP = 1 << 0;
        const INSTCOMP = 1 << 1;
        const ADDRCOMP = 1 << 2;
    }
}

// ---------------------------------------------------------------------------
// Incremental slice reader
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let s = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(s)
    }

    fn varint(&mut self) -> Result<Option<u64>, CodecError> {
        match varint::read_u64(&self.buf[self.pos..]) {
            Ok(VarInt::Value(v, n)) => {
                self.pos += n;
                Ok(Some(v))
            }
            Ok(VarInt::Incomplete) => Ok(None),
            Err(_) => Err(CodecError::Malformed("varint overflow in header".into())),
        }
    }
}

macro_rules! need {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub indicator: HdrIndicator,
    pub app_header: Option<Vec<u8>>,
}

impl FileHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&VCDIFF_MAGIC);
        let mut ind = HdrIndicator::empty();
        if self.app_header.is_some() {
            ind |= HdrIndicator::APPHEADER;
        }
        out.push(ind.bits());
        if let Some(app) = &self.app_header {
            varint::push_u64(out, app.len() as u64);
            out.extend_from_slice(app);
        }
    }

    /// Parse a file header from the front of `buf`.
    ///
    /// Returns the header and the number of bytes it occupies, or `None`
    /// when `buf` ends first.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, CodecError> {
        let mut r = Reader::new(buf);
        let magic = need!(r.bytes(4));
        if magic[..3] != VCDIFF_MAGIC[..3] {
            return Err(CodecError::Malformed(format!(
                "bad magic {:02X} {:02X} {:02X}",
                magic[0], magic[1], magic[2]
            )));
        }
        if magic[3] != 0 {
            return Err(CodecError::Unsupported(format!(
                "VCDIFF version {:#04X}",
                magic[3]
            )));
        }

        let raw = need!(r.byte());
        let indicator = HdrIndicator::from_bits(raw).ok_or_else(|| {
            CodecError::Malformed(format!("invalid header indicator {raw:#04X}"))
        })?;
        if indicator.contains(HdrIndicator::SECONDARY) {
            return Err(CodecError::Unsupported("secondary compression".into()));
        }
        if indicator.contains(HdrIndicator::CODETABLE) {
            return Err(CodecError::Unsupported("application code table".into()));
        }

        let app_header = if indicator.contains(HdrIndicator::APPHEADER) {
            let len = need!(r.varint()?);
            let len = usize::try_from(len)
                .map_err(|_| CodecError::Malformed("application header too large".into()))?;
            Some(need!(r.bytes(len)).to_vec())
        } else {
            None
        };

        Ok(Some((
            Self {
                indicator,
                app_header,
            },
            r.pos,
        )))
    }
}

// ---------------------------------------------------------------------------
// Window header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowHeader {
    pub indicator: WinIndicator,
    pub copy_window_len: u64,
    pub copy_window_offset: u64,
    pub target_window_len: u64,
    pub data_len: u64,
    pub inst_len: u64,
    pub addr_len: u64,
    pub adler32: Option<u32>,
}

impl WindowHeader {
    #[inline]
    pub fn has_source(&self) -> bool {
        self.indicator.contains(WinIndicator::SOURCE)
    }

    /// Total size of the data, instruction and address sections.
    pub fn sections_len(&self) -> u64 {
        self.data_len + self.inst_len + self.addr_len
    }

    /// The `enc_len` redundancy field: everything after itself.
    fn enc_len(&self) -> u64 {
        varint::sizeof_u64(self.target_window_len) as u64
            + 1
            + varint::sizeof_u64(self.data_len) as u64
            + varint::sizeof_u64(self.inst_len) as u64
            + varint::sizeof_u64(self.addr_len) as u64
            + if self.adler32.is_some() { 4 } else { 0 }
            + self.sections_len()
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let mut ind = self.indicator;
        ind.set(WinIndicator::ADLER32, self.adler32.is_some());
        out.push(ind.bits());
        if ind.intersects(WinIndicator::SOURCE | WinIndicator::TARGET) {
            varint::push_u64(out, self.copy_window_len);
            varint::push_u64(out, self.copy_window_offset);
        }
        varint::push_u64(out, self.enc_len());
        varint::push_u64(out, self.target_window_len);
        out.push(DelIndicator::empty().bits());
        varint::push_u64(out, self.data_len);
        varint::push_u64(out, self.inst_len);
        varint::push_u64(out, self.addr_len);
        if let Some(sum) = self.adler32 {
            out.extend_from_slice(&sum.to_be_bytes());
        }
    }

    /// Parse a window header from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, CodecError> {
        let mut r = Reader::new(buf);

        let raw = need!(r.byte());
        let indicator = WinIndicator::from_bits(raw).ok_or_else(|| {
            CodecError::Malformed(format!("invalid window indicator {raw:#04X}"))
        })?;
        if indicator.contains(WinIndicator::SOURCE | WinIndicator::TARGET) {
            return Err(CodecError::Malformed(
                "window cannot copy from both source and target".into(),
            ));
        }
        if indicator.contains(WinIndicator::TARGET) {
            return Err(CodecError::Unsupported("target-relative copy window".into()));
        }

        let (copy_window_len, copy_window_offset) = if indicator.contains(WinIndicator::SOURCE) {
            (need!(r.varint()?), need!(r.varint()?))
        } else {
            (0, 0)
        };

        let enc_len = need!(r.varint()?);
        let target_window_len = need!(r.varint()?);
        if target_window_len > HARD_MAX_WINSIZE {
            return Err(CodecError::Malformed(format!(
                "target window of {target_window_len} bytes exceeds {HARD_MAX_WINSIZE}"
            )));
        }

        let del = need!(r.byte());
        if del != 0 {
            return Err(CodecError::Unsupported(format!(
                "compressed sections (delta indicator {del:#04X})"
            )));
        }

        let data_len = need!(r.varint()?);
        let inst_len = need!(r.varint()?);
        let addr_len = need!(r.varint()?);

        let adler32 = if indicator.contains(WinIndicator::ADLER32) {
            let b = need!(r.bytes(4));
            Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        } else {
            None
        };

        let hdr = Self {
            indicator,
            copy_window_len,
            copy_window_offset,
            target_window_len,
            data_len,
            inst_len,
            addr_len,
            adler32,
        };

        let expected = data_len
            .checked_add(inst_len)
            .and_then(|n| n.checked_add(addr_len))
            .map(|_| hdr.enc_len());
        if expected != Some(enc_len) {
            return Err(CodecError::Malformed(format!(
                "enc_len {enc_len} disagrees with section lengths"
            )));
        }

        Ok(Some((hdr, r.pos)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WindowHeader {
        WindowHeader {
            indicator: WinIndicator::SOURCE,
            copy_window_len: 10,
            copy_window_offset: 0,
            target_window_len: 11,
            data_len: 1,
            inst_len: 3,
            addr_len: 2,
            adler32: Some(0xDEAD_BEEF),
        }
    }

    #[test]
    fn file_header_layout() {
        let mut out = Vec::new();
        FileHeader::default().write(&mut out);
        assert_eq!(out, [0xD6, 0xC3, 0xC4, 0x00, 0x00]);
        let (hdr, used) = FileHeader::parse(&out).unwrap().unwrap();
        assert_eq!(hdr, FileHeader::default());
        assert_eq!(used, 5);
    }

    #[test]
    fn file_header_with_app_header() {
        let hdr = FileHeader {
            indicator: HdrIndicator::APPHEADER,
            app_header: Some(b"parent".to_vec()),
        };
        let mut out = Vec::new();
        hdr.write(&mut out);
        let (back, used) = FileHeader::parse(&out).unwrap().unwrap();
        assert_eq!(back, hdr);
        assert_eq!(used, out.len());
    }

    #[test]
    fn bad_magic_rejected() {
        assert!(matches!(
            FileHeader::parse(b"XYZ\0\0"),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn secondary_compression_unsupported() {
        assert!(matches!(
            FileHeader::parse(&[0xD6, 0xC3, 0xC4, 0x00, 0x01, 0x02]),
            Err(CodecError::Unsupported(_))
        ));
    }

    #[test]
    fn window_header_parses_incrementally() {
        let mut out = Vec::new();
        sample().write(&mut out);
        for cut in 0..out.len() {
            assert!(WindowHeader::parse(&out[..cut]).unwrap().is_none(), "cut={cut}");
        }
        let (hdr, used) = WindowHeader::parse(&out).unwrap().unwrap();
        assert_eq!(hdr, sample());
        assert_eq!(used, out.len());
    }

    #[test]
    fn enc_len_mismatch_rejected() {
        let mut out = Vec::new();
        sample().write(&mut out);
        // win_ind, cpylen, cpyoff, then enc_len.
        out[3] += 1;
        assert!(matches!(
            WindowHeader::parse(&out),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_window_rejected() {
        let hdr = WindowHeader {
            target_window_len: HARD_MAX_WINSIZE + 1,
            ..WindowHeader::default()
        };
        let mut out = Vec::new();
        hdr.write(&mut out);
        assert!(WindowHeader::parse(&out).is_err());
    }
}
