//! Header, TOC and footer of section store files.
//!
//! ```text
//! [header 32B][block 0]..[block n-1][toc n*32B][firsts blob][footer 16B]
//! ```
//!
//! All integers are little-endian.

pub const MAGIC: &[u8; 4] = b"RPSC";
pub const END_MAGIC: &[u8; 12] = b"RPSC_ENDMARK";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 32;
pub const TOC_ENTRY_LEN: usize = 32;
pub const FOOTER_LEN: usize = 16;

/// Block encodings.
pub const BLOCK_RAW: u8 = 0;
pub const BLOCK_ZSTD: u8 = 1;
/// Encoding byte plus payload length.
pub const BLOCK_PREFIX_LEN: usize = 5;

/// Parsed fixed-size file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u8,
    pub flags: u8,
    /// Tag of the codec the elements are encoded with.
    pub payload_tag: u16,
    pub capacity: u32,
    pub section_count: u32,
    pub element_count: u64,
    pub toc_off: u64,
}

impl Header {
    pub fn write(&self, out: &mut [u8; HEADER_LEN]) {
        out[0..4].copy_from_slice(&self.magic);
        out[4] = self.version;
        out[5] = self.flags;
        out[6..8].copy_from_slice(&self.payload_tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.capacity.to_le_bytes());
        out[12..16].copy_from_slice(&self.section_count.to_le_bytes());
        out[16..24].copy_from_slice(&self.element_count.to_le_bytes());
        out[24..32].copy_from_slice(&self.toc_off.to_le_bytes());
    }

    /// Parse a header from the first 32 bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        Some(Header {
            magic,
            version: buf[4],
            flags: buf[5],
            payload_tag: u16::from_le_bytes([buf[6], buf[7]]),
            capacity: u32::from_le_bytes(buf[8..12].try_into().ok()?),
            section_count: u32::from_le_bytes(buf[12..16].try_into().ok()?),
            element_count: u64::from_le_bytes(buf[16..24].try_into().ok()?),
            toc_off: u64::from_le_bytes(buf[24..32].try_into().ok()?),
        })
    }
}

/// Byte span of one section block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub off: u64,
    pub len: u64,
}

/// One TOC row: where the block lives and where its first element sits in the
/// firsts blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub section: Section,
    pub crc32: u32,
    pub first_off: u64,
    pub first_len: u32,
}

impl TocEntry {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.section.off.to_le_bytes());
        out.extend_from_slice(&self.section.len.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.first_off.to_le_bytes());
        out.extend_from_slice(&self.first_len.to_le_bytes());
    }
}

/// Parse the TOC entries referenced by `hdr`.
pub fn parse_toc(buf: &[u8], hdr: &Header) -> Option<Vec<TocEntry>> {
    let toc_off = usize::try_from(hdr.toc_off).ok()?;
    let n = hdr.section_count as usize;
    let need = toc_off.checked_add(n.checked_mul(TOC_ENTRY_LEN)?)?;
    if need > buf.len() {
        return None;
    }
    let u64_at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().unwrap_or([0; 8]));
    let u32_at = |o: usize| u32::from_le_bytes(buf[o..o + 4].try_into().unwrap_or([0; 4]));
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let off = toc_off + i * TOC_ENTRY_LEN;
        out.push(TocEntry {
            section: Section {
                off: u64_at(off),
                len: u64_at(off + 8),
            },
            crc32: u32_at(off + 16),
            first_off: u64_at(off + 20),
            first_len: u32_at(off + 28),
        });
    }
    Some(out)
}

/// True if `section` lies entirely within a buffer of `buf_len` bytes.
pub fn section_in_bounds(buf_len: usize, section: Section) -> bool {
    let start = section.off as usize;
    let len = section.len as usize;
    start <= buf_len && start.saturating_add(len) <= buf_len
}

pub fn write_footer(crc: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(END_MAGIC);
}

/// Parse the 16-byte footer; returns the metadata CRC.
pub fn parse_footer(buf: &[u8]) -> Option<u32> {
    if buf.len() < FOOTER_LEN {
        return None;
    }
    let base = buf.len() - FOOTER_LEN;
    if &buf[base + 4..] != END_MAGIC {
        return None;
    }
    Some(u32::from_le_bytes(buf[base..base + 4].try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = Header {
            magic: *MAGIC,
            version: VERSION,
            flags: 0,
            payload_tag: 7,
            capacity: 2048,
            section_count: 3,
            element_count: 5000,
            toc_off: 123_456,
        };
        let mut buf = [0u8; HEADER_LEN];
        h.write(&mut buf);
        assert_eq!(Header::parse(&buf), Some(h));
        assert!(Header::parse(&buf[..31]).is_none());
    }

    #[test]
    fn toc_rejects_out_of_bounds() {
        let h = Header {
            magic: *MAGIC,
            version: VERSION,
            flags: 0,
            payload_tag: 1,
            capacity: 4,
            section_count: 2,
            element_count: 8,
            toc_off: 32,
        };
        let buf = vec![0u8; 32 + TOC_ENTRY_LEN];
        assert!(parse_toc(&buf, &h).is_none());
    }

    #[test]
    fn footer_requires_magic() {
        let mut buf = vec![0u8; 8];
        write_footer(0xDEAD_BEEF, &mut buf);
        assert_eq!(parse_footer(&buf), Some(0xDEAD_BEEF));
        let n = buf.len();
        buf[n - 1] = b'X';
        assert!(parse_footer(&buf).is_none());
    }
}
