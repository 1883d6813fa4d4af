// SPDX-License-Identifier: Apache-2.0

//! Uncompressed ("stored") ZIP writer.
//!
//! Layout: every local file header followed by its name and raw bytes, then one
//! central directory record per entry, then the end-of-central-directory record.

use thiserror::Error;

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

/// 2.0, the minimum version able to extract stored entries with directories.
const VERSION_NEEDED: u16 = 20;
const VERSION_MADE_BY: u16 = 20;
const METHOD_STORED: u16 = 0;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const END_RECORD_LEN: usize = 22;

#[derive(Debug, Error)]
pub(crate) enum ArchiveError {
    #[error("entry '{name}' is {len} bytes, larger than a zip32 archive can hold")]
    EntryTooLarge { name: String, len: usize },

    #[error("file name '{0}' is longer than 65535 bytes")]
    NameTooLong(String),

    #[error("archive would hold more than 65535 entries")]
    TooManyEntries,

    #[error("archive grew past the 4 GiB zip32 offset limit")]
    ArchiveTooLarge,
}

static CRC32_TABLE: [u32; 256] = crc32_table();

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// Standard reflected CRC-32 (IEEE 802.3), as stored in zip headers.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

/// Bookkeeping for one written entry, needed again for its central directory record.
#[derive(Debug, Clone)]
struct ArchiveEntry {
    name: String,
    crc: u32,
    size: u32,
    local_header_offset: u32,
}

/// Streams stored entries into an in-memory buffer.
#[derive(Debug, Default)]
pub(crate) struct ZipWriter {
    buf: Vec<u8>,
    entries: Vec<ArchiveEntry>,
}

impl ZipWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_entry(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        if self.entries.len() >= u16::MAX as usize {
            return Err(ArchiveError::TooManyEntries);
        }
        let name_len =
            u16::try_from(name.len()).map_err(|_| ArchiveError::NameTooLong(name.to_string()))?;
        let size = u32::try_from(data.len()).map_err(|_| ArchiveError::EntryTooLarge {
            name: name.to_string(),
            len: data.len(),
        })?;
        let local_header_offset =
            u32::try_from(self.buf.len()).map_err(|_| ArchiveError::ArchiveTooLarge)?;
        let crc = crc32(data);

        self.buf
            .reserve(LOCAL_HEADER_LEN + name.len() + data.len());
        put_u32(&mut self.buf, LOCAL_FILE_HEADER_SIGNATURE);
        put_u16(&mut self.buf, VERSION_NEEDED);
        put_u16(&mut self.buf, 0); // general purpose flags
        put_u16(&mut self.buf, METHOD_STORED);
        put_u16(&mut self.buf, 0); // mod time
        put_u16(&mut self.buf, 0); // mod date
        put_u32(&mut self.buf, crc);
        put_u32(&mut self.buf, size); // compressed
        put_u32(&mut self.buf, size); // uncompressed
        put_u16(&mut self.buf, name_len);
        put_u16(&mut self.buf, 0); // extra field length
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.extend_from_slice(data);

        self.entries.push(ArchiveEntry {
            name: name.to_string(),
            crc,
            size,
            local_header_offset,
        });
        Ok(())
    }

    /// Appends the central directory and end record and returns the archive bytes.
    pub(crate) fn finish(mut self) -> Result<Vec<u8>, ArchiveError> {
        let central_start =
            u32::try_from(self.buf.len()).map_err(|_| ArchiveError::ArchiveTooLarge)?;

        for entry in &self.entries {
            self.buf.reserve(CENTRAL_HEADER_LEN + entry.name.len());
            put_u32(&mut self.buf, CENTRAL_DIRECTORY_SIGNATURE);
            put_u16(&mut self.buf, VERSION_MADE_BY);
            put_u16(&mut self.buf, VERSION_NEEDED);
            put_u16(&mut self.buf, 0); // general purpose flags
            put_u16(&mut self.buf, METHOD_STORED);
            put_u16(&mut self.buf, 0); // mod time
            put_u16(&mut self.buf, 0); // mod date
            put_u32(&mut self.buf, entry.crc);
            put_u32(&mut self.buf, entry.size);
            put_u32(&mut self.buf, entry.size);
            // add_entry already checked the name fits in u16
            put_u16(&mut self.buf, entry.name.len() as u16);
            put_u16(&mut self.buf, 0); // extra field length
            put_u16(&mut self.buf, 0); // comment length
            put_u16(&mut self.buf, 0); // disk number start
            put_u16(&mut self.buf, 0); // internal attributes
            put_u32(&mut self.buf, 0); // external attributes
            put_u32(&mut self.buf, entry.local_header_offset);
            self.buf.extend_from_slice(entry.name.as_bytes());
        }

        let central_end =
            u32::try_from(self.buf.len()).map_err(|_| ArchiveError::ArchiveTooLarge)?;
        let count = self.entries.len() as u16;

        self.buf.reserve(END_RECORD_LEN);
        put_u32(&mut self.buf, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        put_u16(&mut self.buf, 0); // this disk
        put_u16(&mut self.buf, 0); // disk holding the central directory
        put_u16(&mut self.buf, count);
        put_u16(&mut self.buf, count);
        put_u32(&mut self.buf, central_end - central_start);
        put_u32(&mut self.buf, central_start);
        put_u16(&mut self.buf, 0); // comment length

        Ok(self.buf)
    }
}

/// Builds a complete archive from `(name, bytes)` pairs, in the order given.
pub(crate) fn build<'a, I>(entries: I) -> Result<Vec<u8>, ArchiveError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut writer = ZipWriter::new();
    for (name, data) in entries {
        writer.add_entry(name, data)?;
    }
    writer.finish()
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}
