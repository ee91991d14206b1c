// ByteBuffer - little-endian cursor over a loaded data file
// Used to decode .map / .mmap / .mmtile files and to build test fixtures

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io;

fn read_past_end(wanted: usize, pos: usize, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("ByteBuffer read past end (wanted {} bytes at {}, size {})", wanted, pos, len),
    )
}

/// A byte buffer holding a whole data file with a movable read position.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl ByteBuffer {
    /// Create a new empty ByteBuffer
    pub fn new() -> Self {
        ByteBuffer {
            data: Vec::new(),
            read_pos: 0,
        }
    }

    /// Wrap already loaded bytes (e.g. the result of `fs::read`)
    pub fn from_vec(data: Vec<u8>) -> Self {
        ByteBuffer { data, read_pos: 0 }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Bytes left between the read position and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    /// Move the read position to an absolute offset (fseek SEEK_SET).
    /// Seeking past the end is allowed; the next read fails.
    pub fn set_read_pos(&mut self, pos: usize) {
        self.read_pos = pos;
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer and return the underlying bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn take(&mut self, count: usize) -> io::Result<&[u8]> {
        let end = self
            .read_pos
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| read_past_end(count, self.read_pos, self.data.len()))?;
        let slice = &self.data[self.read_pos..end];
        self.read_pos = end;
        Ok(slice)
    }

    // ---- Write operations (append) ----

    pub fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    pub fn write_u8(&mut self, val: u8) {
        self.data.push(val);
    }

    pub fn write_u16(&mut self, val: u16) {
        // Writing into a Vec cannot fail
        let _ = self.data.write_u16::<LittleEndian>(val);
    }

    pub fn write_i16(&mut self, val: i16) {
        let _ = self.data.write_i16::<LittleEndian>(val);
    }

    pub fn write_u32(&mut self, val: u32) {
        let _ = self.data.write_u32::<LittleEndian>(val);
    }

    pub fn write_i32(&mut self, val: i32) {
        let _ = self.data.write_i32::<LittleEndian>(val);
    }

    pub fn write_f32(&mut self, val: f32) {
        let _ = self.data.write_f32::<LittleEndian>(val);
    }

    // ---- Read operations ----

    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_f32(&mut self) -> io::Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Read `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> io::Result<Vec<u8>> {
        Ok(self.take(count)?.to_vec())
    }

    /// Read `count` little-endian u16 values (fread of a uint16 array)
    pub fn read_u16_vec(&mut self, count: usize) -> io::Result<Vec<u16>> {
        let raw = self.take(count * 2)?;
        let mut out = vec![0u16; count];
        LittleEndian::read_u16_into(raw, &mut out);
        Ok(out)
    }

    pub fn read_i16_vec(&mut self, count: usize) -> io::Result<Vec<i16>> {
        let raw = self.take(count * 2)?;
        let mut out = vec![0i16; count];
        LittleEndian::read_i16_into(raw, &mut out);
        Ok(out)
    }

    pub fn read_f32_vec(&mut self, count: usize) -> io::Result<Vec<f32>> {
        let raw = self.take(count * 4)?;
        let mut out = vec![0f32; count];
        LittleEndian::read_f32_into(raw, &mut out);
        Ok(out)
    }

    /// Skip N bytes in the read position
    pub fn read_skip(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count).min(self.data.len());
    }
}

impl std::fmt::Display for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteBuffer(size={}, rpos={})", self.size(), self.read_pos)
    }
}
