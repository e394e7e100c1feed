//! Framing layer for [`Control`] streams: a fixed header followed by one
//! varint-framed message per record. The stream is deliberately left
//! uncompressed; a downstream stage is expected to compress.

use super::Control;
use integer_encoding::VarIntWriter;
use std::io::{self, Write};

pub const MAGIC: u32 = 0xB5D1;
pub const VERSION: u32 = 0x1000;

/// Upper bound reserved for a single framed message. Not enforced yet,
/// neither here nor by the engine.
pub const MAX_MESSAGE_PAYLOAD: usize = 16 * 1024 * 1024;

pub(crate) const FLAG_EOF: u32 = 1;

pub struct Writer<W>
where
    W: Write,
{
    w: W,
}

impl<W> Writer<W>
where
    W: Write,
{
    pub fn new(mut w: W) -> Result<Self, io::Error> {
        w.write_all(&MAGIC.to_le_bytes())?;
        w.write_all(&VERSION.to_le_bytes())?;

        Ok(Self { w })
    }

    /// Serialize one record: a flags varint (bit 0 marks the eof record),
    /// the length-prefixed add and copy regions, then the zigzag seek.
    pub fn write(&mut self, c: &Control) -> Result<(), io::Error> {
        let w = &mut self.w;

        let flags: u32 = if c.eof { FLAG_EOF } else { 0 };
        w.write_varint(flags)?;

        w.write_varint(c.add.len() as u64)?;
        w.write_all(c.add)?;

        w.write_varint(c.copy.len() as u64)?;
        w.write_all(c.copy)?;

        w.write_varint(c.seek)?;

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), io::Error> {
        self.w.flush()
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}
