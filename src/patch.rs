//! Apply engine for the [`enc`](crate::enc) framing: replays a control
//! stream against an old buffer and writes out the reconstructed new
//! buffer, validating cursor bounds and stream shape along the way.

use crate::enc::{FLAG_EOF, MAGIC, VERSION};
use integer_encoding::VarIntReader;
use std::io::{self, Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error("wrong magic: expected `{MAGIC:X}`, got `{0:X}`")]
    WrongMagic(u32),
    #[error("wrong version: expected `{VERSION:X}`, got `{0:X}`")]
    WrongVersion(u32),
    #[error("malformed patch: {0}")]
    Malformed(&'static str),
}

/// Rebuild the new buffer from `old` and a framed control stream.
///
/// Returns the number of bytes written. The old-side cursor is checked to
/// stay within `[0, old.len()]` after every record, and the stream must
/// end with exactly one eof record followed by nothing.
pub fn apply<R, W>(mut patch: R, old: &[u8], mut out: W) -> Result<u64, ApplyError>
where
    R: Read,
    W: Write,
{
    let mut raw = [0_u8; 4];
    patch.read_exact(&mut raw)?;
    let magic = u32::from_le_bytes(raw);
    if magic != MAGIC {
        return Err(ApplyError::WrongMagic(magic));
    }
    patch.read_exact(&mut raw)?;
    let version = u32::from_le_bytes(raw);
    if version != VERSION {
        return Err(ApplyError::WrongVersion(version));
    }

    let mut old_pos = 0_usize;
    let mut written = 0_u64;
    let mut add = Vec::new();

    loop {
        let flags: u32 = patch.read_varint()?;

        let add_len: u64 = patch.read_varint()?;
        let add_len = usize::try_from(add_len)
            .map_err(|_| ApplyError::Malformed("add region does not fit in memory"))?;
        if add_len > old.len() - old_pos {
            return Err(ApplyError::Malformed("add region overruns the old buffer"));
        }
        add.resize(add_len, 0);
        patch.read_exact(&mut add)?;
        for (d, &o) in add.iter_mut().zip(&old[old_pos..old_pos + add_len]) {
            *d = d.wrapping_add(o);
        }
        out.write_all(&add)?;
        old_pos += add_len;
        written += add_len as u64;

        let copy_len: u64 = patch.read_varint()?;
        if copy_len > 0 {
            let copied = io::copy(&mut (&mut patch).take(copy_len), &mut out)?;
            if copied < copy_len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated copy region",
                )
                .into());
            }
            written += copied;
        }

        let seek: i64 = patch.read_varint()?;
        let next = old_pos as i64 + seek;
        if next < 0 || next > old.len() as i64 {
            return Err(ApplyError::Malformed("seek leaves the old buffer"));
        }
        old_pos = next as usize;

        if flags & FLAG_EOF != 0 {
            if add_len != 0 || copy_len != 0 || seek != 0 {
                return Err(ApplyError::Malformed("eof record carries data"));
            }
            break;
        }
    }

    let mut trailing = [0_u8; 1];
    match patch.read(&mut trailing)? {
        0 => {}
        _ => return Err(ApplyError::Malformed("data after the eof record")),
    }

    out.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use integer_encoding::VarIntWriter;

    fn header() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf
    }

    fn push_record(buf: &mut Vec<u8>, flags: u32, add: &[u8], copy: &[u8], seek: i64) {
        buf.write_varint(flags).unwrap();
        buf.write_varint(add.len() as u64).unwrap();
        buf.extend_from_slice(add);
        buf.write_varint(copy.len() as u64).unwrap();
        buf.extend_from_slice(copy);
        buf.write_varint(seek).unwrap();
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut buf = header();
        buf[0] ^= 0xFF;
        push_record(&mut buf, FLAG_EOF, b"", b"", 0);
        let err = apply(&buf[..], b"", &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ApplyError::WrongMagic(_)));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut buf = header();
        buf[4] ^= 0xFF;
        push_record(&mut buf, FLAG_EOF, b"", b"", 0);
        let err = apply(&buf[..], b"", &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ApplyError::WrongVersion(_)));
    }

    #[test]
    fn rejects_add_overrun() {
        let mut buf = header();
        push_record(&mut buf, 0, b"\x01\x01\x01", b"", 0);
        push_record(&mut buf, FLAG_EOF, b"", b"", 0);
        let err = apply(&buf[..], b"ab", &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ApplyError::Malformed(_)));
    }

    #[test]
    fn rejects_seek_out_of_bounds() {
        let mut buf = header();
        push_record(&mut buf, 0, b"", b"x", -1);
        push_record(&mut buf, FLAG_EOF, b"", b"", 0);
        let err = apply(&buf[..], b"ab", &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ApplyError::Malformed("seek leaves the old buffer")
        ));
    }

    #[test]
    fn rejects_data_after_eof() {
        let mut buf = header();
        push_record(&mut buf, FLAG_EOF, b"", b"", 0);
        push_record(&mut buf, 0, b"", b"x", 0);
        let err = apply(&buf[..], b"", &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ApplyError::Malformed("data after the eof record")
        ));
    }

    #[test]
    fn rejects_eof_record_with_payload() {
        let mut buf = header();
        push_record(&mut buf, FLAG_EOF, b"", b"x", 0);
        let err = apply(&buf[..], b"", &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ApplyError::Malformed("eof record carries data")));
    }

    #[test]
    fn applies_hand_built_stream() {
        // add "ab" shifted by one, copy "XY", seek back to 0
        let mut buf = header();
        push_record(&mut buf, 0, b"\x01\x01", b"XY", -2);
        push_record(&mut buf, 0, b"\x02\x02", b"", 0);
        push_record(&mut buf, FLAG_EOF, b"", b"", 0);

        let mut out = Vec::new();
        let written = apply(&buf[..], b"ab", &mut out).unwrap();
        assert_eq!(written, 6);
        assert_eq!(out, b"bcXYcd");
    }
}
