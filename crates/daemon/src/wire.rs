// crates/daemon/src/wire.rs
//! Flat records carried over the result pipes.
//!
//! Records travel between processes on the same host, so fields use the
//! native byte order. A record starts with a tag byte; a PID record is a
//! single `i32`, an error record flattens everything an [`Error`] carries
//! except its file path, which is rebuilt empty on the receiving side.
//! The errno field is present only for POSIX system errors.

use std::io::{Read, Write};

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use errors::{Category, Error, Kind, ProcessErrno, Result, UNKNOWN_CODE};

pub(crate) const TAG_PID: u8 = 42;
pub(crate) const TAG_ERROR: u8 = 23;

#[track_caller]
fn wire_err(err: std::io::Error) -> Error {
    Error::posix(err.raw_os_error().unwrap_or(0))
}

pub(crate) fn write_pid(writer: &mut impl Write, pid: i32) -> Result<()> {
    writer.write_u8(TAG_PID).map_err(wire_err)?;
    writer.write_i32::<NativeEndian>(pid).map_err(wire_err)?;
    writer.flush().map_err(wire_err)
}

pub(crate) fn read_pid(reader: &mut impl Read) -> Result<i32> {
    let tag = reader.read_u8().map_err(wire_err)?;
    assert!(tag == TAG_PID, "unexpected record tag on the result pipe");
    reader.read_i32::<NativeEndian>().map_err(wire_err)
}

pub(crate) fn write_error(writer: &mut impl Write, error: &Error) -> Result<()> {
    writer.write_u8(TAG_ERROR).map_err(wire_err)?;
    writer.write_u8(error.kind() as u8).map_err(wire_err)?;
    writer.write_u8(error.category() as u8).map_err(wire_err)?;
    writer.write_u32::<NativeEndian>(error.code()).map_err(wire_err)?;
    if error.category() == Category::Process
        && error.code() == ProcessErrno::PosixSystem as u32
    {
        writer
            .write_i32::<NativeEndian>(error.errno().unwrap_or(0))
            .map_err(wire_err)?;
    }
    writer.write_u32::<NativeEndian>(error.line()).map_err(wire_err)?;
    writer.write_i64::<NativeEndian>(error.seconds()).map_err(wire_err)?;
    writer
        .write_i64::<NativeEndian>(error.microseconds())
        .map_err(wire_err)?;
    writer.flush().map_err(wire_err)
}

pub(crate) fn read_error(reader: &mut impl Read) -> Result<Error> {
    let tag = reader.read_u8().map_err(wire_err)?;
    assert!(tag == TAG_ERROR, "unexpected record tag on the result pipe");
    let kind = match reader.read_u8().map_err(wire_err)? {
        0 => Kind::Logic,
        _ => Kind::Runtime,
    };
    let raw_category = reader.read_u8().map_err(wire_err)?;
    let mut code = reader.read_u32::<NativeEndian>().map_err(wire_err)?;
    let category = match raw_category {
        1 => Category::Assert,
        2 => Category::Process,
        _ => {
            code = UNKNOWN_CODE;
            Category::Unknown
        }
    };
    let errno = if category == Category::Process && code == ProcessErrno::PosixSystem as u32 {
        Some(reader.read_i32::<NativeEndian>().map_err(wire_err)?)
    } else {
        None
    };
    let line = reader.read_u32::<NativeEndian>().map_err(wire_err)?;
    let seconds = reader.read_i64::<NativeEndian>().map_err(wire_err)?;
    let microseconds = reader.read_i64::<NativeEndian>().map_err(wire_err)?;
    Ok(Error::from_parts(
        kind,
        category,
        code,
        errno,
        String::new(),
        line,
        seconds,
        microseconds,
    ))
}
