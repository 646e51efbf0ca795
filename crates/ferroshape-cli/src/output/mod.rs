//! JSON rendering for command results.

use std::io::Write;

use serde::Serialize;

use crate::error::CliError;

pub fn write_json<W: Write, T: Serialize>(mut out: W, value: &T, pretty: bool) -> Result<(), CliError> {
    if pretty {
        serde_json::to_writer_pretty(&mut out, value)?;
    } else {
        serde_json::to_writer(&mut out, value)?;
    }
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
