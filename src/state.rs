use crate::error::{BridgeError, Result, StateSegment};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Upper bound on one framed segment; anything larger is treated as corrupt.
pub const MAX_SEGMENT_LEN: u32 = 256 << 20;

/// Plugin state snapshot. Both segments are opaque plugin bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStateBlob {
    pub plugin_id: String,
    pub component_state: Vec<u8>,
    pub controller_state: Vec<u8>,
}

impl PluginStateBlob {
    /// Writes the component segment followed by the controller segment, each
    /// prefixed with its little-endian `u32` length.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        write_segment(out, &self.component_state, StateSegment::Component)?;
        write_segment(out, &self.controller_state, StateSegment::Controller)?;
        Ok(())
    }

    pub fn read_from<R: Read>(plugin_id: &str, input: &mut R) -> Result<Self> {
        let component_state = read_segment(input, StateSegment::Component)?;
        let controller_state = read_segment(input, StateSegment::Controller)?;
        Ok(Self {
            plugin_id: plugin_id.to_string(),
            component_state,
            controller_state,
        })
    }
}

fn write_segment<W: Write>(out: &mut W, data: &[u8], segment: StateSegment) -> Result<()> {
    let len = u32::try_from(data.len())
        .ok()
        .filter(|&len| len <= MAX_SEGMENT_LEN)
        .ok_or_else(|| {
            BridgeError::MalformedState(format!("{segment} state of {} bytes is too large", data.len()))
        })?;
    out.write_u32::<LittleEndian>(len)?;
    out.write_all(data)?;
    Ok(())
}

fn read_segment<R: Read>(input: &mut R, segment: StateSegment) -> Result<Vec<u8>> {
    let truncated = |e: std::io::Error| {
        if e.kind() == ErrorKind::UnexpectedEof {
            BridgeError::MalformedState(format!("truncated {segment} segment"))
        } else {
            BridgeError::Io(e)
        }
    };
    let len = input.read_u32::<LittleEndian>().map_err(truncated)?;
    if len > MAX_SEGMENT_LEN {
        return Err(BridgeError::MalformedState(format!(
            "{segment} segment claims {len} bytes"
        )));
    }
    // The header is untrusted, so the buffer only grows with bytes that arrive.
    let mut data = Vec::new();
    input.by_ref().take(u64::from(len)).read_to_end(&mut data)?;
    if data.len() != len as usize {
        return Err(BridgeError::MalformedState(format!(
            "truncated {segment} segment: {} of {len} bytes",
            data.len()
        )));
    }
    Ok(data)
}

/// Holds the loading flag up for as long as it lives.
pub struct LoadingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> LoadingGuard<'a> {
    pub fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
