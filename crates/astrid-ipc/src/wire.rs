//! Buffer wire format.
//!
//! A rendered buffer travels together with the message that requested it:
//!
//! | field        | type  |
//! |--------------|-------|
//! | audio bytes  | u64   |
//! | frames       | u64   |
//! | channels     | u32   |
//! | sample rate  | u32   |
//! | loop flag    | u32   |
//! | onset        | u64   |
//! | samples      | f32 * frames * channels |
//! | message      | bincode record |
//!
//! Integers and samples use native byte order: the format is for shared-memory
//! and pipe transport between processes on one host, not for the network.
//!
//! The message record is not fixed-size. Bincode writes the instrument name
//! and payload with length prefixes, so a frame's length depends on both
//! (bounded by [`MAX_INSTRUMENT_NAME`] and [`MAX_PAYLOAD`]). The record is
//! always the tail of the frame and is read to its end.
//!
//! [`MAX_INSTRUMENT_NAME`]: crate::protocol::MAX_INSTRUMENT_NAME
//! [`MAX_PAYLOAD`]: crate::protocol::MAX_PAYLOAD

use crate::error::{IpcError, Result};
use crate::protocol::Message;
use astrid_core::AudioBuffer;

/// Size of the fixed header preceding the samples.
pub const HEADER_LEN: usize = 8 + 8 + 4 + 4 + 4 + 8;

const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

pub fn serialize(buffer: &AudioBuffer, message: &Message) -> Result<Vec<u8>> {
    message.validate()?;

    let samples = buffer.samples();
    let audio_bytes = samples.len() * SAMPLE_SIZE;
    let record = bincode::serialize(message)?;

    let mut out = Vec::with_capacity(HEADER_LEN + audio_bytes + record.len());
    out.extend_from_slice(&(audio_bytes as u64).to_ne_bytes());
    out.extend_from_slice(&(buffer.frames() as u64).to_ne_bytes());
    out.extend_from_slice(&buffer.channels().to_ne_bytes());
    out.extend_from_slice(&buffer.sample_rate().to_ne_bytes());
    out.extend_from_slice(&u32::from(buffer.is_looping()).to_ne_bytes());
    out.extend_from_slice(&buffer.onset().to_ne_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_ne_bytes());
    }
    out.extend_from_slice(&record);

    Ok(out)
}

pub fn deserialize(bytes: &[u8]) -> Result<(AudioBuffer, Message)> {
    if bytes.len() < HEADER_LEN {
        return Err(IpcError::WireFormat(format!(
            "{} bytes is shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }

    let mut reader = Reader { bytes, pos: 0 };
    let audio_bytes = reader.u64()? as usize;
    let frames = reader.u64()? as usize;
    let channels = reader.u32()?;
    let sample_rate = reader.u32()?;
    let looping = match reader.u32()? {
        0 => false,
        1 => true,
        other => {
            return Err(IpcError::WireFormat(format!("invalid loop flag {other}")));
        }
    };
    let onset = reader.u64()?;

    let expected = frames
        .checked_mul(channels as usize)
        .and_then(|n| n.checked_mul(SAMPLE_SIZE));
    if expected != Some(audio_bytes) {
        return Err(IpcError::WireFormat(format!(
            "audio length {audio_bytes} does not match {frames} frames x {channels} channels"
        )));
    }

    let audio = reader.take(audio_bytes)?;
    let samples = audio
        .chunks_exact(SAMPLE_SIZE)
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let message: Message = bincode::deserialize(reader.rest())?;
    message.validate()?;

    let buffer = AudioBuffer::new(samples, channels, sample_rate)
        .map_err(|e| IpcError::WireFormat(e.to_string()))?
        .with_loop(looping)
        .with_onset(onset);

    Ok((buffer, message))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                IpcError::WireFormat(format!(
                    "truncated: need {len} bytes at offset {}, have {}",
                    self.pos,
                    self.bytes.len() - self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_ne_bytes(raw))
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}
