//! Line oriented `key=value` protocol spoken by the firmware update server.
//!
//! A frame is whatever one socket read delivers; there is no length prefix
//! or terminator. Outbound frames are command lines joined by `\n` without a
//! trailing newline.

use bytes::{BufMut, BytesMut};
use log::debug;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

mod types;

pub use self::types::{
    join_list, parse_list, Command, DeviceId, FirmwareSet, InboundFrame, UpdateRequest,
};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

const KEY_DEVICES: &str = "devices";
const KEY_UPDATED: &str = "updated";

/// Joins already formatted command lines into one outbound frame.
pub fn encode_frame<S: AsRef<str>>(lines: &[S]) -> BytesMut {
    let mut buf = BytesMut::new();
    encode_lines(lines.iter().map(AsRef::as_ref), &mut buf);
    buf
}

fn encode_lines<'a>(lines: impl Iterator<Item = &'a str>, dst: &mut BytesMut) {
    for (i, line) in lines.enumerate() {
        if i > 0 {
            dst.put_u8(b'\n');
        }
        dst.extend_from_slice(line.as_bytes());
    }
}

/// Decodes one inbound frame. Never fails: lines without `=` and unknown
/// keys are counted and skipped.
pub fn decode_frame(raw: &[u8]) -> InboundFrame {
    let text = String::from_utf8_lossy(raw);
    let mut frame = InboundFrame::default();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            continue;
        }

        let Some((key, _)) = line.split_once('=') else {
            frame.ignored_lines += 1;
            continue;
        };
        // everything after the key, minus boundary '=' characters
        let value = line[key.len()..].trim_matches('=');

        match key {
            KEY_DEVICES => frame.devices = Some(parse_list(value)),
            KEY_UPDATED => frame.updated = Some(parse_list(value)),
            _ => {
                debug!("Ignoring unknown key '{}'", key);
                frame.ignored_lines += 1;
            }
        }
    }

    frame
}

#[derive(Debug, Clone)]
pub struct KvCodec {
    max_frame_size: usize,
}

impl KvCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.max(1),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for KvCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for KvCodec {
    type Item = InboundFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<InboundFrame>, Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let len = src.len().min(self.max_frame_size);
        let raw = src.split_to(len);
        debug!("Received frame of {} bytes", raw.len());
        Ok(Some(decode_frame(&raw)))
    }
}

impl Encoder<UpdateRequest> for KvCodec {
    type Error = Error;

    fn encode(&mut self, request: UpdateRequest, dst: &mut BytesMut) -> Result<(), Error> {
        let lines: Vec<String> = request.commands().iter().map(ToString::to_string).collect();
        encode_lines(lines.iter().map(String::as_str), dst);
        Ok(())
    }
}
