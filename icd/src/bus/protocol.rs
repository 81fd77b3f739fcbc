//! Socket bus wire frames
//!
//! Newline-delimited JSON. Each frame is a single line followed by `\n`.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::BusError;

/// Maximum frame size in bytes, newline excluded
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frames sent by a bus client to the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving messages for `channel` on this connection
    Subscribe { channel: String },

    /// Deliver `payload` to every subscriber of `channel`
    Publish { channel: String, payload: String },
}

/// Frames sent by the broker to a bus client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Subscription is registered, later publishes will be delivered
    Subscribed { channel: String },

    /// A message published on a subscribed channel
    Message { channel: String, payload: String },
}

/// Serialize a frame as one newline-terminated line
pub fn encode_line<T: Serialize>(frame: &T) -> Result<String, BusError> {
    let mut line = serde_json::to_string(frame)?;
    if line.len() > MAX_FRAME_SIZE {
        return Err(BusError::FrameTooLarge(line.len()));
    }
    line.push('\n');
    Ok(line)
}

/// Outcome of reading one line from a frame stream
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete line is in the buffer
    Frame,
    /// A line longer than [`MAX_FRAME_SIZE`] was skipped without being buffered
    Oversized(usize),
    /// The peer closed the stream
    Eof,
}

/// Read the next newline-terminated frame into `buf`
///
/// At most `MAX_FRAME_SIZE + 1` bytes are ever held. Bytes of an oversized
/// line are consumed and dropped as they arrive, and reading resumes at the
/// next line. A final line without a newline still counts as a frame.
pub async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<FrameRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut discarded = 0usize;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if discarded > 0 {
                FrameRead::Oversized(discarded)
            } else if buf.is_empty() {
                FrameRead::Eof
            } else {
                FrameRead::Frame
            });
        }

        let newline = available.iter().position(|b| *b == b'\n');
        let used = newline.map_or(available.len(), |i| i + 1);

        if discarded == 0 && buf.len() + used <= MAX_FRAME_SIZE + 1 {
            buf.extend_from_slice(&available[..used]);
        } else {
            discarded += buf.len() + used;
            buf.clear();
        }
        reader.consume(used);

        if newline.is_some() {
            return Ok(if discarded > 0 {
                FrameRead::Oversized(discarded)
            } else {
                FrameRead::Frame
            });
        }
    }
}
