use std::io::Write;

use crate::{error::ServiceError, model::TextCodec};

/// Receives generated text as it is produced.
pub trait TokenSink {
    fn on_text(&mut self, text: &str) -> Result<(), ServiceError>;

    fn on_finish(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Discards streamed output.
pub struct NullSink;

impl TokenSink for NullSink {
    fn on_text(&mut self, _text: &str) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Writes streamed text straight to a writer, flushing after every chunk.
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TokenSink for WriterSink<W> {
    fn on_text(&mut self, text: &str) -> Result<(), ServiceError> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    fn on_finish(&mut self) -> Result<(), ServiceError> {
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Turns a growing list of token ids into text deltas.
///
/// The whole pending sequence is re-decoded on each push because byte-level
/// tokenizers only produce valid text once a multi-byte character is
/// complete. Text ending in U+FFFD is held back until the next token.
#[derive(Default)]
pub struct StreamDecoder {
    ids: Vec<u32>,
    emitted: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, codec: &dyn TextCodec, id: u32) -> Result<Option<String>, ServiceError> {
        self.ids.push(id);
        let text = codec.decode(&self.ids, true)?;
        if text.ends_with('\u{FFFD}') || text.len() <= self.emitted {
            return Ok(None);
        }
        let delta = match text.get(self.emitted..) {
            Some(delta) => delta.to_string(),
            None => return Ok(None),
        };
        self.emitted = text.len();
        Ok(Some(delta))
    }

    /// Returns whatever is still pending once generation has stopped.
    pub fn flush(&mut self, codec: &dyn TextCodec) -> Result<Option<String>, ServiceError> {
        let text = codec.decode(&self.ids, true)?;
        if text.len() <= self.emitted {
            return Ok(None);
        }
        let delta = text.get(self.emitted..).map(str::to_string);
        self.emitted = text.len();
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::ByteCodec;

    #[test]
    fn ascii_tokens_stream_one_by_one() {
        let codec = ByteCodec::default();
        let mut decoder = StreamDecoder::new();
        let mut out = String::new();
        for &b in b"wire a;" {
            if let Some(delta) = decoder.push(&codec, b as u32).unwrap() {
                out.push_str(&delta);
            }
        }
        assert_eq!(out, "wire a;");
        assert!(decoder.flush(&codec).unwrap().is_none());
    }

    #[test]
    fn incomplete_utf8_is_held_back() {
        let codec = ByteCodec::default();
        let mut decoder = StreamDecoder::new();
        let bytes = "µ".as_bytes();
        assert!(decoder.push(&codec, bytes[0] as u32).unwrap().is_none());
        assert_eq!(
            decoder.push(&codec, bytes[1] as u32).unwrap().as_deref(),
            Some("µ")
        );
    }

    #[test]
    fn writer_sink_appends_newline_on_finish() {
        let mut sink = WriterSink::new(Vec::new());
        sink.on_text("assign y = a;").unwrap();
        sink.on_finish().unwrap();
        assert_eq!(sink.into_inner(), b"assign y = a;\n");
    }
}
