use super::ProviderError;

/// Payload that ends an OpenAI-style stream.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Payload of a `data:` line, marker and surrounding whitespace stripped.
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Longest unterminated line the decoder will hold before giving up.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Line-oriented SSE decoder.
///
/// - Buffers raw bytes so UTF-8 sequences split across reads are reassembled
/// - Skips blank lines and every field other than `data:`
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no newline.
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read and return the complete lines it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseLine>, ProviderError> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        let mut start = 0;

        while let Some(off) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + off + 1;
            if let Some(ev) = decode_line(&self.buf[start..end])? {
                out.push(ev);
            }
            start = end;
            self.scanned = end;
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();
        if self.buf.len() > MAX_LINE_BYTES {
            return Err(ProviderError::Decode(format!(
                "SSE line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(out)
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Result<Option<SseLine>, ProviderError> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Result<Option<SseLine>, ProviderError> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| ProviderError::Decode(format!("SSE line is not valid UTF-8: {e}")))?;
    let line = line.trim_end_matches(['\n', '\r']);

    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(data) = line.strip_prefix("data:") else {
        // event:, id:, retry: and comments.
        return Ok(None);
    };

    let data = data.trim();
    if data == DONE_MARKER {
        return Ok(Some(SseLine::Done));
    }
    Ok(Some(SseLine::Data(data.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_and_strips_marker() {
        let mut dec = SseDecoder::new();
        let out = dec
            .push(b"data: {\"a\":1}\n\ndata:{\"b\":2}\r\n\ndata: [DONE]\n\n")
            .unwrap();
        assert_eq!(
            out,
            vec![
                SseLine::Data("{\"a\":1}".into()),
                SseLine::Data("{\"b\":2}".into()),
                SseLine::Done,
            ]
        );
    }

    #[test]
    fn ignores_other_fields() {
        let mut dec = SseDecoder::new();
        let out = dec
            .push(b": keep-alive\nevent: message\nid: 7\nretry: 100\n   \ndata: x\n")
            .unwrap();
        assert_eq!(out, vec![SseLine::Data("x".into())]);
    }

    #[test]
    fn reassembles_lines_across_reads() {
        let mut dec = SseDecoder::new();
        let text = "data: héllo\n";
        let bytes = text.as_bytes();
        // Split inside the two-byte 'é'.
        let cut = text.find('é').unwrap() + 1;

        assert!(dec.push(&bytes[..cut]).unwrap().is_empty());
        assert_eq!(dec.push(&bytes[cut..]).unwrap(), vec![SseLine::Data("héllo".into())]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: [DONE]").unwrap().is_empty());
        assert_eq!(dec.finish().unwrap(), Some(SseLine::Done));
        assert_eq!(dec.finish().unwrap(), None);
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let mut dec = SseDecoder::new();
        let err = dec.push(b"data: \xff\xfe\n").unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn long_line_in_small_reads() {
        let mut dec = SseDecoder::new();
        let payload = "x".repeat(10_000);
        let line = format!("data: {payload}\ndata: [DONE]\n");

        let mut out = Vec::new();
        for piece in line.as_bytes().chunks(7) {
            out.extend(dec.push(piece).unwrap());
        }
        assert_eq!(out, vec![SseLine::Data(payload), SseLine::Done]);
        assert_eq!(dec.finish().unwrap(), None);
    }

    #[test]
    fn oversized_line_is_a_decode_error() {
        let mut dec = SseDecoder::new();
        let mut big = b"data: ".to_vec();
        big.resize(MAX_LINE_BYTES + 1, b'a');
        let err = dec.push(&big).unwrap_err();
        assert!(matches!(err, ProviderError::Decode(ref m) if m.contains("exceeds")));
    }
}
