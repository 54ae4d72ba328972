/// Incremental server-sent-events decoder yielding the `data` payload of each event.
///
/// Network reads split events at arbitrary byte offsets, so bytes are buffered until a
/// blank-line delimiter (`\n\n` or `\r\n\r\n`) closes the frame.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(frame) = self.next_frame() {
            if let Some(data) = data_from_frame(&String::from_utf8_lossy(&frame)) {
                events.push(data);
            }
        }
        events
    }

    /// Flushes a trailing frame the server closed without a delimiter.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let frame = std::mem::take(&mut self.buffer);
        data_from_frame(&String::from_utf8_lossy(&frame))
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let crlf = find(&self.buffer, b"\r\n\r\n").map(|pos| (pos, 4));
        let lf = find(&self.buffer, b"\n\n").map(|pos| (pos, 2));
        let (pos, delimiter_len) = [crlf, lf]
            .into_iter()
            .flatten()
            .min_by_key(|(pos, _)| *pos)?;

        let frame = self.buffer.drain(..pos).collect();
        self.buffer.drain(..delimiter_len);
        Some(frame)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn data_from_frame(frame: &str) -> Option<String> {
    let mut data_lines: Vec<&str> = Vec::new();

    for raw_line in frame.lines() {
        let line = raw_line.trim_end_matches('\r');
        // Comment lines are keep-alives (e.g. ": OPENROUTER PROCESSING").
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(data_lines.join("\n"))
}
