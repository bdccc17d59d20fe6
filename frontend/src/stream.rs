//! Incremental decoding of the analysis event stream.
//!
//! The backend streams newline-delimited records, each blank or prefixed
//! `data: ` followed by a JSON object. Chunk boundaries are arbitrary: a
//! record, or a single multi-byte character, can be split across reads.
//! [`EventStreamDecoder`] reassembles chunks into records independently of
//! the transport, so the same byte stream produces the same record
//! sequence no matter how it was chunked.

use shared::{PredictResponse, ProgressUpdate, Stage, StreamMessage};

const DATA_PREFIX: &str = "data: ";

/// One decoded record. `Progress` may occur any number of times; the other
/// variants are terminal and each decoder produces at most one of them.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    Progress(ProgressUpdate),
    Complete(PredictResponse),
    /// Server-signaled analysis failure, with its message.
    Failed(String),
    /// End of input without a terminal record.
    Truncated,
}

impl StreamRecord {
    fn is_terminal(&self) -> bool {
        !matches!(self, StreamRecord::Progress(_))
    }
}

pub struct EventStreamDecoder {
    /// Undecoded tail bytes: at most one incomplete UTF-8 sequence.
    carry: Vec<u8>,
    /// Decoded text not yet terminated by a newline.
    pending: String,
    finished: bool,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self {
            carry: Vec::new(),
            pending: String::new(),
            finished: false,
        }
    }

    /// Feeds one chunk and returns every record it completed, in arrival
    /// order. After a terminal record the decoder discards all further
    /// input.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
        if self.finished {
            return Vec::new();
        }

        self.decode_utf8(chunk);

        let mut records = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let Some(record) = parse_line(line.trim_end_matches(['\n', '\r'])) else {
                continue;
            };
            let terminal = record.is_terminal();
            records.push(record);
            if terminal {
                self.finished = true;
                self.carry.clear();
                self.pending.clear();
                break;
            }
        }
        records
    }

    /// Signals end of input. Yields exactly one synthetic truncation
    /// record if no terminal record was produced; `None` afterwards.
    pub fn finish(&mut self) -> Option<StreamRecord> {
        if self.finished {
            return None;
        }
        self.finished = true;
        if !self.pending.trim().is_empty() || !self.carry.is_empty() {
            log::debug!(
                "discarding unterminated stream fragment ({} chars, {} bytes)",
                self.pending.len(),
                self.carry.len()
            );
        }
        Some(StreamRecord::Truncated)
    }

    /// Appends the longest decodable prefix of `carry + chunk` to
    /// `pending`. An incomplete trailing sequence stays in `carry`;
    /// invalid bytes become replacement characters.
    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(text) => {
                    self.pending.push_str(text);
                    self.carry.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.pending
                        .push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match err.error_len() {
                        // Incomplete trailing sequence: wait for the next chunk.
                        None => {
                            self.carry.drain(..valid);
                            return;
                        }
                        Some(invalid) => {
                            self.pending.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + invalid);
                        }
                    }
                }
            }
        }
    }
}

impl Default for EventStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line(line: &str) -> Option<StreamRecord> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    match serde_json::from_str::<StreamMessage>(payload) {
        Ok(message) => Some(classify(message)),
        Err(err) => {
            log::warn!("skipping malformed stream record: {err}");
            None
        }
    }
}

/// A `complete` record carrying a result and an `error` record are
/// terminal; everything else, including a `complete` without a payload,
/// is a progress update.
fn classify(message: StreamMessage) -> StreamRecord {
    let StreamMessage {
        stage,
        progress,
        message,
        result,
    } = message;

    match (Stage::classify(&stage), result) {
        (Stage::Complete, Some(result)) => StreamRecord::Complete(result),
        (Stage::Error, _) => {
            StreamRecord::Failed(message.unwrap_or_else(|| "Analysis failed".to_string()))
        }
        (stage, _) => StreamRecord::Progress(ProgressUpdate {
            stage,
            progress: progress.map(|p| p.round() as u32),
            message: message.unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETE_RESULT: &str = r#"{"image_path":"uploads/img.png","segments":[],"counts":{"resnet":{},"mapped":{}},"candidate_labels":["cat","dog"]}"#;

    fn full_stream() -> Vec<u8> {
        format!(
            "data: {{\"stage\":\"queued\",\"progress\":0,\"message\":\"Queued\"}}\n\
             \n\
             data: {{\"stage\":\"processing\",\"progress\":42,\"message\":\"Segmenting 画像\"}}\n\
             data: {{\"stage\":\"complete\",\"progress\":100,\"result\":{COMPLETE_RESULT}}}\n"
        )
        .into_bytes()
    }

    fn decode_in_chunks(bytes: &[u8], chunk_len: usize) -> Vec<StreamRecord> {
        let mut decoder = EventStreamDecoder::new();
        let mut records = Vec::new();
        for chunk in bytes.chunks(chunk_len.max(1)) {
            records.extend(decoder.push(chunk));
        }
        records.extend(decoder.finish());
        records
    }

    #[test]
    fn record_sequence_is_invariant_under_rechunking() {
        let bytes = full_stream();
        let whole = decode_in_chunks(&bytes, bytes.len());
        for chunk_len in [1, 2, 3, 7, 16, 64] {
            assert_eq!(decode_in_chunks(&bytes, chunk_len), whole, "chunk_len={chunk_len}");
        }

        assert_eq!(whole.len(), 3);
        assert!(matches!(&whole[0], StreamRecord::Progress(p) if p.stage == Stage::Queued));
        assert!(
            matches!(&whole[1], StreamRecord::Progress(p) if p.progress == Some(42)
                && p.message == "Segmenting 画像")
        );
        let StreamRecord::Complete(result) = &whole[2] else {
            panic!("expected terminal result, got {:?}", whole[2]);
        };
        assert_eq!(result.candidate_labels, vec!["cat", "dog"]);
    }

    #[test]
    fn multibyte_character_split_at_chunk_boundary_survives() {
        let bytes = "data: {\"stage\":\"processing\",\"message\":\"分割中\"}\n".as_bytes();
        // "分" starts at the byte after `"message":"`; cut inside it.
        let cut = bytes.iter().position(|&b| b >= 0x80).unwrap() + 1;

        let mut decoder = EventStreamDecoder::new();
        let mut records = decoder.push(&bytes[..cut]);
        assert!(records.is_empty());
        records.extend(decoder.push(&bytes[cut..]));

        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], StreamRecord::Progress(p) if p.message == "分割中"));
    }

    #[test]
    fn end_of_input_without_terminal_yields_one_truncated_record() {
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(b"data: {\"stage\":\"processing\",\"progress\":10}\n");
        assert_eq!(records.len(), 1);

        assert_eq!(decoder.finish(), Some(StreamRecord::Truncated));
        assert_eq!(decoder.finish(), None);
        assert!(decoder.push(b"data: {\"stage\":\"processing\"}\n").is_empty());
    }

    #[test]
    fn malformed_record_is_skipped_and_the_terminal_still_emitted() {
        let bytes = format!(
            "data: {{bad json\ndata: {{\"stage\":\"complete\",\"result\":{COMPLETE_RESULT}}}\n"
        );
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(bytes.as_bytes());

        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], StreamRecord::Complete(_)));
    }

    #[test]
    fn input_after_a_terminal_record_is_discarded() {
        let bytes = format!(
            "data: {{\"stage\":\"complete\",\"result\":{COMPLETE_RESULT}}}\n\
             data: {{\"stage\":\"processing\",\"progress\":99}}\n"
        );
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(bytes.as_bytes());
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], StreamRecord::Complete(_)));

        assert!(decoder.push(b"data: {\"stage\":\"processing\"}\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn error_record_carries_the_server_message() {
        let mut decoder = EventStreamDecoder::new();
        let records =
            decoder.push(b"data: {\"stage\":\"error\",\"message\":\"model failed\"}\n");
        assert_eq!(records, vec![StreamRecord::Failed("model failed".into())]);
    }

    #[test]
    fn complete_without_result_payload_is_only_progress() {
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(b"data: {\"stage\":\"complete\",\"progress\":100}\n");
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], StreamRecord::Progress(p) if p.stage == Stage::Complete));
        // The decoder is still live and accepts the real terminal.
        assert_eq!(decoder.finish(), Some(StreamRecord::Truncated));
    }

    #[test]
    fn non_data_lines_and_crlf_are_tolerated() {
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(
            b": keepalive\r\nevent: progress\r\ndata: {\"stage\":\"uploading\",\"progress\":5}\r\n",
        );
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], StreamRecord::Progress(p) if p.stage == Stage::Uploading));
    }

    #[test]
    fn unrecognized_stage_is_surfaced_as_processing() {
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(b"data: {\"stage\":\"warming_up\",\"message\":\"...\"}\n");
        assert!(matches!(&records[0], StreamRecord::Progress(p) if p.stage == Stage::Processing));
    }
}
