use crate::job_contracts::OperationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub request_id: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub request_id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub error: Option<OperationError>,
}

impl OperationResponse {
    pub fn failure(request_id: Option<String>, error: OperationError) -> Self {
        Self {
            request_id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// Results of one decode pass, one entry per non-empty line in input order.
#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub entries: Vec<Result<T, FrameError>>,
}

impl<T> DecodeReport<T> {
    pub fn frames(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().filter_map(|entry| entry.as_ref().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let raw = trim_line_ending(bytes);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

fn trim_line_ending(bytes: &[u8]) -> &[u8] {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    raw
}

/// Splits a byte stream into newline-delimited JSON frames. Malformed or
/// oversized lines are reported and skipped; decoding resumes at the next line.
pub struct NdjsonFrameDecoder<T> {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    marker: PhantomData<T>,
}

impl<T> NdjsonFrameDecoder<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            marker: PhantomData,
        }
    }
}

impl<T> Default for NdjsonFrameDecoder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> NdjsonFrameDecoder<T> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        self.pending.extend_from_slice(chunk);

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            let frame = trim_line_ending(&line);
            if frame.is_empty() {
                continue;
            }
            self.decode_line(frame, &mut report);
        }

        if self.pending.len() > self.max_frame_bytes {
            report.entries.push(Err(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            }));
            self.pending.clear();
        }

        report
    }

    pub fn finish(&mut self) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        let remainder = std::mem::take(&mut self.pending);
        let frame = trim_line_ending(&remainder);
        if !frame.is_empty() {
            self.decode_line(frame, &mut report);
        }
        report
    }

    fn decode_line(&self, frame: &[u8], report: &mut DecodeReport<T>) {
        if frame.len() > self.max_frame_bytes {
            report.entries.push(Err(FrameError::OversizedFrame {
                size: frame.len(),
                max: self.max_frame_bytes,
            }));
            return;
        }
        let entry =
            serde_json::from_slice(frame).map_err(|err| FrameError::Decode(err.to_string()));
        report.entries.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_contracts::{ErrorCode, METHOD_GET, METHOD_LIST};

    fn get_request(id: &str) -> OperationRequest {
        OperationRequest {
            request_id: Some("req-1".to_string()),
            method: METHOD_GET.to_string(),
            params: serde_json::json!({ "id": id }),
        }
    }

    #[test]
    fn request_without_params_defaults_to_null() {
        let request: OperationRequest =
            serde_json::from_str(r#"{"method":"missionControl.list"}"#).expect("parse");
        assert_eq!(request.method, METHOD_LIST);
        assert!(request.params.is_null());
        assert_eq!(request.request_id, None);
    }

    #[test]
    fn failure_response_omits_payload() {
        let response = OperationResponse::failure(
            Some("req-9".to_string()),
            OperationError::not_found("Job not found"),
        );
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["code"], "NOT_FOUND");
        assert!(value.get("payload").is_none());

        let decoded: OperationResponse = serde_json::from_value(value).expect("decode");
        assert_eq!(
            decoded.error.map(|error| error.code),
            Some(ErrorCode::NotFound)
        );
    }

    #[test]
    fn decoder_recovers_after_malformed_json_line() {
        let valid_a = encode_frame(&get_request("a"), DEFAULT_MAX_FRAME_BYTES).expect("encode a");
        let valid_b = encode_frame(&get_request("b"), DEFAULT_MAX_FRAME_BYTES).expect("encode b");

        let mut chunk = Vec::new();
        chunk.extend_from_slice(&valid_a);
        chunk.extend_from_slice(b"{\"method\":\n");
        chunk.extend_from_slice(&valid_b);

        let mut decoder = NdjsonFrameDecoder::<OperationRequest>::default();
        let report = decoder.push_chunk(&chunk);
        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.frames().count(), 2);
        assert!(matches!(report.entries[1], Err(FrameError::Decode(_))));
        assert_eq!(
            report.entries[2].as_ref().expect("frame b").params["id"],
            "b"
        );
    }

    #[test]
    fn decoder_joins_frames_split_across_chunks() {
        let frame = encode_frame(&get_request("split"), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let (head, tail) = frame.split_at(frame.len() / 2);

        let mut decoder = NdjsonFrameDecoder::<OperationRequest>::default();
        assert!(decoder.push_chunk(head).is_empty());
        let report = decoder.push_chunk(tail);
        assert_eq!(report.frames().collect::<Vec<_>>(), vec![&get_request("split")]);
    }

    #[test]
    fn finish_decodes_unterminated_last_line() {
        let mut decoder = NdjsonFrameDecoder::<OperationRequest>::default();
        let report = decoder.push_chunk(br#"{"method":"missionControl.list"}"#);
        assert!(report.is_empty());

        let report = decoder.finish();
        assert_eq!(report.frames().count(), 1);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let request = OperationRequest {
            request_id: None,
            method: METHOD_GET.to_string(),
            params: serde_json::json!({ "id": "x".repeat(128) }),
        };
        let result = encode_frame(&request, 64);
        assert!(matches!(result, Err(FrameError::OversizedFrame { .. })));
    }

    #[test]
    fn decoder_rejects_oversized_line_and_continues() {
        let oversized = format!("{{\"method\":\"{}\"}}\n", "x".repeat(2_000));
        let valid = encode_frame(&get_request("ok"), DEFAULT_MAX_FRAME_BYTES).expect("encode");

        let mut chunk = oversized.into_bytes();
        chunk.extend_from_slice(&valid);

        let mut decoder = NdjsonFrameDecoder::<OperationRequest>::new(1_024);
        let report = decoder.push_chunk(&chunk);
        assert_eq!(report.entries.len(), 2);
        assert!(matches!(
            report.entries[0],
            Err(FrameError::OversizedFrame { .. })
        ));
        assert!(report.entries[1].is_ok());
    }
}
