//! HTTP transport against the analysis backend.
//!
//! Two paths reach the same result: a streaming POST whose response body
//! is consumed incrementally, and a buffered POST with one JSON response.
//! Both transmit the file and options exactly once per invocation; the
//! base URL is explicit configuration, never read from ambient state.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use gloo_console::error;
use gloo_file::File as GlooFile;
use gloo_net::http::Request;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{FormData, ProgressEvent, ReadableStreamDefaultReader, XmlHttpRequest};

use crate::error::TransportError;
use shared::{JobId, PredictResponse, UploadOptions};

/// One user-initiated submission. Lives until its terminal outcome is
/// delivered, then discarded; never reused.
pub struct UploadJob {
    pub id: JobId,
    pub file: GlooFile,
    pub options: UploadOptions,
}

impl UploadJob {
    pub fn new(file: GlooFile, options: UploadOptions) -> Self {
        Self {
            id: JobId::new(),
            file,
            options,
        }
    }
}

/// Anything that yields the raw bytes of an event stream. The production
/// implementation wraps the browser's response body reader; tests script
/// chunk sequences directly.
pub trait ChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

pub struct ApiClient {
    base_url: String,
}

impl Default for ApiClient {
    /// Same-origin relative requests, for the dev proxy setup.
    fn default() -> Self {
        Self::new("")
    }
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base = base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base_url: base }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Opens the streaming endpoint and hands back a reader over the
    /// response body. Fails before any bytes are read if the connection
    /// cannot be opened or the server answers with a non-success status.
    pub async fn open_stream(&self, job: &UploadJob) -> Result<BodyReader, TransportError> {
        let form = build_form(job)?;
        let response = Request::post(&self.endpoint("/api/predict/full/stream"))
            .body(form)
            .map_err(|e| TransportError::Network(e.to_string()))?
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !response.ok() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(response.status(), &body));
        }

        let body = response
            .body()
            .ok_or_else(|| TransportError::Network("response has no body".into()))?;
        let reader = body
            .get_reader()
            .dyn_into::<ReadableStreamDefaultReader>()
            .map_err(|_| TransportError::Network("response body is not readable".into()))?;
        Ok(BodyReader { reader })
    }

    /// One buffered round trip. `on_sent(sent, total)` fires zero or more
    /// times from the browser's upload progress events before the single
    /// response arrives.
    pub async fn send_buffered(
        &self,
        job: &UploadJob,
        on_sent: impl Fn(u64, u64) + 'static,
    ) -> Result<PredictResponse, TransportError> {
        let form = build_form(job)?;
        let xhr = XmlHttpRequest::new().map_err(|e| TransportError::Network(js_message(&e)))?;
        xhr.open_with_async("POST", &self.endpoint("/api/predict/full"), true)
            .map_err(|e| TransportError::Network(js_message(&e)))?;
        let mut guard = XhrGuard {
            xhr: xhr.clone(),
            settled: false,
        };

        let (tx, rx) = oneshot::channel::<Result<(u16, String), String>>();
        let tx = Rc::new(RefCell::new(Some(tx)));

        let onload = {
            let tx = Rc::clone(&tx);
            let xhr = xhr.clone();
            Closure::<dyn FnMut()>::new(move || {
                let status = xhr.status().unwrap_or(0);
                let body = xhr.response_text().ok().flatten().unwrap_or_default();
                if let Some(tx) = tx.borrow_mut().take() {
                    let _ = tx.send(Ok((status, body)));
                }
            })
        };
        xhr.set_onload(Some(onload.as_ref().unchecked_ref()));

        let onerror = {
            let tx = Rc::clone(&tx);
            Closure::<dyn FnMut()>::new(move || {
                error!("upload request failed before a response arrived");
                if let Some(tx) = tx.borrow_mut().take() {
                    let _ = tx.send(Err("request failed".to_string()));
                }
            })
        };
        xhr.set_onerror(Some(onerror.as_ref().unchecked_ref()));

        let onprogress = Closure::<dyn FnMut(ProgressEvent)>::new(move |event: ProgressEvent| {
            if event.length_computable() {
                on_sent(event.loaded() as u64, event.total() as u64);
            }
        });
        if let Ok(upload) = xhr.upload() {
            upload.set_onprogress(Some(onprogress.as_ref().unchecked_ref()));
        }

        xhr.send_with_opt_form_data(Some(&form))
            .map_err(|e| TransportError::Network(js_message(&e)))?;

        let outcome = rx
            .await
            .map_err(|_| TransportError::Network("upload interrupted".into()))?;
        guard.settled = true;

        // The handler closures must stay alive until the request settles.
        drop(onload);
        drop(onerror);
        drop(onprogress);

        let (status, body) = outcome.map_err(TransportError::Network)?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, &body));
        }
        serde_json::from_str::<PredictResponse>(&body)
            .map_err(|e| TransportError::Body(e.to_string()))
    }
}

/// Aborts an in-flight request if the surrounding future is dropped
/// before the response settled, detaching the handlers first.
struct XhrGuard {
    xhr: XmlHttpRequest,
    settled: bool,
}

impl Drop for XhrGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.xhr.set_onload(None);
        self.xhr.set_onerror(None);
        if let Ok(upload) = self.xhr.upload() {
            upload.set_onprogress(None);
        }
        let _ = self.xhr.abort();
    }
}

/// Chunked access to a streaming response body. Dropping the reader
/// cancels the underlying browser stream, releasing the connection on
/// every exit path.
pub struct BodyReader {
    reader: ReadableStreamDefaultReader,
}

impl ChunkSource for BodyReader {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let step = JsFuture::from(self.reader.read())
            .await
            .map_err(|e| TransportError::Network(js_message(&e)))?;

        let done = js_sys::Reflect::get(&step, &JsValue::from_str("done"))
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if done {
            return Ok(None);
        }

        let value = js_sys::Reflect::get(&step, &JsValue::from_str("value"))
            .map_err(|e| TransportError::Network(js_message(&e)))?;
        Ok(Some(js_sys::Uint8Array::new(&value).to_vec()))
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        let _ = self.reader.cancel();
    }
}

fn build_form(job: &UploadJob) -> Result<FormData, TransportError> {
    let form = FormData::new().map_err(|e| TransportError::Network(js_message(&e)))?;
    form.append_with_blob("file", job.file.as_ref())
        .map_err(|e| TransportError::Network(js_message(&e)))?;
    for (name, value) in job.options.form_fields() {
        form.append_with_str(name, &value)
            .map_err(|e| TransportError::Network(js_message(&e)))?;
    }
    Ok(form)
}

fn status_error(status: u16, body: &str) -> TransportError {
    TransportError::Status {
        status,
        message: error_message_from_body(body),
    }
}

/// Reduces an error body to something readable: the JSON `detail` or
/// `message` field when present, the raw text otherwise.
fn error_message_from_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.trim().to_string()
}

fn js_message(value: &JsValue) -> String {
    value
        .as_string()
        .unwrap_or_else(|| format!("{value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slashes_are_normalized() {
        let client = ApiClient::new("http://localhost:8000/");
        assert_eq!(
            client.endpoint("/api/predict/full"),
            "http://localhost:8000/api/predict/full"
        );

        let relative = ApiClient::default();
        assert_eq!(relative.endpoint("/api/predict/full"), "/api/predict/full");
    }

    #[test]
    fn error_bodies_reduce_to_their_detail_field() {
        assert_eq!(
            error_message_from_body(r#"{"detail":"image too large"}"#),
            "image too large"
        );
        assert_eq!(
            error_message_from_body(r#"{"message":"bad request"}"#),
            "bad request"
        );
        assert_eq!(error_message_from_body("plain text\n"), "plain text");
    }

    #[test]
    fn status_error_display_includes_both_parts() {
        let err = status_error(422, r#"{"detail":"unsupported media type"}"#);
        assert_eq!(
            err.to_string(),
            "Server error: 422 - unsupported media type"
        );
    }
}
