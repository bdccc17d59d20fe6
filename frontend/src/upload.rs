//! End-to-end drive of one analysis job.
//!
//! Per job the flow is a small state machine:
//!
//! ```text
//! IDLE -> STREAMING -> {COMPLETE, FAILED, FAILED_STREAM}
//! FAILED_STREAM -> BUFFERED -> {COMPLETE, FAILED}
//! ```
//!
//! A transport-level failure before a terminal record (connection refused,
//! non-success status, truncation) moves to FAILED_STREAM and replays the
//! submission once over the buffered endpoint. A server-signaled error
//! record is already a terminal answer and is never retried. The two
//! phases run strictly sequentially; the buffered phase is an `FnOnce`, so
//! a second fallback attempt cannot even be expressed. `submit` returns
//! exactly once, which is what delivers the terminal outcome exactly once.

use std::future::Future;

use shared::{PredictResponse, ProgressUpdate, Stage};

use crate::api::{ApiClient, ChunkSource, UploadJob};
use crate::error::{TransportError, UploadError};
use crate::stream::{EventStreamDecoder, StreamRecord};

/// Outcome of the streaming phase, before any fallback decision.
pub(crate) enum StreamAttempt {
    Completed(PredictResponse),
    /// Explicit server-signaled failure; terminal, no fallback.
    Rejected(String),
    /// Transport failed before a terminal record; eligible for fallback.
    Interrupted(TransportError),
}

/// Submits one job and resolves with its single terminal outcome.
/// Progress updates are forwarded to `on_progress` while the job runs and
/// never after this function returns.
pub async fn submit<P>(
    client: &ApiClient,
    job: UploadJob,
    on_progress: P,
) -> Result<PredictResponse, UploadError>
where
    P: Fn(ProgressUpdate) + Clone + 'static,
{
    log::info!(
        "job {}: submitting \"{}\" ({} bytes)",
        job.id,
        job.file.name(),
        job.file.size()
    );

    let outcome = run_job(
        || streaming_phase(client, &job, on_progress.clone()),
        || buffered_phase(client, &job, on_progress.clone()),
    )
    .await;

    match &outcome {
        Ok(result) => log::info!(
            "job {}: completed with {} segments",
            job.id,
            result.segments.len()
        ),
        Err(err) => log::warn!("job {}: failed: {err}", job.id),
    }
    outcome
}

/// The state machine proper, independent of the concrete transports so the
/// fallback rules can be exercised with scripted phases.
pub(crate) async fn run_job<S, SF, B, BF>(
    streaming: S,
    buffered: B,
) -> Result<PredictResponse, UploadError>
where
    S: FnOnce() -> SF,
    SF: Future<Output = StreamAttempt>,
    B: FnOnce() -> BF,
    BF: Future<Output = Result<PredictResponse, TransportError>>,
{
    // IDLE -> STREAMING
    match streaming().await {
        StreamAttempt::Completed(result) => Ok(result),
        StreamAttempt::Rejected(message) => Err(UploadError::Analysis(message)),
        StreamAttempt::Interrupted(cause) => {
            // FAILED_STREAM -> BUFFERED, at most once
            log::warn!("streaming endpoint failed, falling back to regular endpoint: {cause}");
            buffered().await.map_err(UploadError::from)
        }
    }
}

async fn streaming_phase<P>(client: &ApiClient, job: &UploadJob, on_progress: P) -> StreamAttempt
where
    P: Fn(ProgressUpdate),
{
    let reader = match client.open_stream(job).await {
        Ok(reader) => reader,
        Err(err) => return StreamAttempt::Interrupted(err),
    };
    consume_stream(reader, &on_progress).await
}

/// Pulls chunks through the decoder until a terminal record or a transport
/// failure. The reader is dropped (and the connection released) on every
/// return path, including when the caller abandons the whole future.
pub(crate) async fn consume_stream<C, P>(mut chunks: C, on_progress: &P) -> StreamAttempt
where
    C: ChunkSource,
    P: Fn(ProgressUpdate),
{
    let mut decoder = EventStreamDecoder::new();
    loop {
        match chunks.next_chunk().await {
            Err(err) => return StreamAttempt::Interrupted(err),
            Ok(None) => {
                // End of input with no terminal record seen.
                decoder.finish();
                return StreamAttempt::Interrupted(TransportError::Truncated);
            }
            Ok(Some(chunk)) => {
                for record in decoder.push(&chunk) {
                    match record {
                        StreamRecord::Progress(update) => on_progress(update),
                        StreamRecord::Complete(result) => {
                            return StreamAttempt::Completed(result);
                        }
                        StreamRecord::Failed(message) => {
                            return StreamAttempt::Rejected(message);
                        }
                        StreamRecord::Truncated => {
                            return StreamAttempt::Interrupted(TransportError::Truncated);
                        }
                    }
                }
            }
        }
    }
}

/// The single fallback round trip. Progress here is synthesized from
/// upload byte counts with the `uploading` stage; same callback shape as
/// the native stream events.
async fn buffered_phase<P>(
    client: &ApiClient,
    job: &UploadJob,
    on_progress: P,
) -> Result<PredictResponse, TransportError>
where
    P: Fn(ProgressUpdate) + Clone + 'static,
{
    on_progress(ProgressUpdate {
        stage: Stage::Uploading,
        progress: Some(0),
        message: "Using fallback method...".to_string(),
    });

    let progress = on_progress.clone();
    client
        .send_buffered(job, move |sent, total| {
            let percent = if total == 0 {
                0
            } else {
                ((sent as f64 / total as f64) * 100.0).round() as u32
            };
            progress(ProgressUpdate {
                stage: Stage::Uploading,
                progress: Some(percent.min(100)),
                message: "Uploading...".to_string(),
            });
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::future::ready;
    use std::rc::Rc;

    use futures::executor::block_on;

    fn sample_result() -> PredictResponse {
        serde_json::from_str(
            r#"{"image_path":"uploads/img.png","segments":[],
                "counts":{"resnet":{},"mapped":{}},"candidate_labels":["cat","dog"]}"#,
        )
        .unwrap()
    }

    /// Scripted chunk source: a fixed sequence of reads, then end of input.
    struct Scripted {
        chunks: VecDeque<Result<Vec<u8>, TransportError>>,
    }

    impl Scripted {
        fn new(chunks: Vec<Result<Vec<u8>, TransportError>>) -> Self {
            Self {
                chunks: chunks.into(),
            }
        }
    }

    impl ChunkSource for Scripted {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            match self.chunks.pop_front() {
                None => Ok(None),
                Some(Ok(chunk)) => Ok(Some(chunk)),
                Some(Err(err)) => Err(err),
            }
        }
    }

    #[test]
    fn transport_failure_falls_back_to_exactly_one_buffered_call() {
        let calls = Rc::new(Cell::new(0u32));
        let calls_in_buffered = Rc::clone(&calls);

        let outcome = block_on(run_job(
            || ready(StreamAttempt::Interrupted(TransportError::Network("connection refused".into()))),
            move || {
                calls_in_buffered.set(calls_in_buffered.get() + 1);
                ready(Ok(sample_result()))
            },
        ));

        assert_eq!(calls.get(), 1);
        assert_eq!(outcome.unwrap().candidate_labels, vec!["cat", "dog"]);
    }

    #[test]
    fn server_reported_error_is_terminal_without_fallback() {
        let calls = Rc::new(Cell::new(0u32));
        let calls_in_buffered = Rc::clone(&calls);

        let outcome = block_on(run_job(
            || ready(StreamAttempt::Rejected("model failed".into())),
            move || {
                calls_in_buffered.set(calls_in_buffered.get() + 1);
                ready(Ok(sample_result()))
            },
        ));

        assert_eq!(calls.get(), 0);
        let err = outcome.unwrap_err();
        assert!(matches!(&err, UploadError::Analysis(msg) if msg == "model failed"));
        assert_eq!(err.to_string(), "model failed");
    }

    #[test]
    fn streaming_success_never_touches_the_buffered_path() {
        let calls = Rc::new(Cell::new(0u32));
        let calls_in_buffered = Rc::clone(&calls);

        let outcome = block_on(run_job(
            || ready(StreamAttempt::Completed(sample_result())),
            move || {
                calls_in_buffered.set(calls_in_buffered.get() + 1);
                ready(Ok(sample_result()))
            },
        ));

        assert_eq!(calls.get(), 0);
        assert!(outcome.is_ok());
    }

    #[test]
    fn buffered_failure_after_fallback_is_terminal() {
        let outcome = block_on(run_job(
            || ready(StreamAttempt::Interrupted(TransportError::Truncated)),
            || {
                ready(Err(TransportError::Status {
                    status: 500,
                    message: "internal error".into(),
                }))
            },
        ));

        let err = outcome.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Transport(TransportError::Status { status: 500, .. })
        ));
    }

    #[test]
    fn consume_stream_forwards_progress_then_resolves_once() {
        let source = Scripted::new(vec![
            Ok(b"data: {\"stage\":\"queued\",\"progress\":0,\"message\":\"Queued\"}\n".to_vec()),
            Ok(b"data: {\"stage\":\"processing\",\"progress\":60,\"message\":\"Classifying\"}\n"
                .to_vec()),
            Ok(format!(
                "data: {{\"stage\":\"complete\",\"result\":{}}}\n",
                r#"{"image_path":"uploads/img.png","segments":[],"counts":{"resnet":{},"mapped":{}},"candidate_labels":["cat","dog"]}"#
            )
            .into_bytes()),
        ]);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let attempt = block_on(consume_stream(source, &move |update: ProgressUpdate| {
            sink.borrow_mut().push(update);
        }));

        assert!(matches!(attempt, StreamAttempt::Completed(_)));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].stage, Stage::Queued);
        assert_eq!(seen[1].progress, Some(60));
    }

    #[test]
    fn mid_stream_transport_error_interrupts_the_attempt() {
        let source = Scripted::new(vec![
            Ok(b"data: {\"stage\":\"processing\",\"progress\":10}\n".to_vec()),
            Err(TransportError::Network("connection reset".into())),
        ]);

        let attempt = block_on(consume_stream(source, &|_update| {}));
        assert!(matches!(
            attempt,
            StreamAttempt::Interrupted(TransportError::Network(_))
        ));
    }

    #[test]
    fn stream_end_without_terminal_counts_as_truncation() {
        let source = Scripted::new(vec![Ok(
            b"data: {\"stage\":\"processing\",\"progress\":95}\n".to_vec()
        )]);

        let attempt = block_on(consume_stream(source, &|_update| {}));
        assert!(matches!(
            attempt,
            StreamAttempt::Interrupted(TransportError::Truncated)
        ));
    }

    #[test]
    fn server_error_record_surfaces_its_message() {
        let source = Scripted::new(vec![Ok(
            b"data: {\"stage\":\"error\",\"message\":\"model failed\"}\n".to_vec(),
        )]);

        let attempt = block_on(consume_stream(source, &|_update| {}));
        assert!(matches!(attempt, StreamAttempt::Rejected(msg) if msg == "model failed"));
    }
}
