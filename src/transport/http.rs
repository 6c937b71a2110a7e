//! Reqwest-backed transport adapter.
//!
//! Streams response bodies to a scratch file, reporting progress through the
//! [`EventSink`]. Pause and cancel are cooperative: each running operation
//! watches a control channel and reacts between chunks. Resume data is a
//! serialized snapshot of the operation (URL, scratch path, byte offset,
//! validator) that a later `resume` replays with a `Range` request.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT_RANGES, ETAG, IF_RANGE, RANGE};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use async_trait::async_trait;

use super::{EventSink, TransferEvent, TransferEventKind, Transport, TransportError};

/// Connect timeout for transfer requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout between chunks; generous because payloads can be large.
const READ_TIMEOUT_SECS: u64 = 300;

/// Control signal sent to a running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpCommand {
    Run,
    Pause,
    Cancel,
}

/// Serialized restart state produced when an operation pauses.
///
/// Opaque to the engine; only this adapter reads it back.
#[derive(Debug, Serialize, Deserialize)]
struct HttpResumeData {
    url: String,
    scratch_path: PathBuf,
    bytes_written: u64,
    etag: Option<String>,
}

/// How a transfer operation ended.
#[derive(Debug)]
enum Outcome {
    Completed { temp_path: PathBuf },
    Paused { resume_data: Option<Vec<u8>> },
    Cancelled,
    Failed { error: TransportError },
}

/// HTTP [`Transport`] with cooperative pause/cancel and `Range` resume.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    scratch_dir: PathBuf,
    operations: Arc<DashMap<String, watch::Sender<OpCommand>>>,
}

impl HttpTransport {
    /// Creates a transport writing scratch payloads under `scratch_dir`.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            client,
            scratch_dir: scratch_dir.into(),
            operations: Arc::new(DashMap::new()),
        }
    }

    /// Returns the number of currently running operations.
    #[must_use]
    pub fn active_operations(&self) -> usize {
        self.operations.len()
    }

    fn scratch_path(&self, identifier: &str) -> PathBuf {
        let safe: String = identifier
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.scratch_dir.join(format!("{safe}.part"))
    }

    fn spawn_operation(
        &self,
        identifier: &str,
        url: String,
        scratch: PathBuf,
        start_offset: u64,
        etag: Option<String>,
        sink: EventSink,
    ) {
        let (control_tx, control_rx) = watch::channel(OpCommand::Run);
        self.operations.insert(identifier.to_string(), control_tx);

        let client = self.client.clone();
        let operations = Arc::clone(&self.operations);
        let identifier = identifier.to_string();

        tokio::spawn(async move {
            let outcome = run_transfer(
                &client,
                &identifier,
                &url,
                &scratch,
                start_offset,
                etag,
                control_rx,
                &sink,
            )
            .await;

            // Remove the control entry before delivering the terminal event,
            // so a resume issued from the callback can register a new one.
            operations.remove(&identifier);

            match outcome {
                Outcome::Completed { temp_path } => {
                    info!(identifier = %identifier, path = %temp_path.display(), "transfer complete");
                    sink.deliver(TransferEvent::new(
                        &identifier,
                        TransferEventKind::Completed { temp_path },
                    ))
                    .await;
                }
                Outcome::Paused { resume_data } => {
                    debug!(
                        identifier = %identifier,
                        resumable = resume_data.is_some(),
                        "transfer paused"
                    );
                    sink.deliver(TransferEvent::new(
                        &identifier,
                        TransferEventKind::Paused { resume_data },
                    ))
                    .await;
                }
                Outcome::Cancelled => {
                    debug!(identifier = %identifier, "transfer cancelled");
                }
                Outcome::Failed { error } => {
                    warn!(identifier = %identifier, error = %error, "transfer failed");
                    sink.deliver(TransferEvent::new(
                        &identifier,
                        TransferEventKind::Failed { error },
                    ))
                    .await;
                }
            }
        });
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(
        &self,
        identifier: &str,
        source: &Url,
        sink: EventSink,
    ) -> Result<(), TransportError> {
        let scratch = self.scratch_path(identifier);
        debug!(identifier = %identifier, url = %source, "dispatching fresh transfer");
        self.spawn_operation(identifier, source.to_string(), scratch, 0, None, sink);
        Ok(())
    }

    async fn resume(
        &self,
        identifier: &str,
        resume_data: &[u8],
        sink: EventSink,
    ) -> Result<(), TransportError> {
        let data: HttpResumeData = serde_json::from_slice(resume_data).map_err(|e| {
            TransportError::InvalidResumeData {
                reason: e.to_string(),
            }
        })?;

        // Clamp the restart offset to what actually survives on disk.
        let on_disk = tokio::fs::metadata(&data.scratch_path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        let offset = on_disk.min(data.bytes_written);

        debug!(
            identifier = %identifier,
            url = %data.url,
            offset,
            "dispatching resumed transfer"
        );
        self.spawn_operation(
            identifier,
            data.url,
            data.scratch_path,
            offset,
            data.etag,
            sink,
        );
        Ok(())
    }

    async fn pause(&self, identifier: &str) -> Result<(), TransportError> {
        let Some(entry) = self.operations.get(identifier) else {
            return Err(TransportError::NoOperation {
                identifier: identifier.to_string(),
            });
        };
        entry
            .send(OpCommand::Pause)
            .map_err(|_| TransportError::NoOperation {
                identifier: identifier.to_string(),
            })
    }

    async fn cancel(&self, identifier: &str) -> Result<(), TransportError> {
        let Some(entry) = self.operations.get(identifier) else {
            return Err(TransportError::NoOperation {
                identifier: identifier.to_string(),
            });
        };
        entry
            .send(OpCommand::Cancel)
            .map_err(|_| TransportError::NoOperation {
                identifier: identifier.to_string(),
            })
    }
}

/// Waits until the control channel carries a stop command.
///
/// A closed channel means the transport was dropped; treated as cancel.
async fn wait_for_stop(control: &mut watch::Receiver<OpCommand>) -> OpCommand {
    loop {
        if control.changed().await.is_err() {
            return OpCommand::Cancel;
        }
        let command = *control.borrow();
        if command != OpCommand::Run {
            return command;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_transfer(
    client: &Client,
    identifier: &str,
    url: &str,
    scratch: &Path,
    start_offset: u64,
    etag: Option<String>,
    mut control: watch::Receiver<OpCommand>,
    sink: &EventSink,
) -> Outcome {
    if let Some(parent) = scratch.parent() {
        if let Err(error) = tokio::fs::create_dir_all(parent).await {
            return Outcome::Failed {
                error: TransportError::Io {
                    path: parent.to_path_buf(),
                    source: error,
                },
            };
        }
    }

    let mut request = client.get(url);
    if start_offset > 0 {
        request = request.header(RANGE, format!("bytes={start_offset}-"));
        if let Some(validator) = etag.as_deref() {
            request = request.header(IF_RANGE, validator);
        }
    }

    // The request phase is abortable too: a pause arriving before the first
    // byte yields restart state for whatever was already on disk.
    let response = tokio::select! {
        result = request.send() => match result {
            Ok(response) => response,
            Err(error) => {
                return Outcome::Failed {
                    error: TransportError::Network { url: url.to_string(), source: error },
                };
            }
        },
        command = wait_for_stop(&mut control) => {
            return match command {
                OpCommand::Pause => pause_outcome(url, scratch, start_offset, etag, true).await,
                _ => {
                    let _ = tokio::fs::remove_file(scratch).await;
                    Outcome::Cancelled
                }
            };
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Outcome::Failed {
            error: TransportError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            },
        };
    }

    // A 206 continues the partial scratch file; a 200 on a resume attempt
    // means the server ignored the range, so restart from zero.
    let resumed = start_offset > 0 && status.as_u16() == 206;
    let supports_resume = resumed
        || response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("bytes"));
    let response_etag = response
        .headers()
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(std::string::ToString::to_string)
        .or(etag);

    let mut written = if resumed { start_offset } else { 0 };
    let expected = response
        .content_length()
        .map_or(0, |length| written + length);

    let mut file = match open_scratch(scratch, resumed, start_offset).await {
        Ok(file) => file,
        Err(error) => {
            return Outcome::Failed {
                error: TransportError::Io {
                    path: scratch.to_path_buf(),
                    source: error,
                },
            };
        }
    };

    if resumed {
        sink.deliver(TransferEvent::new(
            identifier,
            TransferEventKind::ResumedAtOffset {
                offset: start_offset,
                expected,
            },
        ))
        .await;
    }

    let mut stream = response.bytes_stream();
    loop {
        tokio::select! {
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    if let Err(error) = file.write_all(&bytes).await {
                        return Outcome::Failed {
                            error: TransportError::Io { path: scratch.to_path_buf(), source: error },
                        };
                    }
                    written += bytes.len() as u64;
                    sink.deliver(TransferEvent::new(
                        identifier,
                        TransferEventKind::BytesWritten { written, expected },
                    ))
                    .await;
                }
                Some(Err(error)) => {
                    return Outcome::Failed {
                        error: TransportError::Network { url: url.to_string(), source: error },
                    };
                }
                None => break,
            },
            command = wait_for_stop(&mut control) => {
                let _ = file.flush().await;
                drop(file);
                return match command {
                    OpCommand::Pause => {
                        pause_outcome(url, scratch, written, response_etag, supports_resume).await
                    }
                    _ => {
                        let _ = tokio::fs::remove_file(scratch).await;
                        Outcome::Cancelled
                    }
                };
            }
        }
    }

    if let Err(error) = file.flush().await {
        return Outcome::Failed {
            error: TransportError::Io {
                path: scratch.to_path_buf(),
                source: error,
            },
        };
    }

    Outcome::Completed {
        temp_path: scratch.to_path_buf(),
    }
}

/// Opens the scratch file for writing, truncated to the restart offset when
/// resuming and recreated otherwise.
async fn open_scratch(scratch: &Path, resumed: bool, offset: u64) -> std::io::Result<File> {
    if resumed {
        let mut file = OpenOptions::new().write(true).open(scratch).await?;
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(file)
    } else {
        File::create(scratch).await
    }
}

/// Builds the pause resolution: a restart blob when the server supports
/// ranged requests, otherwise no resume data (the manager treats that as a
/// cancellation).
async fn pause_outcome(
    url: &str,
    scratch: &Path,
    written: u64,
    etag: Option<String>,
    supports_resume: bool,
) -> Outcome {
    if !supports_resume {
        warn!(url = %url, "server does not support ranged requests; pause yields no resume data");
        let _ = tokio::fs::remove_file(scratch).await;
        return Outcome::Paused { resume_data: None };
    }

    let data = HttpResumeData {
        url: url.to_string(),
        scratch_path: scratch.to_path_buf(),
        bytes_written: written,
        etag,
    };
    match serde_json::to_vec(&data) {
        Ok(blob) => Outcome::Paused {
            resume_data: Some(blob),
        },
        Err(error) => {
            warn!(url = %url, error = %error, "failed to encode resume data");
            let _ = tokio::fs::remove_file(scratch).await;
            Outcome::Paused { resume_data: None }
        }
    }
}
