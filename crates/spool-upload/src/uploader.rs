//! Batch transport.
//!
//! [`HttpUploader`] sends one batch per request: the records joined with the
//! configured separator, wrapped in the configured prefix and suffix, POSTed
//! to the intake endpoint. Redirects are not followed. Transport failures are
//! classified, never raised.

use std::sync::Arc;
use std::time::Duration;

use spool_common::{InternalLogger, LogLevel, LogTarget, Result};
use spool_config::IntakeConfig;
use spool_store::Batch;

use crate::status::UploadStatus;

/// Sends a batch to the intake.
pub trait DataUploader: Send + Sync {
    fn upload(&self, batch: &Batch) -> UploadStatus;
}

/// Request body for `records`.
pub fn build_payload(records: &[Vec<u8>], prefix: &str, separator: &str, suffix: &str) -> Vec<u8> {
    let records_len: usize = records.iter().map(Vec::len).sum();
    let mut body = Vec::with_capacity(
        prefix.len() + suffix.len() + records_len + separator.len() * records.len(),
    );
    body.extend_from_slice(prefix.as_bytes());
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            body.extend_from_slice(separator.as_bytes());
        }
        body.extend_from_slice(record);
    }
    body.extend_from_slice(suffix.as_bytes());
    body
}

/// Uploader POSTing batches over HTTP.
pub struct HttpUploader {
    feature: String,
    endpoint: String,
    intake: IntakeConfig,
    agent: ureq::Agent,
    logger: Arc<dyn InternalLogger>,
}

impl HttpUploader {
    /// Fails when the intake has no endpoint.
    pub fn new(feature: &str, intake: IntakeConfig, logger: Arc<dyn InternalLogger>) -> Result<Self> {
        let endpoint = intake.endpoint.clone().unwrap_or_default();
        if endpoint.trim().is_empty() {
            return Err(spool_common::Error::Config(format!(
                "intake endpoint required to upload '{}'",
                feature
            )));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(intake.timeout_ms))
            .redirects(0)
            .build();
        Ok(Self {
            feature: feature.to_string(),
            endpoint,
            intake,
            agent,
            logger,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send(&self, body: &[u8]) -> UploadStatus {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", &self.intake.content_type)
            .send_bytes(body);
        match response {
            Ok(response) => UploadStatus::from_status_code(response.status()),
            Err(ureq::Error::Status(code, _)) => UploadStatus::from_status_code(code),
            Err(ureq::Error::Transport(transport)) => match transport.kind() {
                ureq::ErrorKind::Dns => UploadStatus::DnsError,
                ureq::ErrorKind::InvalidUrl
                | ureq::ErrorKind::UnknownScheme
                | ureq::ErrorKind::InsecureRequestHttpsOnly => {
                    self.logger.log(
                        LogLevel::Error,
                        LogTarget::User,
                        &format!("unable to build upload request: {}", transport),
                    );
                    UploadStatus::RequestCreationError
                }
                _ => UploadStatus::NetworkError,
            },
        }
    }

    fn log_outcome(&self, status: &UploadStatus, bytes: usize) {
        let (level, target) = match status {
            UploadStatus::Success { .. } => (LogLevel::Info, LogTarget::User),
            UploadStatus::InvalidToken { .. } => (LogLevel::Error, LogTarget::User),
            UploadStatus::HttpClientError { .. } | UploadStatus::RequestCreationError => {
                (LogLevel::Error, LogTarget::Maintainer)
            }
            _ => (LogLevel::Warn, LogTarget::Maintainer),
        };
        self.logger.log(
            level,
            target,
            &format!(
                "{}: batch of {} bytes to {}: {}",
                self.feature, bytes, self.endpoint, status
            ),
        );
    }
}

impl DataUploader for HttpUploader {
    fn upload(&self, batch: &Batch) -> UploadStatus {
        let body = build_payload(
            &batch.records,
            &self.intake.prefix,
            &self.intake.separator,
            &self.intake.suffix,
        );
        let status = self.send(&body);
        self.log_outcome(&status, body.len());
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_common::testing::RecordingLogger;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::thread;

    fn batch(records: &[&str]) -> Batch {
        Batch {
            file: PathBuf::from("1700000000000"),
            records: records.iter().map(|r| r.as_bytes().to_vec()).collect(),
            metadata: None,
        }
    }

    fn intake(endpoint: &str) -> IntakeConfig {
        IntakeConfig {
            endpoint: Some(endpoint.to_string()),
            timeout_ms: 5_000,
            ..IntakeConfig::default()
        }
    }

    /// Serve one request with `status_line`, returning the received body.
    fn serve_once(status_line: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/v1/input", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = reader.into_inner();
            write!(stream, "{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line)
                .unwrap();
            String::from_utf8(body).unwrap()
        });
        (url, handle)
    }

    #[test]
    fn payload_joins_records() {
        let records = vec![b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()];
        assert_eq!(
            build_payload(&records, "[", ",", "]"),
            b"[{\"a\":1},{\"b\":2}]".to_vec()
        );
        assert_eq!(build_payload(&[], "[", ",", "]"), b"[]".to_vec());
        assert_eq!(
            build_payload(&records, "", "\n", ""),
            b"{\"a\":1}\n{\"b\":2}".to_vec()
        );
    }

    #[test]
    fn missing_endpoint_is_a_config_error() {
        let err = HttpUploader::new("logs", IntakeConfig::default(), Arc::new(RecordingLogger::new()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn accepted_batch_is_success() {
        let (url, server) = serve_once("HTTP/1.1 202 Accepted");
        let logger = Arc::new(RecordingLogger::new());
        let uploader = HttpUploader::new("logs", intake(&url), logger.clone()).unwrap();

        let status = uploader.upload(&batch(&[r#"{"m":"a"}"#, r#"{"m":"b"}"#]));

        assert_eq!(status, UploadStatus::Success { code: 202 });
        assert_eq!(server.join().unwrap(), r#"[{"m":"a"},{"m":"b"}]"#);
        assert!(logger.contains(LogLevel::Info, "success (202)"));
    }

    #[test]
    fn error_statuses_are_classified() {
        let (url, server) = serve_once("HTTP/1.1 503 Service Unavailable");
        let uploader = HttpUploader::new("logs", intake(&url), Arc::new(RecordingLogger::new())).unwrap();
        assert_eq!(
            uploader.upload(&batch(&["x"])),
            UploadStatus::HttpServerError { code: 503 }
        );
        server.join().unwrap();

        let (url, server) = serve_once("HTTP/1.1 403 Forbidden");
        let uploader = HttpUploader::new("logs", intake(&url), Arc::new(RecordingLogger::new())).unwrap();
        assert_eq!(
            uploader.upload(&batch(&["x"])),
            UploadStatus::InvalidToken { code: 403 }
        );
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_a_network_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let uploader = HttpUploader::new(
            "logs",
            intake(&format!("http://127.0.0.1:{}/v1/input", port)),
            Arc::new(RecordingLogger::new()),
        )
        .unwrap();
        assert_eq!(uploader.upload(&batch(&["x"])), UploadStatus::NetworkError);
    }

    #[test]
    fn malformed_endpoint_is_a_request_creation_error() {
        let uploader = HttpUploader::new(
            "logs",
            intake("not a url"),
            Arc::new(RecordingLogger::new()),
        )
        .unwrap();
        assert_eq!(
            uploader.upload(&batch(&["x"])),
            UploadStatus::RequestCreationError
        );
    }
}
