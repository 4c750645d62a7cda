use std::io::Cursor;
use std::time::Duration;

use attohttpc::StatusCode;
use image::{ImageFormat, RgbImage};
use log::debug;
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::{RecognitionError, RemoteError};

/// Ceiling on one inference round trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Ceiling on a status probe.
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a hosted inference endpoint speaking the HuggingFace
/// image-to-text protocol.
pub struct RemoteRecognizer {
    config: RemoteConfig,
}

impl RemoteRecognizer {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    /// Sends the image to the remote model and returns the recognized markup.
    ///
    /// One synchronous POST, no retries: a 503 (model still loading) is
    /// reported as [`RemoteError::Unavailable`] and the retry decision stays
    /// with the caller.
    pub fn infer(&self, image: &RgbImage) -> Result<String, RecognitionError> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png)?;

        let url = self.endpoint_url();
        debug!("posting {} byte image to {url}", buf.get_ref().len());

        let mut request = attohttpc::post(&url)
            .timeout(REQUEST_TIMEOUT)
            .bytes(buf.into_inner());
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, body).into());
        }

        let value: Value = response.json().map_err(classify_transport)?;
        Ok(extract_generated_text(value).trim().to_owned())
    }

    /// Asks the service whether the model is loaded, returning the raw status
    /// document.
    pub fn model_status(&self) -> Result<Value, RecognitionError> {
        let url = format!(
            "{}/status/{}",
            self.config.service_root.trim_end_matches('/'),
            self.config.model_name
        );

        let mut request = attohttpc::get(&url).timeout(STATUS_TIMEOUT);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, body).into());
        }

        response.json().map_err(classify_transport)
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/models/{}",
            self.config.service_root.trim_end_matches('/'),
            self.config.model_name
        )
    }
}

/// Pulls the markup string out of whichever shape the service answered with.
///
/// Hosted endpoints drift between an array of generations, a single object,
/// and a bare scalar; anything unrecognized is stringified rather than
/// rejected.
fn extract_generated_text(value: Value) -> String {
    match value {
        Value::Array(items) => items
            .first()
            .and_then(|item| item.get("generated_text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        Value::Object(map) => map
            .get("generated_text")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn classify_status(status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::SERVICE_UNAVAILABLE => RemoteError::Unavailable,
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        _ => RemoteError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

fn classify_transport(error: attohttpc::Error) -> RecognitionError {
    // attohttpc surfaces read timeouts as IO errors.
    let timed_out = matches!(
        error.kind(),
        attohttpc::ErrorKind::Io(io) if matches!(
            io.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        )
    );

    if timed_out {
        RemoteError::Timeout.into()
    } else {
        RemoteError::Transport(error).into()
    }
}
