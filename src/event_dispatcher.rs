use std::{collections::HashMap, thread, time::Duration};

use rand::Rng;
use reqwest::{blocking::Client, StatusCode};
use serde_json::{Map, Value};
use url::Url;

use crate::{EventDispatcherConfig, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerb {
    Get,
    Post,
}

/// A request to be delivered to the event endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub http_verb: HttpVerb,
    pub url: String,
    /// Sent as the query string for `GET` and as a JSON body for `POST`.
    pub params: Map<String, Value>,
    pub headers: HashMap<String, String>,
}

/// Delivers events. Failures are never reported to the caller.
pub trait EventDispatcher {
    fn dispatch_event(&self, event: &Event);
}

/// Dispatcher that silently drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpEventDispatcher;

impl EventDispatcher for NoOpEventDispatcher {
    fn dispatch_event(&self, _event: &Event) {}
}

/// Blocking HTTP dispatcher with bounded retries.
///
/// Requests are retried on 500, 502, 503 and 504 responses and on connection errors or
/// timeouts, with exponential backoff and jitter. Client errors are never retried.
#[derive(Debug, Clone)]
pub struct HttpEventDispatcher {
    client: Client,
    config: EventDispatcherConfig,
}

impl HttpEventDispatcher {
    pub fn new(config: EventDispatcherConfig) -> Self {
        HttpEventDispatcher {
            client: Client::new(),
            config,
        }
    }

    /// Send `event`, retrying transient failures, and report the final outcome.
    pub fn send(&self, event: &Event) -> Result<()> {
        let mut attempt = 0;
        loop {
            let result = self.send_once(event);
            match &result {
                Err(err) if attempt < self.config.max_retries && is_retryable(err) => {
                    let delay = self.retry_delay(attempt);
                    log::debug!(target: "decision",
                        url = event.url.as_str(),
                        attempt;
                        "retrying event dispatch in {delay:?}: {err}");
                    thread::sleep(delay);
                    attempt += 1;
                }
                _ => return result,
            }
        }
    }

    fn send_once(&self, event: &Event) -> Result<()> {
        let request = match event.http_verb {
            HttpVerb::Get => {
                let query = event.params.iter().map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.as_str(), value)
                });
                let url = Url::parse_with_params(&event.url, query).map_err(Error::InvalidUrl)?;
                self.client.get(url)
            }
            HttpVerb::Post => {
                let url = Url::parse(&event.url).map_err(Error::InvalidUrl)?;
                self.client.post(url).json(&event.params)
            }
        };

        let request = event
            .headers
            .iter()
            .fold(request, |request, (name, value)| request.header(name, value));

        let response = request.timeout(self.config.timeout).send()?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(Error::HttpStatus(status.as_u16()));
        }
        Ok(())
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let backoff = self
            .config
            .backoff
            .saturating_mul(2_u32.saturating_pow(attempt));
        let jitter_ms = backoff.as_millis() as u64 / 2;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

impl Default for HttpEventDispatcher {
    fn default() -> Self {
        Self::new(EventDispatcherConfig::default())
    }
}

impl EventDispatcher for HttpEventDispatcher {
    fn dispatch_event(&self, event: &Event) {
        if let Err(err) = self.send(event) {
            log::error!(target: "decision",
                url = event.url.as_str();
                "dispatch event failed: {err}");
        }
    }
}

fn is_retryable(err: &Error) -> bool {
    match err {
        Error::HttpStatus(code) => matches!(
            StatusCode::from_u16(*code),
            Ok(StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT)
        ),
        Error::Network(err) => err.is_connect() || err.is_timeout(),
        _ => false,
    }
}
