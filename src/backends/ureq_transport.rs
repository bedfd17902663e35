//! Production `HttpTransport` backed by `ureq`.

use std::time::Duration;

use crate::backends::{HttpResponse, HttpTransport};
use crate::error::MediaError;

pub struct UreqTransport {
    http_client: ureq::Agent,
    user_agent: String,
}

impl UreqTransport {
    /// Read timeouts bound every in-flight call, so a stalled upstream
    /// surfaces as a transport error instead of blocking its worker forever.
    pub fn new(connect_timeout: Duration, read_timeout: Duration, user_agent: &str) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .timeout_write(read_timeout)
            .build();
        Self {
            http_client,
            user_agent: user_agent.to_string(),
        }
    }

    fn into_http_response(response: ureq::Response) -> HttpResponse {
        let status = response.status();
        let content_type = response.header("Content-Type").map(ToOwned::to_owned);
        let content_length = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());
        HttpResponse {
            status,
            content_type,
            content_length,
            body: Box::new(response.into_reader()),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, MediaError> {
        match self
            .http_client
            .get(url)
            .set("User-Agent", &self.user_agent)
            .call()
        {
            Ok(response) => Ok(Self::into_http_response(response)),
            Err(ureq::Error::Status(_, response)) => Ok(Self::into_http_response(response)),
            Err(ureq::Error::Transport(transport)) => {
                Err(MediaError::Transport(format!("Request failed: {transport}")))
            }
        }
    }
}
