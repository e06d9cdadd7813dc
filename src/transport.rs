// HTTP transport - the only place that talks to the network
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const ANALYZE_PATH: &str = "/api/analyze";
pub const CHECK_TRIES_PATH: &str = "/api/check_tries";
pub const DOWNLOAD_REPORT_PATH: &str = "/api/download_report";
pub const ABSHR_PATH: &str = "/api/abshr/security-forensics";
pub const SUBSCRIBE_PATH: &str = "/api/activate_subscription";

/// The request never produced an HTTP response
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Any HTTP response, success or not
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub status_text: String,
    pub content_disposition: Option<String>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        bytes: Vec<u8>,
    },
}

/// Transport-neutral multipart body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    pub parts: Vec<FormPart>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.parts.push(FormPart::Text {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, bytes: Vec<u8>) -> Self {
        self.parts.push(FormPart::File {
            name: name.to_string(),
            file_name: file_name.to_string(),
            bytes,
        });
        self
    }

    fn into_reqwest(self) -> Form {
        self.parts.into_iter().fold(Form::new(), |form, part| match part {
            FormPart::Text { name, value } => form.text(name, value),
            FormPart::File {
                name,
                file_name,
                bytes,
            } => form.part(name, Part::bytes(bytes).file_name(file_name)),
        })
    }
}

/// Network seam used by every workflow
pub trait Transport {
    async fn get(&self, path: &str) -> Result<HttpReply, TransportError>;

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<HttpReply, TransportError>;

    async fn post_form(&self, path: &str, form: FormData) -> Result<HttpReply, TransportError>;
}

/// Cookies of the server session. Quota and subscription live server-side
/// behind this cookie, so every request of a client shares one jar.
#[derive(Clone)]
pub struct SessionJar {
    jar: Arc<Jar>,
    origin: Url,
}

impl SessionJar {
    fn new(origin: Url) -> Self {
        Self {
            jar: Arc::new(Jar::default()),
            origin,
        }
    }

    /// Re-add cookies saved from an earlier run (`name=value; other=value`)
    pub fn restore(&self, header: &str) {
        for pair in header.split(';').map(str::trim).filter(|p| p.contains('=')) {
            self.jar.add_cookie_str(pair, &self.origin);
        }
    }

    /// Current cookies in `Cookie` header form; `None` before the server set any
    pub fn header(&self) -> Option<String> {
        self.jar
            .cookies(&self.origin)
            .and_then(|v| v.to_str().ok().map(String::from))
    }
}

/// reqwest-backed transport with a per-request timeout
pub struct HttpTransport {
    client: Client,
    base: Url,
    timeout: Duration,
    session: SessionJar,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid server URL {}: {}", base_url, e))?;
        let session = SessionJar::new(base.clone());
        let client = Client::builder()
            .timeout(timeout)
            .cookie_provider(session.jar.clone())
            .user_agent(concat!("sedq/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base,
            timeout,
            session,
        })
    }

    pub fn session(&self) -> SessionJar {
        self.session.clone()
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", path, e)))
    }

    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }

    async fn read(&self, response: reqwest::Response) -> Result<HttpReply, TransportError> {
        let status = response.status();
        let content_disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        debug!("HTTP {} ({} bytes)", status.as_u16(), body.len());

        Ok(HttpReply {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            content_disposition,
            body: body.to_vec(),
        })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> Result<HttpReply, TransportError> {
        let url = self.url(path)?;
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        self.read(response).await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<HttpReply, TransportError> {
        let url = self.url(path)?;
        debug!("POST {} (json)", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        self.read(response).await
    }

    async fn post_form(&self, path: &str, form: FormData) -> Result<HttpReply, TransportError> {
        let url = self.url(path)?;
        debug!("POST {} (multipart, {} parts)", url, form.parts.len());
        let response = self
            .client
            .post(url)
            .multipart(form.into_reqwest())
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        self.read(response).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub enum Step {
        Reply(HttpReply),
        Fail(TransportError),
    }

    impl Step {
        pub fn json(status: u16, body: &str) -> Self {
            Step::Reply(HttpReply {
                status,
                status_text: reason(status).to_string(),
                content_disposition: None,
                body: body.as_bytes().to_vec(),
            })
        }

        pub fn bytes(status: u16, body: &[u8], content_disposition: Option<&str>) -> Self {
            Step::Reply(HttpReply {
                status,
                status_text: reason(status).to_string(),
                content_disposition: content_disposition.map(String::from),
                body: body.to_vec(),
            })
        }

        pub fn refused() -> Self {
            Step::Fail(TransportError::Connect("Connection refused".to_string()))
        }
    }

    fn reason(status: u16) -> &'static str {
        match status {
            200 => "OK",
            400 => "Bad Request",
            402 => "Payment Required",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            _ => "",
        }
    }

    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub method: &'static str,
        pub path: String,
        pub json: Option<serde_json::Value>,
        pub form: Option<FormData>,
    }

    /// Replays canned replies in order and records what was sent
    pub struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        log: Mutex<Vec<Recorded>>,
    }

    impl ScriptedTransport {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                log: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<String> {
            self.recorded()
                .iter()
                .map(|r| format!("{} {}", r.method, r.path))
                .collect()
        }

        pub fn recorded(&self) -> Vec<Recorded> {
            self.log.lock().unwrap().clone()
        }

        fn next(&self, record: Recorded) -> Result<HttpReply, TransportError> {
            self.log.lock().unwrap().push(record);
            match self.steps.lock().unwrap().pop_front() {
                Some(Step::Reply(reply)) => Ok(reply),
                Some(Step::Fail(e)) => Err(e),
                None => panic!("unexpected request: no scripted reply left"),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, path: &str) -> Result<HttpReply, TransportError> {
            self.next(Recorded {
                method: "GET",
                path: path.to_string(),
                json: None,
                form: None,
            })
        }

        async fn post_json(
            &self,
            path: &str,
            body: &serde_json::Value,
        ) -> Result<HttpReply, TransportError> {
            self.next(Recorded {
                method: "POST",
                path: path.to_string(),
                json: Some(body.clone()),
                form: None,
            })
        }

        async fn post_form(
            &self,
            path: &str,
            form: FormData,
        ) -> Result<HttpReply, TransportError> {
            self.next(Recorded {
                method: "POST",
                path: path.to_string(),
                json: None,
                form: Some(form),
            })
        }
    }
}
