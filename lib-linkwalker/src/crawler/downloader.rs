//! The HTTP side of a fetch, behind a capability trait. The implementation
//! never follows redirects on its own: a `Location` is surfaced to the
//! caller, so every hop goes through admission like any other URL.

use async_trait::async_trait;
use futures::StreamExt;
use hyper::body::HttpBody;
use hyper::{client::HttpConnector, Body, Client, Request};
use hyper_rustls::HttpsConnector;
use libflate::deflate::Decoder as DeflateDecoder;
use libflate::gzip::Decoder as GzipDecoder;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::{BasicAuth, CrawlConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchMode {
    /// Full body download; the only mode that can feed the extractor.
    Get,
    /// Reachability check for resources we will never parse.
    Head,
}

pub enum Downloaded {
    /// Successful GET.
    Body {
        code: u16,
        content_type: Option<String>,
        content: Vec<u8>,
    },
    /// Successful HEAD.
    Empty {
        code: u16,
        content_type: Option<String>,
        content_length: Option<u64>,
    },
    /// Final status >= 400.
    BadStatus { code: u16 },
    /// One redirect hop; `location` is the raw header value.
    Redirect { code: u16, location: String },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("invalid uri: {0}")]
    BadUri(String),
    #[error("no Location header on redirect")]
    NoLocation,
    #[error("unknown Content-Encoding: {0}")]
    UnknownEncoding(String),
}

#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    async fn download(&self, url: &Url, mode: FetchMode) -> Result<Downloaded, DownloadError>;
}

pub struct HyperDownloader {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    user_agent: String,
    max_body_size: usize,
    auth: Option<BasicAuth>,
    /// Basic credentials are only sent to these hosts.
    auth_hosts: BTreeSet<String>,
}

impl HyperDownloader {
    pub fn new(config: &CrawlConfig, auth_hosts: BTreeSet<String>) -> HyperDownloader {
        let https = build_connector(config.allow_insecure_content);

        let client = Client::builder()
            .pool_max_idle_per_host(1) // very stringent, but useful.
            .build(https);

        HyperDownloader {
            client,
            user_agent: config.user_agent().to_owned(),
            max_body_size: config.max_body_size,
            auth: config.auth.clone(),
            auth_hosts,
        }
    }

    fn authorization_for(&self, url: &Url) -> Option<String> {
        let auth = self.auth.as_ref()?;
        let host = url.host_str()?.to_ascii_lowercase();

        if !self.auth_hosts.contains(&host) {
            return None;
        }

        let credentials = format!("{}:{}", auth.username, auth.password);
        Some(format!("Basic {}", base64::encode(credentials)))
    }
}

fn build_connector(allow_insecure: bool) -> HttpsConnector<HttpConnector> {
    if allow_insecure {
        let tls = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();

        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build()
    } else {
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .build()
    }
}

/// Verifier behind `--allow-insecure-content`: every certificate passes.
struct AcceptAnyCertificate;

impl rustls::client::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

fn classify_hyper_error(err: hyper::Error) -> DownloadError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(current) = source {
        if current.downcast_ref::<rustls::Error>().is_some() {
            return DownloadError::Tls(current.to_string());
        }
        source = current.source();
    }
    DownloadError::Connect(err.to_string())
}

fn header_string(headers: &http::HeaderMap, name: http::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

#[async_trait]
impl Downloader for HyperDownloader {
    async fn download(&self, page_url: &Url, mode: FetchMode) -> Result<Downloaded, DownloadError> {
        let uri: hyper::Uri = page_url
            .as_str()
            .parse()
            .map_err(|err: http::uri::InvalidUri| DownloadError::BadUri(err.to_string()))?;

        let builder = match mode {
            FetchMode::Get => Request::get(uri),
            FetchMode::Head => Request::head(uri),
        };
        let mut builder = builder
            .header("User-Agent", &self.user_agent)
            .header("Accept-Encoding", "gzip, deflate");
        if let Some(authorization) = self.authorization_for(page_url) {
            builder = builder.header("Authorization", authorization);
        }
        let request = builder.body(Body::from("")).expect("unreachable");

        let response = self
            .client
            .request(request)
            .await
            .map_err(classify_hyper_error)?;

        let status_code = response.status();
        let headers = response.headers();

        if status_code.is_redirection() {
            let location =
                header_string(headers, http::header::LOCATION).ok_or(DownloadError::NoLocation)?;

            return Ok(Downloaded::Redirect {
                code: status_code.as_u16(),
                location,
            });
        }

        if !status_code.is_success() {
            return Ok(Downloaded::BadStatus {
                code: status_code.as_u16(),
            });
        }

        let content_type = header_string(headers, http::header::CONTENT_TYPE);

        if mode == FetchMode::Head {
            let content_length = headers
                .get(http::header::CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());

            return Ok(Downloaded::Empty {
                code: status_code.as_u16(),
                content_type,
                content_length,
            });
        }

        let encoding = header_string(headers, http::header::CONTENT_ENCODING)
            .unwrap_or_else(|| "identity".to_owned());

        // Download contents:
        let mut body = response.into_body();
        let mut stream = futures::stream::poll_fn(move |ctx| Pin::new(&mut body).poll_data(ctx));
        let mut content = vec![];

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify_hyper_error)?;

            if content.len() + chunk.len() > self.max_body_size {
                log::debug!("at {}: got very big body; truncating", page_url);
                content.extend(&chunk[..self.max_body_size - content.len()]);
                break;
            }

            content.extend(chunk);
        }

        // Decode contents if necessary:
        let io_err = |err: std::io::Error| DownloadError::Connect(err.to_string());
        content = match encoding.as_str() {
            "identity" => content,
            "gzip" => {
                let mut decoded = Vec::new();
                GzipDecoder::new(&content[..])
                    .map_err(io_err)?
                    .read_to_end(&mut decoded)
                    .map_err(io_err)?;
                decoded
            }
            "deflate" => {
                let mut decoded = Vec::new();
                DeflateDecoder::new(&content[..])
                    .read_to_end(&mut decoded)
                    .map_err(io_err)?;
                decoded
            }
            _ => return Err(DownloadError::UnknownEncoding(encoding)),
        };

        Ok(Downloaded::Body {
            code: status_code.as_u16(),
            content_type,
            content,
        })
    }
}
