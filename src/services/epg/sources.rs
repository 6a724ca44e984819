//! EPG source resolution and the fetch/decompress pipeline

use async_compression::tokio::bufread::{GzipDecoder, ZlibDecoder};
use async_trait::async_trait;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use reqwest::Client;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const READ_BUFFER_BYTES: usize = 64 * 1024;
/// Bytes read when probing whether a URL is a document or a URL list
const PROBE_LIMIT: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("reading body failed: {0}")]
    Io(#[from] io::Error),
}

/// Raw response body plus the transport encoding it was sent with
pub struct FetchedBody {
    pub content_encoding: Option<String>,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

/// Transport seam for schedule documents
#[async_trait]
pub trait EpgFetcher: Send + Sync {
    async fn open(&self, url: &str) -> Result<FetchedBody, FetchError>;
}

/// Streams bodies over HTTP without buffering them
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        // Decompression happens in our own pipeline so `.gz` files and
        // transport encodings are handled the same way
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .gzip(false)
            .build()
            .context("Failed to create EPG HTTP client")?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl EpgFetcher for HttpFetcher {
    async fn open(&self, url: &str) -> Result<FetchedBody, FetchError> {
        let request = self
            .client
            .get(url)
            .header(ACCEPT_ENCODING, "gzip, deflate")
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout { url: url.to_string() })?
            .map_err(|source| FetchError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase());

        if let Some(len) = response.content_length() {
            tracing::debug!("EPG body size: {:.2} MB ({})", len as f64 / 1024.0 / 1024.0, url);
        }

        let bytes_stream = response
            .bytes_stream()
            .map(|result| result.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));

        Ok(FetchedBody {
            content_encoding,
            reader: Box::pin(StreamReader::new(bytes_stream)),
        })
    }
}

/// What `initialize`/`refresh` were asked to ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    /// Already-expanded document URLs
    List(Vec<String>),
    /// One URL, comma-separated URLs, or the URL of a URL list
    Raw(String),
}

impl From<&str> for SourceInput {
    fn from(value: &str) -> Self {
        SourceInput::Raw(value.to_string())
    }
}

impl From<String> for SourceInput {
    fn from(value: String) -> Self {
        SourceInput::Raw(value)
    }
}

impl From<Vec<String>> for SourceInput {
    fn from(value: Vec<String>) -> Self {
        SourceInput::List(value)
    }
}

impl fmt::Display for SourceInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceInput::List(urls) => write!(f, "{}", urls.join(", ")),
            SourceInput::Raw(raw) => write!(f, "{raw}"),
        }
    }
}

fn has_gzip_extension(raw: &str) -> bool {
    let path = url::Url::parse(raw)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| raw.split(['?', '#']).next().unwrap_or(raw).to_string());
    path.to_ascii_lowercase().ends_with(".gz")
}

/// Decide what a probed body means: a document stays a single source,
/// a body of `http…` lines becomes that list. When the probe was cut short
/// the trailing (possibly partial) line is ignored.
pub fn classify_listing(url: &str, body: &str, truncated: bool) -> Vec<String> {
    if body.contains("<?xml") || body.contains("<tv") {
        return vec![url.to_string()];
    }

    let mut lines: Vec<&str> = body.lines().collect();
    if truncated {
        lines.pop();
    }
    let urls: Vec<String> = lines
        .into_iter()
        .map(str::trim)
        .filter(|line| line.starts_with("http"))
        .map(String::from)
        .collect();

    if urls.is_empty() {
        vec![url.to_string()]
    } else {
        urls
    }
}

async fn probe(fetcher: &dyn EpgFetcher, url: &str) -> Result<(String, bool), FetchError> {
    let body = fetcher.open(url).await?;
    let reader = decoded_reader(body, url).await?;

    let mut head = Vec::with_capacity(4096);
    reader.take(PROBE_LIMIT as u64 + 1).read_to_end(&mut head).await?;
    let truncated = head.len() > PROBE_LIMIT;
    head.truncate(PROBE_LIMIT);

    Ok((String::from_utf8_lossy(&head).into_owned(), truncated))
}

/// Expand a source input into concrete document URLs, in order.
/// Probe failures fall back to treating the input as one literal source.
pub async fn resolve_sources(fetcher: &dyn EpgFetcher, input: &SourceInput) -> Vec<String> {
    let raw = match input {
        SourceInput::List(urls) => {
            return urls
                .iter()
                .map(|u| u.trim())
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
        }
        SourceInput::Raw(raw) => raw.trim(),
    };

    if raw.is_empty() {
        return Vec::new();
    }

    if raw.contains(',') {
        return raw
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect();
    }

    if has_gzip_extension(raw) {
        return vec![raw.to_string()];
    }

    match probe(fetcher, raw).await {
        Ok((body, truncated)) => {
            let urls = classify_listing(raw, &body, truncated);
            if urls.len() > 1 || urls.first().map(String::as_str) != Some(raw) {
                tracing::info!("EPG URL list at {} expanded to {} sources", raw, urls.len());
            }
            urls
        }
        Err(e) => {
            tracing::warn!("Could not probe EPG source {} ({}), using it as-is", raw, e);
            vec![raw.to_string()]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Deflate,
    Identity,
}

impl Compression {
    pub fn detect(content_encoding: Option<&str>, url: &str, head: &[u8]) -> Self {
        if head.starts_with(&GZIP_MAGIC) {
            return Compression::Gzip;
        }
        match content_encoding {
            Some("gzip") | Some("x-gzip") => Compression::Gzip,
            Some("deflate") => Compression::Deflate,
            _ if has_gzip_extension(url) => Compression::Gzip,
            _ => Compression::Identity,
        }
    }
}

pub type DocumentReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// Put a decompression stage in front of the body when the transport
/// header, the file extension or the leading bytes call for one.
pub async fn decoded_reader(body: FetchedBody, url: &str) -> Result<DocumentReader, FetchError> {
    let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, body.reader);
    let head = reader.fill_buf().await?;
    let compression = Compression::detect(body.content_encoding.as_deref(), url, head);

    tracing::debug!("EPG source {} compression: {:?}", url, compression);

    Ok(match compression {
        Compression::Gzip => {
            let mut decoder = GzipDecoder::new(reader);
            decoder.multiple_members(true);
            Box::pin(BufReader::with_capacity(READ_BUFFER_BYTES, decoder))
        }
        Compression::Deflate => Box::pin(BufReader::with_capacity(
            READ_BUFFER_BYTES,
            ZlibDecoder::new(reader),
        )),
        Compression::Identity => Box::pin(reader),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::Semaphore;

    /// In-memory documents keyed by URL; unknown URLs answer 404
    #[derive(Default)]
    pub struct MemoryFetcher {
        documents: HashMap<String, (Option<String>, Vec<u8>)>,
        requests: Mutex<Vec<String>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl MemoryFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.documents.insert(url.to_string(), (None, body.into()));
            self
        }

        pub fn with_encoding(mut self, url: &str, encoding: &str, body: Vec<u8>) -> Self {
            self.documents
                .insert(url.to_string(), (Some(encoding.to_string()), body));
            self
        }

        /// Hold every `open` until the semaphore hands out a permit
        pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        pub fn request_count(&self, url: &str) -> usize {
            self.requests.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl EpgFetcher for MemoryFetcher {
        async fn open(&self, url: &str) -> Result<FetchedBody, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            let (content_encoding, body) = self.documents.get(url).cloned().ok_or_else(|| {
                FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }
            })?;
            Ok(FetchedBody {
                content_encoding,
                reader: Box::pin(io::Cursor::new(body)),
            })
        }
    }

    pub async fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = async_compression::tokio::write::GzipEncoder::new(Vec::new());
        encoder.write_all(data).await.unwrap();
        encoder.shutdown().await.unwrap();
        encoder.into_inner()
    }

    pub async fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = async_compression::tokio::write::ZlibEncoder::new(Vec::new());
        encoder.write_all(data).await.unwrap();
        encoder.shutdown().await.unwrap();
        encoder.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{gzip, zlib, MemoryFetcher};
    use super::*;

    const DOC: &str = r#"<?xml version="1.0"?><tv></tv>"#;

    async fn read_all(body: FetchedBody, url: &str) -> String {
        let mut reader = decoded_reader(body, url).await.unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out
    }

    fn body(encoding: Option<&str>, bytes: Vec<u8>) -> FetchedBody {
        FetchedBody {
            content_encoding: encoding.map(String::from),
            reader: Box::pin(io::Cursor::new(bytes)),
        }
    }

    #[test]
    fn test_classify_listing() {
        assert_eq!(classify_listing("http://a/epg", DOC, false), vec!["http://a/epg"]);
        assert_eq!(
            classify_listing("http://a/list", "http://x/1.xml\r\n\nhttp://x/2.xml.gz\n", false),
            vec!["http://x/1.xml", "http://x/2.xml.gz"]
        );
        // Partial trailing line dropped when truncated
        assert_eq!(
            classify_listing("http://a/list", "http://x/1.xml\nhttp://x/2.x", true),
            vec!["http://x/1.xml"]
        );
        assert_eq!(classify_listing("http://a/odd", "garbage", false), vec!["http://a/odd"]);
    }

    #[test]
    fn test_gzip_extension_ignores_query() {
        assert!(has_gzip_extension("http://a/guide.xml.gz"));
        assert!(has_gzip_extension("http://a/guide.XML.GZ?token=1"));
        assert!(!has_gzip_extension("http://a/guide.xml?f=x.gz"));
    }

    #[tokio::test]
    async fn test_resolve_sources_shapes() {
        let fetcher = MemoryFetcher::new()
            .with("http://a/doc.xml", DOC)
            .with("http://a/list.txt", "http://x/1.xml\nhttp://x/2.xml\n");

        let list = SourceInput::List(vec![" http://x/1 ".into(), "".into()]);
        assert_eq!(resolve_sources(&fetcher, &list).await, vec!["http://x/1"]);

        let comma = SourceInput::from("http://x/1.xml, http://x/2.xml ,");
        assert_eq!(resolve_sources(&fetcher, &comma).await, vec!["http://x/1.xml", "http://x/2.xml"]);

        let gz = SourceInput::from("http://a/guide.xml.gz");
        assert_eq!(resolve_sources(&fetcher, &gz).await, vec!["http://a/guide.xml.gz"]);
        assert_eq!(fetcher.request_count("http://a/guide.xml.gz"), 0);

        let doc = SourceInput::from("http://a/doc.xml");
        assert_eq!(resolve_sources(&fetcher, &doc).await, vec!["http://a/doc.xml"]);

        let listing = SourceInput::from("http://a/list.txt");
        assert_eq!(resolve_sources(&fetcher, &listing).await, vec!["http://x/1.xml", "http://x/2.xml"]);

        let missing = SourceInput::from("http://a/missing");
        assert_eq!(resolve_sources(&fetcher, &missing).await, vec!["http://a/missing"]);
    }

    #[tokio::test]
    async fn test_decoded_reader_variants() {
        let plain = read_all(body(None, DOC.as_bytes().to_vec()), "http://a/doc.xml").await;
        assert_eq!(plain, DOC);

        // Magic bytes alone are enough
        let sniffed = read_all(body(None, gzip(DOC.as_bytes()).await), "http://a/doc").await;
        assert_eq!(sniffed, DOC);

        let deflated = read_all(body(Some("deflate"), zlib(DOC.as_bytes()).await), "http://a/doc").await;
        assert_eq!(deflated, DOC);

        let empty = read_all(body(Some("identity"), Vec::new()), "http://a/doc").await;
        assert!(empty.is_empty());
    }

    #[test]
    fn test_detect_prefers_magic() {
        assert_eq!(Compression::detect(None, "http://a/x.xml", &[0x1f, 0x8b, 8]), Compression::Gzip);
        assert_eq!(Compression::detect(Some("gzip"), "http://a/x.xml", b"<?xml"), Compression::Gzip);
        assert_eq!(Compression::detect(None, "http://a/x.xml.gz", b"<?xml"), Compression::Gzip);
        assert_eq!(Compression::detect(None, "http://a/x.xml", b"<?xml"), Compression::Identity);
    }
}
