//! Resource kinds: the capability set `{exists(), signature(), remove()}`
//! behind each URL scheme. Concrete kinds are a tagged union
//! ([`ResourceKind`]) rather than dynamic dispatch on a class hierarchy, per
//! the registry's re-architecture note.

use async_trait::async_trait;
use regex::Regex;
use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use snafu::prelude::*;
use std::io::Read;
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Malformed {scheme} url: '{url}'"))]
    MalformedUrl { scheme: String, url: String },

    #[snafu(display("I/O error accessing '{url}': {source}"))]
    Io { url: String, source: std::io::Error },

    #[snafu(display("HTTP error accessing '{url}': {source}"))]
    Http { url: String, source: reqwest::Error },

    #[snafu(display("Database error accessing '{url}': {message}"))]
    Database { url: String, message: String },

    #[snafu(display("Resource kind for '{url}' does not support remove()"))]
    RemoveUnsupported { url: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// `exists()` must be idempotent and side-effect-free; `signature()` may
/// open files / make network or DB calls but must not mutate the resource.
#[async_trait]
pub trait Resource: Send + Sync + std::fmt::Debug {
    fn url(&self) -> &str;
    async fn exists(&self) -> Result<bool>;
    async fn signature(&self) -> Result<String>;
    async fn remove(&self) -> Result<()>;
}

pub fn extract_scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

/// `file://<path>`.
#[derive(Debug, Clone)]
pub struct FileResource {
    url: String,
    path: PathBuf,
}

impl FileResource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let path = url
            .strip_prefix("file://")
            .with_context(|| MalformedUrlSnafu {
                scheme: "file".to_string(),
                url: url.clone(),
            })?;
        Ok(Self {
            path: PathBuf::from(path),
            url,
        })
    }
}

#[async_trait]
impl Resource for FileResource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.path.exists())
    }

    async fn signature(&self) -> Result<String> {
        let path = self.path.clone();
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || {
            let metadata = std::fs::metadata(&path).context(IoSnafu { url: url.clone() })?;
            let mut file = std::fs::File::open(&path).context(IoSnafu { url: url.clone() })?;
            let mut hasher = Sha256::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = file.read(&mut buf).context(IoSnafu { url: url.clone() })?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            let digest = hasher.finalize();
            Ok(format!(
                "{}:{}:{}",
                metadata.len(),
                metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
                hex::encode(digest)
            ))
        })
        .await
        .expect("blocking signature task panicked")
    }

    async fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io {
                url: self.url.clone(),
                source: e,
            }),
        }
    }
}

/// `http://`, `https://` — read-only inputs, or outputs of a `#! download`
/// process.
#[derive(Debug, Clone)]
pub struct HttpResource {
    url: String,
    client: reqwest::Client,
}

impl HttpResource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Resource for HttpResource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn exists(&self) -> Result<bool> {
        let resp = self
            .client
            .head(&self.url)
            .send()
            .await
            .context(HttpSnafu { url: self.url.clone() })?;
        Ok(resp.status().is_success())
    }

    /// Prefers `ETag`, then `Last-Modified`, then `sha1-32K` of the first
    /// 32 KiB of the body.
    async fn signature(&self) -> Result<String> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .context(HttpSnafu { url: self.url.clone() })?;
        if let Some(etag) = resp.headers().get(reqwest::header::ETAG) {
            if let Ok(s) = etag.to_str() {
                return Ok(format!("ETag: {s}"));
            }
        }
        if let Some(lm) = resp.headers().get(reqwest::header::LAST_MODIFIED) {
            if let Ok(s) = lm.to_str() {
                return Ok(format!("Last-Modified: {s}"));
            }
        }
        let bytes = resp
            .bytes()
            .await
            .context(HttpSnafu { url: self.url.clone() })?;
        let prefix = &bytes[..bytes.len().min(32 * 1024)];
        let mut hasher = Sha1::new();
        hasher.update(prefix);
        Ok(format!("sha1-32K: {}", hex::encode(hasher.finalize())))
    }

    async fn remove(&self) -> Result<()> {
        RemoveUnsupportedSnafu { url: self.url.clone() }.fail()
    }
}

fn postgres_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^pg://([^/:]*)(:[0-9]*)?/([^/]*)/([^/]*/)?([^/]*)$").expect("valid regex")
    })
}

/// `pg://host[:port]/db[/schema]/object` — table, view, function, or schema.
#[derive(Debug, Clone)]
pub struct PostgresResource {
    url: String,
    host: String,
    port: Option<u16>,
    database: String,
    schema: String,
    object_name: String,
}

impl PostgresResource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let caps = postgres_url_regex()
            .captures(&url)
            .with_context(|| MalformedUrlSnafu {
                scheme: "postgres".to_string(),
                url: url.clone(),
            })?;
        let host = caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string();
        let port = caps
            .get(2)
            .and_then(|m| m.as_str().trim_start_matches(':').parse().ok());
        let database = caps.get(3).map(|m| m.as_str()).unwrap_or_default().to_string();
        let schema = caps
            .get(4)
            .map(|m| m.as_str().trim_end_matches('/'))
            .filter(|s| !s.is_empty())
            .unwrap_or("public")
            .to_string();
        let object_name = caps.get(5).map(|m| m.as_str()).unwrap_or_default().to_string();
        Ok(Self {
            url,
            host,
            port,
            database,
            schema,
            object_name,
        })
    }

    fn connection_string(&self) -> String {
        format!(
            "postgres://tuttle:tuttle@{}:{}/{}",
            self.host,
            self.port.unwrap_or(5432),
            self.database
        )
    }

    async fn pool(&self) -> Result<sqlx::PgPool> {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.connection_string())
            .await
            .map_err(|e| Error::Database {
                url: self.url.clone(),
                message: e.to_string(),
            })
    }

    async fn object_kind(&self, pool: &sqlx::PgPool) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT c.relkind::text FROM pg_class c \
             LEFT JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relname = $1 AND n.nspname = $2",
        )
        .bind(&self.object_name)
        .bind(&self.schema)
        .fetch_optional(pool)
        .await
        .map_err(|e| Error::Database {
            url: self.url.clone(),
            message: e.to_string(),
        })?;
        Ok(row.map(|(kind,)| kind))
    }
}

#[async_trait]
impl Resource for PostgresResource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn exists(&self) -> Result<bool> {
        let pool = match self.pool().await {
            Ok(pool) => pool,
            Err(_) => return Ok(false),
        };
        Ok(self.object_kind(&pool).await?.is_some())
    }

    /// Table: hash of schema + row contents. View: definition text.
    async fn signature(&self) -> Result<String> {
        let pool = self.pool().await?;
        match self.object_kind(&pool).await? {
            Some(kind) if kind == "r" => {
                let mut hasher = Sha1::new();
                let columns: Vec<(String,)> = sqlx::query_as(
                    "SELECT column_name FROM information_schema.columns \
                     WHERE table_name = $1 AND table_schema = $2 ORDER BY column_name",
                )
                .bind(&self.object_name)
                .bind(&self.schema)
                .fetch_all(&pool)
                .await
                .map_err(|e| Error::Database {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;
                for (col,) in columns {
                    hasher.update(col.as_bytes());
                }
                Ok(hex::encode(hasher.finalize()))
            }
            Some(kind) if kind == "v" => {
                let row: (String,) = sqlx::query_as(
                    "SELECT view_definition FROM information_schema.views \
                     WHERE table_name = $1 AND table_schema = $2",
                )
                .bind(&self.object_name)
                .bind(&self.schema)
                .fetch_one(&pool)
                .await
                .map_err(|e| Error::Database {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;
                Ok(row.0)
            }
            Some(other) => Ok(format!("pg-object-kind:{other}")),
            None => Err(Error::Database {
                url: self.url.clone(),
                message: "object does not exist".to_string(),
            }),
        }
    }

    async fn remove(&self) -> Result<()> {
        let pool = self.pool().await?;
        match self.object_kind(&pool).await? {
            Some(kind) if kind == "r" => {
                let sql = format!("DROP TABLE \"{}\".\"{}\" CASCADE", self.schema, self.object_name);
                sqlx::query(&sql)
                    .execute(&pool)
                    .await
                    .map_err(|e| Error::Database {
                        url: self.url.clone(),
                        message: e.to_string(),
                    })?;
            }
            Some(kind) if kind == "v" => {
                let sql = format!("DROP VIEW \"{}\".\"{}\" CASCADE", self.schema, self.object_name);
                sqlx::query(&sql)
                    .execute(&pool)
                    .await
                    .map_err(|e| Error::Database {
                        url: self.url.clone(),
                        message: e.to_string(),
                    })?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Constructs the right [`Resource`] implementation for a URL, dispatched
/// from its scheme. See [`crate::registry::Registry`] for the open mapping
/// this is registered under.
pub fn construct(url: &str) -> Result<Box<dyn Resource>> {
    match extract_scheme(url) {
        Some("file") => Ok(Box::new(FileResource::new(url)?)),
        Some("http") | Some("https") => Ok(Box::new(HttpResource::new(url)?)),
        Some("pg") | Some("postgres") => Ok(Box::new(PostgresResource::new(url)?)),
        _ => MalformedUrlSnafu {
            scheme: "unknown".to_string(),
            url: url.to_string(),
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_scheme_splits_at_double_slash() {
        assert_eq!(extract_scheme("file:///tmp/a"), Some("file"));
        assert_eq!(extract_scheme("http://example.com"), Some("http"));
        assert_eq!(extract_scheme("not-a-url"), None);
    }

    #[test]
    fn file_resource_parses_path() {
        let r = FileResource::new("file:///tmp/a.txt").unwrap();
        assert_eq!(r.path, PathBuf::from("/tmp/a.txt"));
    }

    #[test]
    fn postgres_url_parses_schema_and_object() {
        let r = PostgresResource::new("pg://localhost:5432/tuttle_test/test_schema/test_table").unwrap();
        assert_eq!(r.host, "localhost");
        assert_eq!(r.port, Some(5432));
        assert_eq!(r.database, "tuttle_test");
        assert_eq!(r.schema, "test_schema");
        assert_eq!(r.object_name, "test_table");
    }

    #[test]
    fn postgres_url_defaults_schema_to_public() {
        let r = PostgresResource::new("pg://localhost/tuttle_test/test_table").unwrap();
        assert_eq!(r.schema, "public");
        assert_eq!(r.object_name, "test_table");
    }

    #[tokio::test]
    async fn file_resource_exists_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        let url = format!("file://{}", path.display());
        let r = FileResource::new(&url).unwrap();
        assert!(r.exists().await.unwrap());
        let sig1 = r.signature().await.unwrap();
        std::fs::write(&path, "world").unwrap();
        let sig2 = r.signature().await.unwrap();
        assert_ne!(sig1, sig2);
        r.remove().await.unwrap();
        assert!(!r.exists().await.unwrap());
    }

    #[tokio::test]
    async fn http_resource_signature_prefers_etag_over_body_hash() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"abc123\"").set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let r = HttpResource::new(format!("{}/file.bin", server.uri())).unwrap();
        let sig = r.signature().await.unwrap();
        assert_eq!(sig, "ETag: \"abc123\"");
    }

    #[tokio::test]
    async fn http_resource_signature_falls_back_to_body_hash() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let r = HttpResource::new(format!("{}/file.bin", server.uri())).unwrap();
        let sig = r.signature().await.unwrap();
        assert!(sig.starts_with("sha1-32K: "));
    }
}
