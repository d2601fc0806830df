//! Registry transport.
//!
//! [`RegistryTransport`] is the content-addressable fetch/push seam the
//! image client depends on. [`RegistryClient`] implements it against the
//! Docker Registry v2 HTTP API with bearer-token authentication.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header;
use serde::Deserialize;

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::Digest;

use crate::manifest::{
    ImageManifest, MEDIA_TYPE_MANIFEST_LIST, MEDIA_TYPE_MANIFEST_V2, MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_OCI_MANIFEST, ManifestList, select_platform_manifest,
};
use crate::reference::ImageRef;

/// Docker Hub registry URL.
const DOCKER_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Content-addressable access to a remote image registry.
pub trait RegistryTransport {
    /// Fetches the manifest for the host platform.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown reference, or
    /// `BurrowError::Registry` on any other failure.
    fn manifest(&self, image: &ImageRef) -> Result<ImageManifest>;

    /// Streams a blob into `out` and returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` or `BurrowError::Registry`.
    fn fetch_blob(&self, image: &ImageRef, digest: &Digest, out: &mut dyn Write) -> Result<u64>;

    /// Lists the tags of a repository.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` or `BurrowError::Registry`.
    fn tags(&self, image: &ImageRef) -> Result<Vec<String>>;

    /// Whether the registry already holds a blob.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Registry` on failure.
    fn has_blob(&self, image: &ImageRef, digest: &Digest) -> Result<bool>;

    /// Uploads a blob.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Registry` on failure.
    fn push_blob(&self, image: &ImageRef, digest: &Digest, data: &Path) -> Result<()>;

    /// Uploads a manifest under the reference's tag.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Registry` on failure.
    fn push_manifest(&self, image: &ImageRef, manifest: &ImageManifest) -> Result<()>;
}

/// Registry account credentials.
#[derive(Clone)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Password or access token.
    pub password: String,
}

impl Credentials {
    /// Pairs a username with its password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Builds credentials when both parts are given.
    #[must_use]
    pub fn from_options(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(user), Some(pass)) => Some(Self::new(user, pass)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// `WWW-Authenticate` challenge of a 401 response.
#[derive(Debug, Default, PartialEq, Eq)]
struct AuthChallenge {
    scheme: String,
    realm: String,
    service: String,
    scope: String,
}

/// Blocking Docker Registry v2 client.
#[derive(Debug)]
pub struct RegistryClient {
    client: Client,
    registry_url: String,
    credentials: Option<Credentials>,
    tokens: Mutex<HashMap<String, String>>,
}

fn registry_error(message: impl Into<String>) -> BurrowError {
    BurrowError::Registry {
        message: message.into(),
    }
}

impl RegistryClient {
    /// Creates a client for `registry` (e.g. "docker.io", "ghcr.io").
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Registry` if the HTTP client cannot be built.
    pub fn new(registry: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("burrow/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| registry_error(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            registry_url: registry_to_url(registry),
            credentials: None,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Sets the account used for token requests and basic auth.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Base URL requests go to.
    #[must_use]
    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Sends a request built by `make`, answering a 401 challenge once.
    fn send(
        &self,
        repository: &str,
        actions: &str,
        make: &dyn Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let scope = format!("repository:{repository}:{actions}");
        let cached = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .cloned();
        if let Some(token) = cached {
            let response = dispatch(make().bearer_auth(&token))?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            let _ = self
                .tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&scope);
        }

        let response = dispatch(make())?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = parse_www_authenticate(
            response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default(),
        )?;
        if challenge.scheme.eq_ignore_ascii_case("basic") {
            let creds = self
                .credentials
                .as_ref()
                .ok_or_else(|| registry_error("registry requires credentials"))?;
            return dispatch(make().basic_auth(&creds.username, Some(&creds.password)));
        }

        let token_scope = if challenge.scope.is_empty() {
            scope.clone()
        } else {
            challenge.scope.clone()
        };
        let token = self.fetch_token(&challenge, &token_scope)?;
        let _ = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope, token.clone());
        dispatch(make().bearer_auth(&token))
    }

    fn fetch_token(&self, challenge: &AuthChallenge, scope: &str) -> Result<String> {
        tracing::debug!(realm = %challenge.realm, scope, "requesting registry token");
        let mut request = self
            .client
            .get(&challenge.realm)
            .query(&[("service", challenge.service.as_str()), ("scope", scope)]);
        if let Some(creds) = &self.credentials {
            request = request
                .query(&[("account", creds.username.as_str())])
                .basic_auth(&creds.username, Some(&creds.password));
        }
        let response = dispatch(request)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(registry_error(format!("token request failed: {status} - {body}")));
        }
        let token: TokenResponse = read_json(response, "token response")?;
        token
            .token
            .or(token.access_token)
            .ok_or_else(|| registry_error("token response carries no token"))
    }

    fn url(&self, image: &ImageRef, tail: &str) -> String {
        format!("{}/v2/{}/{tail}", self.registry_url, image.repository)
    }

    fn get_manifest_body(&self, image: &ImageRef, reference: &str) -> Result<(String, Vec<u8>)> {
        let url = self.url(image, &format!("manifests/{reference}"));
        tracing::debug!(url = %url, "fetching manifest");
        let accept = [
            MEDIA_TYPE_MANIFEST_V2,
            MEDIA_TYPE_MANIFEST_LIST,
            MEDIA_TYPE_OCI_MANIFEST,
            MEDIA_TYPE_OCI_INDEX,
        ]
        .join(", ");
        let response = self.send(&image.repository, "pull", &|| {
            self.client.get(&url).header(header::ACCEPT, &accept)
        })?;
        let response = check(response, || format!("image {image}"))?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .map_err(|e| registry_error(format!("failed to read manifest body: {e}")))?;
        Ok((content_type, body.to_vec()))
    }
}

impl RegistryTransport for RegistryClient {
    fn manifest(&self, image: &ImageRef) -> Result<ImageManifest> {
        let (content_type, body) = self.get_manifest_body(image, &image.tag)?;
        if content_type.contains("manifest.list") || content_type.contains("image.index") {
            let list: ManifestList = serde_json::from_slice(&body)?;
            let platform = select_platform_manifest(&list).ok_or_else(|| BurrowError::NotFound {
                kind: "platform manifest",
                id: format!("{image} linux/{}", crate::manifest::current_arch()),
            })?;
            let (_, body) = self.get_manifest_body(image, &platform.digest)?;
            return Ok(serde_json::from_slice(&body)?);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn fetch_blob(&self, image: &ImageRef, digest: &Digest, out: &mut dyn Write) -> Result<u64> {
        let url = self.url(image, &format!("blobs/{digest}"));
        tracing::debug!(url = %url, "fetching blob");
        let response = self.send(&image.repository, "pull", &|| self.client.get(&url))?;
        let mut response = check(response, || format!("blob {digest}"))?;
        response
            .copy_to(out)
            .map_err(|e| registry_error(format!("failed to read blob {digest}: {e}")))
    }

    fn tags(&self, image: &ImageRef) -> Result<Vec<String>> {
        let url = self.url(image, "tags/list");
        let response = self.send(&image.repository, "pull", &|| self.client.get(&url))?;
        let response = check(response, || format!("repository {}", image.repository))?;
        let list: TagList = read_json(response, "tag list")?;
        Ok(list.tags.unwrap_or_default())
    }

    fn has_blob(&self, image: &ImageRef, digest: &Digest) -> Result<bool> {
        let url = self.url(image, &format!("blobs/{digest}"));
        let response = self.send(&image.repository, "pull,push", &|| self.client.head(&url))?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(registry_error(format!("blob check failed: {s}"))),
        }
    }

    fn push_blob(&self, image: &ImageRef, digest: &Digest, data: &Path) -> Result<()> {
        let bytes = std::fs::read(data).map_err(|e| BurrowError::io(data, e))?;
        let start = self.url(image, "blobs/uploads/");
        let response = self.send(&image.repository, "pull,push", &|| self.client.post(&start))?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(registry_error(format!("upload start failed: {}", response.status())));
        }
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| registry_error("upload start returned no location"))?;
        let location = if location.starts_with('/') {
            format!("{}{location}", self.registry_url)
        } else {
            location.to_string()
        };
        let separator = if location.contains('?') { '&' } else { '?' };
        let upload = format!("{location}{separator}digest={digest}");

        tracing::info!(digest = %digest, size = bytes.len(), "uploading blob");
        let response = self.send(&image.repository, "pull,push", &|| {
            self.client
                .put(&upload)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone())
        })?;
        if response.status() != StatusCode::CREATED {
            return Err(registry_error(format!(
                "blob upload failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn push_manifest(&self, image: &ImageRef, manifest: &ImageManifest) -> Result<()> {
        let url = self.url(image, &format!("manifests/{}", image.tag));
        let body = serde_json::to_vec(manifest)?;
        let response = self.send(&image.repository, "pull,push", &|| {
            self.client
                .put(&url)
                .header(header::CONTENT_TYPE, &manifest.media_type)
                .body(body.clone())
        })?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(registry_error(format!("manifest upload failed: {status} - {text}")));
        }
        tracing::info!(image = %image, "manifest pushed");
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let body = response
        .bytes()
        .map_err(|e| registry_error(format!("failed to read {what}: {e}")))?;
    serde_json::from_slice(&body)
        .map_err(|e| registry_error(format!("failed to parse {what}: {e}")))
}

fn dispatch(request: RequestBuilder) -> Result<Response> {
    request
        .send()
        .map_err(|e| registry_error(format!("request failed: {e}")))
}

/// Maps 404 to `NotFound` and other failures to `Registry`.
fn check(response: Response, what: impl FnOnce() -> String) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(BurrowError::NotFound {
            kind: "registry resource",
            id: what(),
        });
    }
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(registry_error(format!("{}: {status} - {body}", what())));
    }
    Ok(response)
}

/// Converts registry hostname to base URL.
fn registry_to_url(registry: &str) -> String {
    match registry {
        "docker.io" | "index.docker.io" => DOCKER_REGISTRY_URL.to_string(),
        r if r.starts_with("http://") || r.starts_with("https://") => r.to_string(),
        r if r.starts_with("localhost") || r.starts_with("127.0.0.1") => format!("http://{r}"),
        r => format!("https://{r}"),
    }
}

/// Parses `Bearer realm="...",service="...",scope="..."` (or `Basic ...`).
fn parse_www_authenticate(value: &str) -> Result<AuthChallenge> {
    let (scheme, params) = value.trim().split_once(' ').unwrap_or((value.trim(), ""));
    let mut challenge = AuthChallenge {
        scheme: scheme.to_string(),
        ..AuthChallenge::default()
    };
    for part in params.split(',') {
        let Some((key, raw)) = part.trim().split_once('=') else {
            continue;
        };
        let value = raw.trim_matches('"').to_string();
        match key {
            "realm" => challenge.realm = value,
            "service" => challenge.service = value,
            "scope" => challenge.scope = value,
            _ => {}
        }
    }
    if challenge.scheme.eq_ignore_ascii_case("bearer") && challenge.realm.is_empty() {
        return Err(registry_error(format!("invalid WWW-Authenticate header: {value:?}")));
    }
    if challenge.scheme.is_empty() {
        return Err(registry_error("401 without WWW-Authenticate challenge"));
    }
    Ok(challenge)
}
