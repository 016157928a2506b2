//! File-backed artifact store for raw resumes, converted text, prompts and reports.
//!
//! Each artifact lives in its own directory under the store root:
//! `<root>/<id>/<name>`. References are embeddable text of the form
//! `artifact://<id>` and are what record cells hold.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::fs;
use uuid::Uuid;

use crate::error::ArtifactError;

const SCHEME: &str = "artifact://";

/// Byte cap on the stem of a stored file name, leaving room for the
/// extension and the temp-file prefix under the usual 255-byte limit.
const MAX_STEM_BYTES: usize = 180;

static REFERENCE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"artifact://([0-9a-f]{32})").expect("reference pattern is valid")
});

static INVALID_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/\\?%*:|"<>]"#).expect("filename pattern is valid"));

/// Content type hint for a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mime {
    Html,
    Markdown,
    PlainText,
}

impl Mime {
    pub fn extension(&self) -> &'static str {
        match self {
            Mime::Html => "html",
            Mime::Markdown => "md",
            Mime::PlainText => "txt",
        }
    }
}

/// Opaque reference to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    fn new(id: String) -> Self {
        Self(id)
    }

    /// Find a recognizable reference id anywhere in `text`.
    ///
    /// Cells written by hand or by older runs may hold arbitrary text; only
    /// values carrying a well-formed id count as artifact references.
    pub fn parse(text: &str) -> Option<Self> {
        REFERENCE_ID
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| Self::new(m.as_str().to_string()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}", self.0)
    }
}

/// A resolved artifact.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub name: String,
    pub content: String,
}

/// Storage for named text artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `content` under `name`, returning a new reference.
    async fn create(&self, name: &str, content: &str, mime: Mime)
    -> Result<ArtifactRef, ArtifactError>;

    /// Resolve a reference to its name and content.
    async fn read(&self, reference: &ArtifactRef) -> Result<StoredArtifact, ArtifactError>;
}

/// Replace characters that are invalid in file names with `-`.
pub fn sanitize_filename(name: &str) -> String {
    INVALID_FILENAME_CHARS.replace_all(name, "-").into_owned()
}

/// Longest prefix of `text` no more than `max` bytes long, cut on a char boundary.
fn truncate_on_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Artifact store rooted at a local directory.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(name: &str, mime: Mime) -> String {
        let clean = sanitize_filename(name.trim());
        let suffix = format!(".{}", mime.extension());
        let stem = clean.strip_suffix(suffix.as_str()).unwrap_or(&clean);
        let stem = truncate_on_char_boundary(stem, MAX_STEM_BYTES).trim_end();
        if stem.is_empty() {
            format!("artifact{suffix}")
        } else {
            format!("{stem}{suffix}")
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn create(
        &self,
        name: &str,
        content: &str,
        mime: Mime,
    ) -> Result<ArtifactRef, ArtifactError> {
        let id = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(&id);
        fs::create_dir_all(&dir).await?;

        let file_name = Self::file_name(name, mime);
        let temp_path = dir.join(format!(".{file_name}.tmp"));
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, dir.join(&file_name)).await?;

        tracing::debug!(id = %id, name = %file_name, bytes = content.len(), "Artifact stored");
        Ok(ArtifactRef::new(id))
    }

    async fn read(&self, reference: &ArtifactRef) -> Result<StoredArtifact, ArtifactError> {
        let dir = self.root.join(reference.id());
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(ArtifactError::NotFound(reference.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(reference.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.file_type().await?.is_file() {
                continue;
            }
            let content = fs::read_to_string(entry.path()).await?;
            return Ok(StoredArtifact { name, content });
        }
        Err(ArtifactError::NotFound(reference.to_string()))
    }
}
