use std::{
    fmt,
    str::FromStr,
    sync::LazyLock,
};

use anyhow::Context;
use errors::ErrorMetadata;
use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
};
use url::Url;

static FUNCTION_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_./-]+$").unwrap());

/// An opaque, validated function identifier. May contain at most one `/`
/// denoting a namespace, eg `acme/report-generator`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let invalid = |msg: String| {
            anyhow::anyhow!(ErrorMetadata::bad_request(
                "InvalidFunctionId",
                format!("invalid function id {s:?}: {msg}"),
            ))
        };
        if s.is_empty() {
            return Err(invalid("must not be empty".to_string()));
        }
        if !FUNCTION_ID_REGEX.is_match(s) {
            return Err(invalid(
                "only alphanumerics, '_', '.', '/' and '-' are allowed".to_string(),
            ));
        }
        if s.contains("..") {
            return Err(invalid("path traversal is not allowed".to_string()));
        }
        if s.matches('/').count() > 1 {
            return Err(invalid("at most one namespace separator is allowed".to_string()));
        }
        if s.starts_with('/') || s.ends_with('/') {
            return Err(invalid("namespace separator must be interior".to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FunctionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for FunctionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FunctionId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A function version: either the rolling `latest` or a pinned semver.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FunctionVersion {
    Latest,
    Pinned(semver::Version),
}

impl FunctionVersion {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        if s == "latest" {
            return Ok(Self::Latest);
        }
        let version = semver::Version::parse(s)
            .with_context(|| format!("invalid version {s:?}"))
            .map_err(|e| {
                e.context(ErrorMetadata::bad_request(
                    "InvalidFunctionVersion",
                    format!("{s:?} is neither \"latest\" nor a semver version"),
                ))
            })?;
        Ok(Self::Pinned(version))
    }

    pub fn is_latest(&self) -> bool {
        matches!(self, Self::Latest)
    }
}

impl fmt::Display for FunctionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Pinned(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for FunctionVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FunctionVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FunctionVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FunctionVersion::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Source language of a code function. The tag decides which isolate family
/// runs the artifact.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    Typescript,
    Javascript,
    Rust,
    Go,
    Python,
    Csharp,
    Zig,
    Assemblyscript,
}

impl Language {
    /// Parse a language tag, mapping unknown tags onto the validation
    /// error execution surfaces as "unsupported language".
    pub fn parse_tag(tag: &str) -> anyhow::Result<Self> {
        tag.parse().map_err(|_| {
            anyhow::anyhow!(ErrorMetadata::bad_request(
                "UnsupportedLanguage",
                format!("unsupported language {tag:?}"),
            ))
        })
    }

    pub fn isolate_kind(&self) -> IsolateKind {
        match self {
            Language::Typescript | Language::Javascript => IsolateKind::V8,
            Language::Rust | Language::Go | Language::Zig | Language::Assemblyscript => {
                IsolateKind::Wasm
            },
            Language::Python | Language::Csharp => IsolateKind::WorkerLoader,
        }
    }

    /// Whether running this language involves a compilation or preparation
    /// step whose latency is worth reporting separately.
    pub fn is_compiled(&self) -> bool {
        !matches!(self, Language::Javascript | Language::Python)
    }
}

/// The family of sandbox a function executes in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum IsolateKind {
    #[serde(rename = "v8")]
    #[strum(serialize = "v8")]
    V8,
    #[serde(rename = "wasm")]
    #[strum(serialize = "wasm")]
    Wasm,
    #[serde(rename = "worker-loader")]
    #[strum(serialize = "worker-loader")]
    WorkerLoader,
}

/// Where a code function's source lives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CodeSource {
    /// Source text supplied inline with the definition.
    Inline { code: String },
    /// A key into the bytes-object store.
    ObjectKey { key: String },
    /// An HTTPS URL fetched at resolution time. The fetch passes the URL
    /// guard first.
    Https { url: Url },
    /// Another registered function's code, optionally pinned to a version.
    Registry {
        function_id: FunctionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<FunctionVersion>,
    },
}
