//! Key schemes for the two storage surfaces.
//!
//! Key-value surface (fast, small values):
//!   `code:<fid>`                rolling latest
//!   `code:<fid>:v:<semver>`     fixed versions
//!
//! Bytes-object surface (large or binary):
//!   `code/<fid>/latest`         rolling latest
//!   `code/<fid>/v/<version>`    fixed versions
//!   `…/latest.map`, `…/<version>.map`  source maps

use common::types::{
    FunctionId,
    FunctionVersion,
};

pub fn kv_code_key(fid: &FunctionId, version: &FunctionVersion) -> String {
    match version {
        FunctionVersion::Latest => format!("code:{fid}"),
        FunctionVersion::Pinned(v) => format!("code:{fid}:v:{v}"),
    }
}

pub fn kv_code_prefix(fid: &FunctionId) -> String {
    format!("code:{fid}")
}

/// Parse the version tag out of a key-value code key for `fid`, returning
/// `"latest"` for the rolling key. Keys for other functions return `None`.
pub fn parse_kv_code_key<'a>(fid: &FunctionId, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix("code:")?;
    if rest == fid.as_str() {
        return Some("latest");
    }
    let rest = rest.strip_prefix(fid.as_str())?;
    rest.strip_prefix(":v:")
}

pub fn object_code_key(fid: &FunctionId, version: &FunctionVersion) -> String {
    match version {
        FunctionVersion::Latest => format!("code/{fid}/latest"),
        FunctionVersion::Pinned(v) => format!("code/{fid}/v/{v}"),
    }
}

pub fn object_source_map_key(fid: &FunctionId, version: &FunctionVersion) -> String {
    format!("{}.map", object_code_key(fid, version))
}

pub fn object_code_prefix(fid: &FunctionId) -> String {
    format!("code/{fid}/")
}
