//! Work descriptors granted by a scheduler
//!
//! Fields without a serde default are required: a reply carrying a
//! descriptor without them is rejected. Everything else falls back to an
//! empty or zero value, whether absent or `null`, and unknown fields are
//! ignored.

use serde::{Deserialize, Serialize};

use crate::de::null_as_default;

/// An application the project runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
}

/// Reference from a version or workunit to a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub file_name: String,

    /// Name the running job opens the file under; empty means `file_name`
    #[serde(default, deserialize_with = "null_as_default")]
    pub open_name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub main_program: bool,
}

/// A file the client must download or upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,

    /// Download or upload locations, in preference order
    #[serde(default, deserialize_with = "null_as_default")]
    pub urls: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub md5_cksum: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub nbytes: f64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub executable: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub upload_when_present: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub sticky: bool,

    /// Signature of an executable file, passed through untouched
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_signature: String,
}

/// A specific build of an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppVersion {
    pub app_name: String,
    pub version_num: u32,

    #[serde(default, deserialize_with = "null_as_default")]
    pub file_refs: Vec<FileRef>,
}

/// A unit of computational work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workunit {
    pub name: String,
    pub app_name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub version_num: u32,

    #[serde(default, deserialize_with = "null_as_default")]
    pub command_line: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub env_vars: String,

    /// Estimated floating point operations
    #[serde(default, deserialize_with = "null_as_default")]
    pub rsc_fpops_est: f64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub input_files: Vec<FileRef>,
}

/// A computation of a workunit assigned to this host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultInfo {
    pub name: String,
    pub wu_name: String,

    /// Unix seconds; 0 when the server sets no deadline
    #[serde(default, deserialize_with = "null_as_default")]
    pub report_deadline: u64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub output_files: Vec<FileRef>,
}

/// Server acknowledgement of a reported result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultAck {
    pub name: String,
}
