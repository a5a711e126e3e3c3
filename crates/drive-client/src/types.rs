use serde::{Deserialize, Serialize};

/// Response envelope shared by every drive endpoint.
///
/// `code == 0` means success; anything else is a rejection described by
/// `msg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// Query parameters of the existence check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistsQuery<'a> {
    pub folder_id: i64,
    pub hash: &'a str,
}

/// Query parameters of a chunk upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery<'a> {
    pub hash: &'a str,
    pub chunk_index: u64,
    pub chunk_count: u64,
    pub folder_id: i64,
    pub filename: &'a str,
    pub size: u64,
}
