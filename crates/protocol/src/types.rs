use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle status of a single upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Creating,
    Uploading,
    Paused,
    Completed,
    Failed,
}

impl UploadStatus {
    /// Returns `true` once no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Failed)
    }

    /// Returns `true` if a session is (or will be) driving this upload.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Creating => "creating",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Paused => "paused",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A completed object as reported by the listing API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedObject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Size in bytes. The listing API encodes it as a string.
    #[serde(deserialize_with = "size_from_string_or_number")]
    pub size: u64,
}

fn size_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Finds the listing entry for an uploaded file, matching the storage key
/// first and the display name second.
pub fn find_listing<'a>(entries: &'a [ListedObject], name: &str) -> Option<&'a ListedObject> {
    entries
        .iter()
        .find(|e| e.key.as_deref() == Some(name))
        .or_else(|| entries.iter().find(|e| e.name == name))
}
