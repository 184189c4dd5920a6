//! Drive v3 wire types.

use std::collections::HashMap;

use recsync_protocol::{
    CONTENT_HASH_PROPERTY, FolderHandle, QuotaInfo, RemoteEntry, RemoteError, RemoteObject,
    TAGS_PROPERTY, UploadMetadata,
};
use serde::{Deserialize, Serialize};

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// A Drive `File` resource, restricted to the fields we request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Drive encodes int64 values as strings.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub app_properties: HashMap<String, String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    pub fn into_folder(self) -> FolderHandle {
        FolderHandle {
            remote_id: self.id,
            display_name: self.name,
        }
    }

    pub fn into_object(mut self) -> Result<RemoteObject, RemoteError> {
        let size = match self.size.as_deref() {
            Some(s) => s
                .parse()
                .map_err(|_| RemoteError::Malformed(format!("bad size {s:?} on {}", self.id)))?,
            None => 0,
        };
        let tags = self
            .app_properties
            .remove(TAGS_PROPERTY)
            .map(|joined| split_tags(&joined))
            .unwrap_or_default();
        Ok(RemoteObject {
            content_hash: self.app_properties.remove(CONTENT_HASH_PROPERTY),
            parent_folder_id: self.parents.into_iter().next(),
            remote_id: self.id,
            name: self.name,
            size,
            etag: self.version,
            mime_type: self.mime_type,
            tags,
        })
    }

    pub fn into_entry(self) -> Result<RemoteEntry, RemoteError> {
        if self.is_folder() {
            Ok(RemoteEntry::Folder(self.into_folder()))
        } else {
            self.into_object().map(RemoteEntry::File)
        }
    }
}

fn split_tags(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    pub storage_quota: StorageQuota,
}

#[derive(Debug, Deserialize)]
pub struct StorageQuota {
    /// Absent for unlimited accounts.
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
}

impl StorageQuota {
    pub fn into_quota(self) -> Result<QuotaInfo, RemoteError> {
        let parse = |v: Option<String>| -> Result<Option<u64>, RemoteError> {
            v.map(|s| {
                s.parse()
                    .map_err(|_| RemoteError::Malformed(format!("bad quota value {s:?}")))
            })
            .transpose()
        };
        Ok(QuotaInfo {
            used_bytes: parse(self.usage)?.unwrap_or(0),
            limit_bytes: parse(self.limit)?,
        })
    }
}

/// Metadata body for new files and folders.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFile<'a> {
    pub name: &'a str,
    pub mime_type: &'a str,
    pub parents: [&'a str; 1],
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub app_properties: HashMap<&'static str, String>,
}

impl<'a> NewFile<'a> {
    pub fn folder(name: &'a str, parent_id: &'a str) -> Self {
        Self {
            name,
            mime_type: FOLDER_MIME_TYPE,
            parents: [parent_id],
            app_properties: HashMap::new(),
        }
    }

    pub fn upload(metadata: &'a UploadMetadata) -> Self {
        let mut app_properties = HashMap::new();
        if !metadata.content_hash.is_empty() {
            app_properties.insert(CONTENT_HASH_PROPERTY, metadata.content_hash.clone());
        }
        if !metadata.tags.is_empty() {
            app_properties.insert(TAGS_PROPERTY, metadata.tags.join(","));
        }
        Self {
            name: &metadata.name,
            mime_type: &metadata.mime_type,
            parents: [metadata.parent_id.as_str()],
            app_properties,
        }
    }
}

/// Google API error envelope.
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorItem {
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_maps_app_properties() {
        let file: DriveFile = serde_json::from_str(
            r#"{
                "id": "f1",
                "name": "take.wav",
                "mimeType": "audio/wav",
                "size": "1234",
                "parents": ["p1"],
                "version": "7",
                "appProperties": {"recsyncSha256": "abc", "recsyncTags": "drums, live,"}
            }"#,
        )
        .unwrap();
        let obj = file.into_object().unwrap();
        assert_eq!(obj.size, 1234);
        assert_eq!(obj.content_hash.as_deref(), Some("abc"));
        assert_eq!(obj.parent_folder_id.as_deref(), Some("p1"));
        assert_eq!(obj.etag.as_deref(), Some("7"));
        assert_eq!(obj.tags, vec!["drums".to_string(), "live".to_string()]);
    }

    #[test]
    fn folder_becomes_folder_entry() {
        let file: DriveFile = serde_json::from_str(&format!(
            r#"{{"id": "d1", "name": "Recordings", "mimeType": "{FOLDER_MIME_TYPE}"}}"#
        ))
        .unwrap();
        assert!(matches!(
            file.into_entry().unwrap(),
            RemoteEntry::Folder(FolderHandle { remote_id, .. }) if remote_id == "d1"
        ));
    }

    #[test]
    fn bad_size_is_malformed() {
        let file: DriveFile =
            serde_json::from_str(r#"{"id": "f1", "name": "x", "size": "lots"}"#).unwrap();
        assert!(matches!(file.into_object(), Err(RemoteError::Malformed(_))));
    }

    #[test]
    fn unlimited_quota_has_no_limit() {
        let about: About =
            serde_json::from_str(r#"{"storageQuota": {"usage": "42"}}"#).unwrap();
        let quota = about.storage_quota.into_quota().unwrap();
        assert_eq!(quota.used_bytes, 42);
        assert_eq!(quota.limit_bytes, None);
    }

    #[test]
    fn upload_body_carries_hash_and_tags() {
        let meta = UploadMetadata {
            name: "a.wav".into(),
            parent_id: "p".into(),
            mime_type: "audio/wav".into(),
            size: 10,
            content_hash: "h".into(),
            tags: vec!["x".into(), "y".into()],
        };
        let body = serde_json::to_value(NewFile::upload(&meta)).unwrap();
        assert_eq!(body["parents"][0], "p");
        assert_eq!(body["appProperties"]["recsyncSha256"], "h");
        assert_eq!(body["appProperties"]["recsyncTags"], "x,y");
    }

    #[test]
    fn folder_body_has_no_app_properties() {
        let body = serde_json::to_value(NewFile::folder("Recordings", "root")).unwrap();
        assert_eq!(body["mimeType"], FOLDER_MIME_TYPE);
        assert!(body.get("appProperties").is_none());
    }
}
