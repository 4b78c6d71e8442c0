//! Blob discovery in decoded records.
//!
//! Records reference media as blob objects in their JSON form:
//! `{"$type": "blob", "ref": {"$link": "<cid>"}, "mimeType": "...", "size": n}`.
//! Some very old records use the legacy form `{"cid": "...", "mimeType": "..."}`.
//! Both are collected; mime types prefixed `image/` are dispatched to the
//! image enrichers, `video/` blobs are listed but not dispatched.

use serde_json::Value;

/// A blob reference found in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub cid: String,
    pub mime_type: String,
}

impl BlobRef {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }
}

/// Walk a decoded record and collect every blob reference.
pub fn find_blobs(record: &Value) -> Vec<BlobRef> {
    let mut out = Vec::new();
    walk(record, &mut out);
    out
}

/// Blob references with an `image/` mime type.
pub fn images(record: &Value) -> Vec<BlobRef> {
    find_blobs(record).into_iter().filter(BlobRef::is_image).collect()
}

/// Blob references with a `video/` mime type.
pub fn videos(record: &Value) -> Vec<BlobRef> {
    find_blobs(record).into_iter().filter(BlobRef::is_video).collect()
}

fn walk(value: &Value, out: &mut Vec<BlobRef>) {
    match value {
        Value::Object(map) => {
            if let Some(blob) = as_blob(map) {
                out.push(blob);
            }
            for child in map.values() {
                walk(child, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                walk(child, out);
            }
        }
        _ => {}
    }
}

fn as_blob(map: &serde_json::Map<String, Value>) -> Option<BlobRef> {
    let mime_type = map.get("mimeType")?.as_str()?.to_string();

    if map.get("$type").and_then(Value::as_str) == Some("blob") {
        let cid = map.get("ref")?.get("$link")?.as_str()?.to_string();
        return Some(BlobRef { cid, mime_type });
    }

    // Legacy blob form.
    if let Some(cid) = map.get("cid").and_then(Value::as_str) {
        return Some(BlobRef {
            cid: cid.to_string(),
            mime_type,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_with_images() -> Value {
        serde_json::json!({
            "$type": "app.bsky.feed.post",
            "text": "two pics and a clip",
            "embed": {
                "$type": "app.bsky.embed.images",
                "images": [
                    {
                        "alt": "first",
                        "image": {
                            "$type": "blob",
                            "ref": {"$link": "bafkreia"},
                            "mimeType": "image/jpeg",
                            "size": 12345
                        }
                    },
                    {
                        "alt": "second",
                        "image": {
                            "$type": "blob",
                            "ref": {"$link": "bafkreib"},
                            "mimeType": "image/png",
                            "size": 54321
                        }
                    }
                ]
            },
            "video": {
                "$type": "blob",
                "ref": {"$link": "bafkreic"},
                "mimeType": "video/mp4",
                "size": 99999
            }
        })
    }

    #[test]
    fn finds_all_blob_references() {
        let blobs = find_blobs(&post_with_images());
        assert_eq!(blobs.len(), 3);
    }

    #[test]
    fn images_and_videos_are_split_by_mime_prefix() {
        let record = post_with_images();
        let images = images(&record);
        assert_eq!(images.len(), 2);
        assert!(images.iter().all(BlobRef::is_image));
        assert_eq!(images[0].cid, "bafkreia");

        let videos = videos(&record);
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].cid, "bafkreic");
    }

    #[test]
    fn legacy_blob_form_is_recognized() {
        let record = serde_json::json!({
            "avatar": {"cid": "bafylegacy", "mimeType": "image/jpeg"}
        });
        let blobs = find_blobs(&record);
        assert_eq!(
            blobs,
            vec![BlobRef {
                cid: "bafylegacy".to_string(),
                mime_type: "image/jpeg".to_string()
            }]
        );
    }

    #[test]
    fn records_without_blobs_yield_nothing() {
        // A strong ref carries a cid but no mimeType, so it is not a blob.
        let record = serde_json::json!({"$type": "app.bsky.feed.like", "subject": {"uri": "at://x/y/z", "cid": "bafy"}});
        assert!(find_blobs(&record).is_empty());
        let record = serde_json::json!({"text": "plain"});
        assert!(find_blobs(&record).is_empty());
    }
}
