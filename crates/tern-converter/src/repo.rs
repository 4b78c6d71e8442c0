//! CAR block access, record decoding, and content-address validation.
//!
//! A commit frame carries its referenced blocks as a CAR archive. Records are
//! looked up by the content-address each op declares; the block's recomputed
//! address must match or the op is dropped. Decoded records are converted
//! from dag-cbor to the JSON data model (`$link` for CIDs, `$bytes` for byte
//! strings) before they travel further down the pipeline.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use multihash_codetable::{Code, MultihashDigest};

use crate::error::{Error, Result};

/// Multicodec code for dag-cbor, the record block codec.
const DAG_CBOR: u64 = 0x71;

/// The blocks of one commit's CAR archive, indexed by content-address.
pub struct RepoArchive {
    blocks: HashMap<String, Vec<u8>>,
}

impl RepoArchive {
    /// Read all blocks out of a CAR archive.
    pub async fn read(car_bytes: &[u8]) -> Result<Self> {
        let mut reader = iroh_car::CarReader::new(car_bytes)
            .await
            .map_err(|e| Error::Car(e.to_string()))?;

        let mut blocks = HashMap::new();
        loop {
            match reader.next_block().await {
                Ok(Some((cid, data))) => {
                    blocks.insert(cid.to_string(), data);
                }
                Ok(None) => break,
                Err(e) => return Err(Error::Car(e.to_string())),
            }
        }

        Ok(Self { blocks })
    }

    /// Number of blocks in the archive.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Fetch the record block declared by an op, verify its recomputed
    /// content-address, and decode it to canonical JSON.
    ///
    /// Returns the validated address string and the decoded record.
    pub fn record(&self, declared: &Cid) -> Result<(String, serde_json::Value)> {
        let declared = declared.to_string();
        let block = self
            .blocks
            .get(&declared)
            .ok_or_else(|| Error::MissingBlock(declared.clone()))?;

        let actual = compute_cid(block).to_string();
        if actual != declared {
            return Err(Error::CidMismatch {
                expected: declared,
                actual,
            });
        }

        let ipld: Ipld =
            serde_ipld_dagcbor::from_slice(block).map_err(|e| Error::Cbor(e.to_string()))?;

        Ok((declared, ipld_to_json(ipld)))
    }
}

/// Recompute a block's content-address (CIDv1, dag-cbor, sha2-256).
pub fn compute_cid(block: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Code::Sha2_256.digest(block))
}

/// Convert decoded IPLD into the JSON data model.
pub fn ipld_to_json(ipld: Ipld) -> serde_json::Value {
    use serde_json::Value;

    match ipld {
        Ipld::Null => Value::Null,
        Ipld::Bool(b) => Value::Bool(b),
        Ipld::Integer(i) => match i64::try_from(i) {
            Ok(n) => Value::Number(n.into()),
            // Out-of-range integers don't occur in valid records; keep the
            // value representable rather than dropping the field.
            Err(_) => Value::String(i.to_string()),
        },
        Ipld::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Ipld::String(s) => Value::String(s),
        Ipld::Bytes(bytes) => {
            serde_json::json!({ "$bytes": STANDARD_NO_PAD.encode(bytes) })
        }
        Ipld::List(items) => Value::Array(items.into_iter().map(ipld_to_json).collect()),
        Ipld::Map(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, ipld_to_json(v)))
                .collect(),
        ),
        Ipld::Link(cid) => serde_json::json!({ "$link": cid.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_block() -> (Cid, Vec<u8>) {
        let record = serde_json::json!({
            "$type": "app.bsky.feed.post",
            "text": "hello world",
            "createdAt": "2024-06-01T00:00:00Z",
        });
        let bytes = serde_ipld_dagcbor::to_vec(&record).unwrap();
        let cid = compute_cid(&bytes);
        (cid, bytes)
    }

    fn archive_with(blocks: Vec<(String, Vec<u8>)>) -> RepoArchive {
        RepoArchive {
            blocks: blocks.into_iter().collect(),
        }
    }

    #[test]
    fn record_with_matching_cid_decodes() {
        let (cid, bytes) = record_block();
        let archive = archive_with(vec![(cid.to_string(), bytes)]);

        let (validated, record) = archive.record(&cid).unwrap();
        assert_eq!(validated, cid.to_string());
        assert_eq!(record["text"], "hello world");
        assert_eq!(record["$type"], "app.bsky.feed.post");
    }

    #[test]
    fn mismatched_block_is_rejected() {
        let (cid, _) = record_block();
        let tampered = serde_ipld_dagcbor::to_vec(&serde_json::json!({"text": "evil"})).unwrap();
        let archive = archive_with(vec![(cid.to_string(), tampered)]);

        match archive.record(&cid) {
            Err(Error::CidMismatch { expected, actual }) => {
                assert_eq!(expected, cid.to_string());
                assert_ne!(actual, expected);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn missing_block_is_reported() {
        let (cid, _) = record_block();
        let archive = archive_with(vec![]);
        assert!(matches!(archive.record(&cid), Err(Error::MissingBlock(_))));
    }

    #[test]
    fn links_and_bytes_use_the_json_data_model() {
        let (cid, _) = record_block();
        let ipld = Ipld::Map(
            [
                ("ref".to_string(), Ipld::Link(cid)),
                ("data".to_string(), Ipld::Bytes(vec![0xde, 0xad, 0xbe, 0xef])),
                ("n".to_string(), Ipld::Integer(7)),
            ]
            .into_iter()
            .collect(),
        );

        let json = ipld_to_json(ipld);
        assert_eq!(json["ref"]["$link"], cid.to_string());
        assert_eq!(json["data"]["$bytes"], "3q2+7w");
        assert_eq!(json["n"], 7);
    }
}
