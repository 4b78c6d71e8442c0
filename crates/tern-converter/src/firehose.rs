//! Firehose subscription and frame decoding.
//!
//! Frames arrive as binary WebSocket messages: a dag-cbor header `{ op, t }`
//! followed by a dag-cbor body. `op == -1` marks an error frame, which is
//! fatal for the subscription. Frame types other than `#commit`, `#identity`
//! and `#account` are ignored.

use futures_util::StreamExt;
use ipld_core::cid::Cid;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct FrameHeader {
    op: i64,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorFrame {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

/// One record operation inside a commit frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoOp {
    pub action: String,
    pub path: String,
    pub cid: Option<Cid>,
}

/// A `#commit` frame: one signed repo commit plus the CAR blocks backing it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitFrame {
    pub seq: i64,
    #[serde(default)]
    pub too_big: bool,
    pub repo: String,
    pub rev: String,
    /// CAR-encoded blocks referenced by `ops`.
    pub blocks: serde_bytes::ByteBuf,
    pub ops: Vec<RepoOp>,
    pub time: String,
}

/// A `#identity` frame. Forwarded verbatim as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityFrame {
    pub seq: i64,
    pub did: String,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

/// An `#account` frame. Forwarded verbatim as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFrame {
    pub seq: i64,
    pub did: String,
    pub time: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A decoded firehose frame the converter cares about.
#[derive(Debug)]
pub enum FirehoseMessage {
    Commit(CommitFrame),
    Identity(IdentityFrame),
    Account(AccountFrame),
}

impl FirehoseMessage {
    /// The subject DID, used as the scheduler shard key and the bus key.
    pub fn did(&self) -> &str {
        match self {
            FirehoseMessage::Commit(f) => &f.repo,
            FirehoseMessage::Identity(f) => &f.did,
            FirehoseMessage::Account(f) => &f.did,
        }
    }

    /// The frame's firehose sequence number.
    pub fn seq(&self) -> i64 {
        match self {
            FirehoseMessage::Commit(f) => f.seq,
            FirehoseMessage::Identity(f) => f.seq,
            FirehoseMessage::Account(f) => f.seq,
        }
    }
}

/// Decode one binary frame. Returns `Ok(None)` for frame types the converter
/// does not handle; error frames surface as [`Error::Stream`].
pub fn parse_frame(data: &[u8]) -> Result<Option<FirehoseMessage>> {
    let mut reader = std::io::Cursor::new(data);

    let header: FrameHeader =
        serde_ipld_dagcbor::de::from_reader_once(&mut reader).map_err(|e| Error::Cbor(e.to_string()))?;

    if header.op == -1 {
        let frame: ErrorFrame = serde_ipld_dagcbor::de::from_reader_once(&mut reader)
            .map_err(|e| Error::Cbor(e.to_string()))?;
        return Err(Error::Stream(format!(
            "{}: {}",
            frame.error,
            frame.message.unwrap_or_default()
        )));
    }

    let message = match header.t.as_deref() {
        Some("#commit") => {
            let frame: CommitFrame = serde_ipld_dagcbor::de::from_reader_once(&mut reader)
                .map_err(|e| Error::Cbor(e.to_string()))?;
            Some(FirehoseMessage::Commit(frame))
        }
        Some("#identity") => {
            let frame: IdentityFrame = serde_ipld_dagcbor::de::from_reader_once(&mut reader)
                .map_err(|e| Error::Cbor(e.to_string()))?;
            Some(FirehoseMessage::Identity(frame))
        }
        Some("#account") => {
            let frame: AccountFrame = serde_ipld_dagcbor::de::from_reader_once(&mut reader)
                .map_err(|e| Error::Cbor(e.to_string()))?;
            Some(FirehoseMessage::Account(frame))
        }
        _ => None,
    };

    Ok(message)
}

/// A live firehose subscription.
pub struct FirehoseSubscriber {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// Subscription URL, with the resume sequence as a `cursor` parameter.
pub fn subscription_url(relay_host: &str, cursor: Option<i64>) -> String {
    match cursor {
        Some(seq) if relay_host.contains('?') => format!("{relay_host}&cursor={seq}"),
        Some(seq) => format!("{relay_host}?cursor={seq}"),
        None => relay_host.to_string(),
    }
}

impl FirehoseSubscriber {
    /// Connect to the relay, optionally resuming from a sequence number.
    pub async fn connect(relay_host: &str, cursor: Option<i64>) -> Result<Self> {
        let url = subscription_url(relay_host, cursor);

        tracing::info!(url = %url, "connecting to firehose");
        let (stream, _) = connect_async(&url).await?;

        Ok(Self { stream })
    }

    /// Read the next binary frame. Returns `None` when the stream ends.
    pub async fn next_frame(&mut self) -> Option<Result<Vec<u8>>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Close(_)) => return None,
                // tungstenite answers pings internally; text frames are not
                // part of the subscription protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestHeader {
        op: i64,
        t: String,
    }

    fn frame_bytes(t: &str, body: &impl Serialize) -> Vec<u8> {
        let mut out = serde_ipld_dagcbor::to_vec(&TestHeader {
            op: 1,
            t: t.to_string(),
        })
        .unwrap();
        out.extend(serde_ipld_dagcbor::to_vec(body).unwrap());
        out
    }

    #[test]
    fn parses_identity_frames() {
        let body = IdentityFrame {
            seq: 42,
            did: "did:plc:abc".to_string(),
            time: "2024-06-01T00:00:00Z".to_string(),
            handle: Some("alice.example.com".to_string()),
        };
        let data = frame_bytes("#identity", &body);

        match parse_frame(&data).unwrap() {
            Some(FirehoseMessage::Identity(f)) => {
                assert_eq!(f.seq, 42);
                assert_eq!(f.did, "did:plc:abc");
                assert_eq!(f.handle.as_deref(), Some("alice.example.com"));
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn parses_account_frames() {
        let body = AccountFrame {
            seq: 7,
            did: "did:plc:xyz".to_string(),
            time: "2024-06-01T00:00:00Z".to_string(),
            active: false,
            status: Some("takendown".to_string()),
        };
        let data = frame_bytes("#account", &body);

        match parse_frame(&data).unwrap() {
            Some(FirehoseMessage::Account(f)) => {
                assert!(!f.active);
                assert_eq!(f.status.as_deref(), Some("takendown"));
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn unknown_frame_types_are_ignored() {
        #[derive(Serialize)]
        struct Empty {}
        let data = frame_bytes("#info", &Empty {});
        assert!(parse_frame(&data).unwrap().is_none());
    }

    #[test]
    fn error_frames_are_fatal() {
        #[derive(Serialize)]
        struct Header {
            op: i64,
        }
        #[derive(Serialize)]
        struct Body {
            error: String,
            message: String,
        }
        let mut data = serde_ipld_dagcbor::to_vec(&Header { op: -1 }).unwrap();
        data.extend(
            serde_ipld_dagcbor::to_vec(&Body {
                error: "FutureCursor".to_string(),
                message: "cursor is ahead of the stream".to_string(),
            })
            .unwrap(),
        );

        match parse_frame(&data) {
            Err(Error::Stream(msg)) => assert!(msg.contains("FutureCursor")),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn truncated_frames_are_decode_errors() {
        assert!(matches!(parse_frame(&[0xa1]), Err(Error::Cbor(_))));
    }

    #[test]
    fn resume_cursor_lands_in_the_subscription_url() {
        let host = "wss://relay.example.com/xrpc/com.atproto.sync.subscribeRepos";
        assert_eq!(
            subscription_url(host, Some(1000)),
            format!("{host}?cursor=1000")
        );
        assert_eq!(subscription_url(host, None), host);

        // An existing query string is extended, not clobbered.
        let with_query = format!("{host}?compress=1");
        assert_eq!(
            subscription_url(&with_query, Some(7)),
            format!("{with_query}&cursor=7")
        );
    }
}
