// Discovery datagram format
//
// Every datagram is a single JSON object tagged by "type". Anything that does
// not parse is someone else's traffic and is dropped by the caller.

use serde::{Deserialize, Serialize};

/// Queries sent by scanners and resolvers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    /// "Who is out there?" (sent to the group)
    NameQuery,
    /// "Which control port do you listen on?" (sent point-to-point)
    PortQuery,
}

/// Replies sent by kernels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Name { name: String },
    Port { port: u16 },
}

impl Query {
    pub fn encode(&self) -> Vec<u8> {
        // Serializing a unit-variant enum cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

impl Reply {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        assert_eq!(Query::NameQuery.encode(), br#"{"type":"name_query"}"#);
        assert_eq!(
            Reply::Port { port: 1234 }.encode(),
            br#"{"type":"port","port":1234}"#
        );
    }

    #[test]
    fn test_decode_reply_from_foreign_encoder() {
        let reply = Reply::decode(br#"{ "name": "kernel-a", "type": "name" }"#);
        assert_eq!(
            reply,
            Some(Reply::Name {
                name: "kernel-a".to_string()
            })
        );
    }

    #[test]
    fn test_garbage_is_ignored() {
        assert_eq!(Query::decode(b"PLK_PROBE"), None);
        assert_eq!(Reply::decode(br#"{"type":"port","port":70000}"#), None);
        assert_eq!(Reply::decode(br#"{"type":"name_query"}"#), None);
    }
}
