use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

pub const MAX_BLOB_DEPTH: usize = 64;

const CHILD_TAG: [u8; 2] = [0x0A, 0x20];
const CHILD_ID_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlobFrame {
    /// Child blob ids, hex encoded, in stored order.
    pub children: Vec<String>,
    pub embedded: Option<Value>,
}

/// Splits a blob into its `0x0A 0x20 <32-byte id>` child references and an
/// optional trailing JSON object. A blob that is plain JSON has no children.
pub fn parse_frame(data: &[u8]) -> BlobFrame {
    let mut frame = BlobFrame::default();
    let mut pos = 0;
    while data.len() >= pos + CHILD_TAG.len() + CHILD_ID_LEN
        && data[pos..pos + CHILD_TAG.len()] == CHILD_TAG
    {
        let start = pos + CHILD_TAG.len();
        frame
            .children
            .push(encode_hex(&data[start..start + CHILD_ID_LEN]));
        pos = start + CHILD_ID_LEN;
    }

    let rest = &data[pos..];
    if let Some(offset) = rest.iter().position(|byte| *byte == b'{') {
        frame.embedded = serde_json::Deserializer::from_slice(&rest[offset..])
            .into_iter::<Value>()
            .next()
            .and_then(Result::ok)
            .filter(Value::is_object);
    }
    frame
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobWalk {
    /// JSON message objects in conversation order.
    pub messages: Vec<Value>,
    pub skipped: usize,
    pub visited: usize,
}

impl BlobWalk {
    /// Depth-first from `root`. Missing, unreadable, cyclic and too-deep blobs
    /// are counted in `skipped` and the walk continues.
    pub fn run<F>(root: &str, mut fetch: F) -> Self
    where
        F: FnMut(&str) -> Option<Vec<u8>>,
    {
        let mut walk = BlobWalk::default();
        let mut seen = HashSet::new();
        walk.visit(root, 0, &mut seen, &mut fetch);
        walk
    }

    fn visit<F>(&mut self, id: &str, depth: usize, seen: &mut HashSet<String>, fetch: &mut F)
    where
        F: FnMut(&str) -> Option<Vec<u8>>,
    {
        if depth > MAX_BLOB_DEPTH {
            self.skip(id, "blob chain too deep");
            return;
        }
        if !seen.insert(id.to_string()) {
            self.skip(id, "blob referenced twice");
            return;
        }
        let Some(data) = fetch(id) else {
            self.skip(id, "blob missing");
            return;
        };
        self.visited += 1;

        let frame = parse_frame(&data);
        if frame.children.is_empty() && frame.embedded.is_none() {
            self.skip(id, "blob is neither framing nor json");
            return;
        }
        for child in &frame.children {
            self.visit(child, depth + 1, seen, fetch);
        }
        if let Some(value) = frame.embedded {
            if is_message(&value) {
                self.messages.push(value);
            }
        }
    }

    fn skip(&mut self, id: &str, reason: &str) {
        self.skipped += 1;
        debug!(blob_id = %id, reason, skipped = self.skipped, "skipping blob");
    }
}

fn is_message(value: &Value) -> bool {
    value.get("role").and_then(Value::as_str).is_some()
}

pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(text.get(index..index + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn id(n: u8) -> [u8; 32] {
        [n; 32]
    }

    fn node(children: &[[u8; 32]], embedded: Option<&str>) -> Vec<u8> {
        let mut data = Vec::new();
        for child in children {
            data.extend_from_slice(&CHILD_TAG);
            data.extend_from_slice(child);
        }
        if let Some(json) = embedded {
            data.extend_from_slice(&[0x12, 0x05]);
            data.extend_from_slice(json.as_bytes());
        }
        data
    }

    #[test]
    fn frame_splits_children_and_embedded_json() {
        let data = node(&[id(1), id(2)], Some(r#"{"role":"user","content":"hi"}"#));
        let frame = parse_frame(&data);
        assert_eq!(frame.children, vec![encode_hex(&id(1)), encode_hex(&id(2))]);
        assert_eq!(
            frame.embedded.as_ref().and_then(|v| v.get("content")).and_then(Value::as_str),
            Some("hi")
        );
    }

    #[test]
    fn walk_collects_leaves_in_order_and_skips_corrupt_rows() {
        let mut blobs: HashMap<String, Vec<u8>> = HashMap::new();
        blobs.insert(encode_hex(&id(0)), node(&[id(1), id(2), id(3), id(9)], None));
        blobs.insert(
            encode_hex(&id(1)),
            br#"{"role":"user","content":"first"}"#.to_vec(),
        );
        blobs.insert(encode_hex(&id(2)), b"{not json".to_vec());
        blobs.insert(
            encode_hex(&id(3)),
            br#"{"role":"assistant","content":"second"}"#.to_vec(),
        );

        let walk = BlobWalk::run(&encode_hex(&id(0)), |key| blobs.get(key).cloned());
        let contents: Vec<&str> = walk
            .messages
            .iter()
            .filter_map(|m| m.get("content").and_then(Value::as_str))
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
        // The unparsable blob and the missing id(9).
        assert_eq!(walk.skipped, 2);
    }

    #[test]
    fn cyclic_references_terminate() {
        let mut blobs: HashMap<String, Vec<u8>> = HashMap::new();
        blobs.insert(encode_hex(&id(0)), node(&[id(1)], None));
        blobs.insert(
            encode_hex(&id(1)),
            node(&[id(0)], Some(r#"{"role":"user","content":"loop"}"#)),
        );
        let walk = BlobWalk::run(&encode_hex(&id(0)), |key| blobs.get(key).cloned());
        assert_eq!(walk.messages.len(), 1);
        assert_eq!(walk.skipped, 1);
    }

    #[test]
    fn deep_chains_are_bounded() {
        let mut blobs: HashMap<String, Vec<u8>> = HashMap::new();
        let chain_len = (MAX_BLOB_DEPTH + 10) as u16;
        let key = |n: u16| {
            let mut raw = [0u8; 32];
            raw[..2].copy_from_slice(&n.to_be_bytes());
            raw
        };
        for n in 0..chain_len {
            blobs.insert(encode_hex(&key(n)), node(&[key(n + 1)], None));
        }
        let walk = BlobWalk::run(&encode_hex(&key(0)), |k| blobs.get(k).cloned());
        assert_eq!(walk.visited, MAX_BLOB_DEPTH + 1);
        assert_eq!(walk.skipped, 1);
    }

    #[test]
    fn hex_round_trips_and_rejects_garbage() {
        assert_eq!(decode_hex("7b7d"), Some(b"{}".to_vec()));
        assert_eq!(decode_hex("7b7"), None);
        assert_eq!(decode_hex("zz"), None);
    }
}
