//! Shard file payload codec.
//!
//! Layout (all integers little-endian, strings as u16 length + UTF-8 bytes):
//!
//! ```text
//! str   "SEG_V2"
//! i32   node_count
//!       node_count x { str id, str label, i32 n, n x { str key, str value } }
//! i32   relation_count
//!       relation_count x { str source, str target, str type,
//!                          i32 n, n x { str key, u8 tag, value } }
//! ```
//!
//! Property value tags: 0 = bool (u8), 1 = number (f64), 2 = string (str).
//! The payload is sealed by `CryptoManager` and base64-encoded before it
//! reaches disk; this module only sees plaintext.

use std::collections::BTreeMap;

use crate::error::{GraphError, Result};
use crate::storage::{Node, PropertyValue, Relation, MAX_STRING_BYTES};

/// Format tag. V2 = authenticated encryption + relation properties.
pub const MAGIC: &str = "SEG_V2";

const TAG_BOOL: u8 = 0;
const TAG_NUMBER: u8 = 1;
const TAG_STRING: u8 = 2;

/// Decoded contents of one shard file
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ShardImage {
    pub nodes: Vec<Node>,
    pub relations: Vec<Relation>,
}

pub fn encode_shard(nodes: &[&Node], relations: &[&Relation]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 + nodes.len() * 48 + relations.len() * 48);
    put_str(&mut out, MAGIC)?;

    put_count(&mut out, nodes.len())?;
    for node in nodes {
        put_str(&mut out, &node.id)?;
        put_str(&mut out, &node.label)?;
        put_count(&mut out, node.properties.len())?;
        for (key, value) in &node.properties {
            put_str(&mut out, key)?;
            put_str(&mut out, value)?;
        }
    }

    put_count(&mut out, relations.len())?;
    for rel in relations {
        put_str(&mut out, &rel.source)?;
        put_str(&mut out, &rel.target)?;
        put_str(&mut out, &rel.relation_type)?;
        put_count(&mut out, rel.properties.len())?;
        for (key, value) in &rel.properties {
            put_str(&mut out, key)?;
            match value {
                PropertyValue::Bool(b) => {
                    out.push(TAG_BOOL);
                    out.push(u8::from(*b));
                }
                PropertyValue::Number(n) => {
                    out.push(TAG_NUMBER);
                    out.extend_from_slice(&n.to_le_bytes());
                }
                PropertyValue::String(s) => {
                    out.push(TAG_STRING);
                    put_str(&mut out, s)?;
                }
            }
        }
    }

    Ok(out)
}

pub fn decode_shard(bytes: &[u8]) -> Result<ShardImage> {
    let mut reader = Reader::new(bytes);

    let magic = reader.string()?;
    if magic != MAGIC {
        return Err(GraphError::InvalidFormat(format!(
            "bad header {:?}, expected {:?}",
            magic, MAGIC
        )));
    }

    let node_count = reader.count()?;
    let mut nodes = Vec::with_capacity(node_count.min(reader.remaining()));
    for _ in 0..node_count {
        let id = reader.string()?;
        let label = reader.string()?;
        let prop_count = reader.count()?;
        let mut properties = BTreeMap::new();
        for _ in 0..prop_count {
            let key = reader.string()?;
            let value = reader.string()?;
            properties.insert(key, value);
        }
        nodes.push(Node { id, label, properties });
    }

    let relation_count = reader.count()?;
    let mut relations = Vec::with_capacity(relation_count.min(reader.remaining()));
    for _ in 0..relation_count {
        let source = reader.string()?;
        let target = reader.string()?;
        let relation_type = reader.string()?;
        let prop_count = reader.count()?;
        let mut properties = BTreeMap::new();
        for _ in 0..prop_count {
            let key = reader.string()?;
            let value = match reader.u8()? {
                TAG_BOOL => PropertyValue::Bool(reader.u8()? != 0),
                TAG_NUMBER => PropertyValue::Number(reader.f64()?),
                TAG_STRING => PropertyValue::String(reader.string()?),
                tag => {
                    return Err(GraphError::InvalidFormat(format!(
                        "unknown property tag {}",
                        tag
                    )))
                }
            };
            properties.insert(key, value);
        }
        relations.push(Relation { source, target, relation_type, properties });
    }

    if reader.remaining() != 0 {
        return Err(GraphError::InvalidFormat(format!(
            "{} trailing bytes after relations",
            reader.remaining()
        )));
    }

    Ok(ShardImage { nodes, relations })
}

fn put_str(out: &mut Vec<u8>, value: &str) -> Result<()> {
    if value.len() > MAX_STRING_BYTES {
        return Err(GraphError::InvalidRecord(format!(
            "string of {} bytes exceeds the {} byte limit",
            value.len(),
            MAX_STRING_BYTES
        )));
    }
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_count(out: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = i32::try_from(count)
        .map_err(|_| GraphError::InvalidRecord(format!("count {} does not fit in i32", count)))?;
    out.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(GraphError::InvalidFormat(format!(
                "truncated payload: need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn count(&mut self) -> Result<usize> {
        let bytes = self.take(4)?;
        let count = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        usize::try_from(count)
            .map_err(|_| GraphError::InvalidFormat(format!("negative count {}", count)))
    }

    fn f64(&mut self) -> Result<f64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(raw))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| GraphError::InvalidFormat(format!("invalid UTF-8 string: {}", e)))
    }
}
