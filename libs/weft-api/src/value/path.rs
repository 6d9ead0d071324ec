//! Dotted/bracketed path access into a value tree.
//!
//! Grammar: `segment ( "." segment | "[" index "]" )*` where a segment is a
//! non-empty run of characters other than `.`, `[`, `]`, and an index is a
//! decimal integer without leading zeros.

use crate::error::Error;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// Parse a property path into segments.
pub fn parse_path(path: &str) -> Result<Vec<PathSeg>, Error> {
    if path.is_empty() {
        return Err(Error::invalid_argument("empty property path"));
    }

    let mut segs = Vec::new();
    let bytes = path.as_bytes();
    let mut i = 0;
    let mut expect_key = true;

    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                if expect_key {
                    return Err(Error::invalid_argument(format!(
                        "invalid path '{path}': empty segment"
                    )));
                }
                i += 1;
                expect_key = true;
            }
            b'[' => {
                if expect_key {
                    return Err(Error::invalid_argument(format!(
                        "invalid path '{path}': index without a preceding segment"
                    )));
                }
                let close = path[i..].find(']').map(|off| i + off).ok_or_else(|| {
                    Error::invalid_argument(format!("invalid path '{path}': unterminated index"))
                })?;
                let digits = &path[i + 1..close];
                let valid = !digits.is_empty()
                    && digits.bytes().all(|b| b.is_ascii_digit())
                    && (digits == "0" || !digits.starts_with('0'));
                if !valid {
                    return Err(Error::invalid_argument(format!(
                        "invalid path '{path}': bad index '{digits}'"
                    )));
                }
                let index = digits.parse::<usize>().map_err(|_| {
                    Error::invalid_argument(format!("invalid path '{path}': bad index '{digits}'"))
                })?;
                segs.push(PathSeg::Index(index));
                i = close + 1;
            }
            b']' => {
                return Err(Error::invalid_argument(format!(
                    "invalid path '{path}': unexpected ']'"
                )));
            }
            _ => {
                if !expect_key {
                    return Err(Error::invalid_argument(format!(
                        "invalid path '{path}': expected '.' or '[' before segment"
                    )));
                }
                let end = path[i..]
                    .find(['.', '[', ']'])
                    .map(|off| i + off)
                    .unwrap_or(path.len());
                segs.push(PathSeg::Key(path[i..end].to_string()));
                i = end;
                expect_key = false;
            }
        }
    }

    if expect_key {
        return Err(Error::invalid_argument(format!(
            "invalid path '{path}': trailing '.'"
        )));
    }

    Ok(segs)
}

impl Value {
    /// Borrow the value at `path`. Fails when the path is malformed or no
    /// node exists there.
    pub fn peek_from_path(&self, path: &str) -> Result<&Value, Error> {
        let segs = parse_path(path)?;
        let mut cur = self;
        for seg in &segs {
            cur = match seg {
                PathSeg::Key(key) => cur.object_peek(key).ok_or_else(|| {
                    Error::invalid_argument(format!("no value at path '{path}'"))
                })?,
                PathSeg::Index(i) => cur.array_peek(*i).ok_or_else(|| {
                    Error::invalid_argument(format!("no value at path '{path}'"))
                })?,
            };
        }
        Ok(cur)
    }

    /// Move `value` into the tree at `path`, creating missing object nodes
    /// along the way. Arrays are never grown: an index segment must refer
    /// to an existing element.
    pub fn set_from_path(&mut self, path: &str, value: Value) -> Result<(), Error> {
        let segs = parse_path(path)?;
        let mut cur = self;

        for (pos, seg) in segs.iter().enumerate() {
            let last = pos + 1 == segs.len();
            match seg {
                PathSeg::Key(key) => {
                    if !cur.is_object() {
                        return Err(Error::invalid_argument(format!(
                            "path '{path}': segment '{key}' applied to a non-object node"
                        )));
                    }
                    if last {
                        cur.object_move(key.clone(), value)?;
                        return Ok(());
                    }
                    if cur.object_peek(key).is_none() {
                        cur.object_move(key.clone(), Value::empty_object())?;
                    }
                    cur = cur.object_peek_mut(key).expect("entry just ensured");
                }
                PathSeg::Index(i) => {
                    let items = cur.as_array_mut().ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "path '{path}': index [{i}] applied to a non-array node"
                        ))
                    })?;
                    let len = items.len();
                    let slot = items.get_mut(*i).ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "path '{path}': index [{i}] out of bounds (len {len})"
                        ))
                    })?;
                    if last {
                        *slot = value;
                        return Ok(());
                    }
                    cur = slot;
                }
            }
        }

        unreachable!("loop always returns on the last segment")
    }
}
