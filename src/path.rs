//! Dotted setting paths.
//!
//! Grammar: `key ('.' (key | index))*` where `index` is `[0-9]+` and
//! addresses an element of a repeated group.

use std::fmt;

use crate::{Error, Result};

/// One segment of a dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", key),
            Segment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Parse a dotted path into segments.
pub fn parse(path: &str) -> Result<Vec<Segment>> {
    if path.is_empty() {
        return Err(Error::InvalidPath("empty path".to_string()));
    }

    path.split('.')
        .enumerate()
        .map(|(position, part)| {
            if part.is_empty() {
                return Err(Error::InvalidPath(format!("empty segment in '{}'", path)));
            }
            if part.bytes().all(|b| b.is_ascii_digit()) {
                if position == 0 {
                    return Err(Error::InvalidPath(format!(
                        "'{}' cannot start with an index",
                        path
                    )));
                }
                let index = part
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidPath(format!("index out of range in '{}'", path)))?;
                Ok(Segment::Index(index))
            } else {
                Ok(Segment::Key(part.to_string()))
            }
        })
        .collect()
}

/// Join segments back into a dotted path.
pub fn join(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(Segment::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Append `key` to the dotted path `base`.
pub fn child(base: &str, key: impl fmt::Display) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", base, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keys_and_indices() {
        let segments = parse("cells.instances.0.id").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Key("cells".to_string()),
                Segment::Key("instances".to_string()),
                Segment::Index(0),
                Segment::Key("id".to_string()),
            ]
        );
        assert_eq!(join(&segments), "cells.instances.0.id");
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        assert!(matches!(parse(""), Err(Error::InvalidPath(_))));
        assert!(matches!(parse("a..b"), Err(Error::InvalidPath(_))));
        assert!(matches!(parse("a."), Err(Error::InvalidPath(_))));
        assert!(matches!(parse("0.a"), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_mixed_segment_is_a_key() {
        assert_eq!(parse("port1").unwrap(), vec![Segment::Key("port1".to_string())]);
    }

    #[test]
    fn test_child() {
        assert_eq!(child("", "port"), "port");
        assert_eq!(child("cells.instances", 2), "cells.instances.2");
    }
}
