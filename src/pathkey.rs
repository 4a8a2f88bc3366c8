//! Slash-delimited tree addresses: `/`, `/font`, `/font/bank`, `/font/bank/program`.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::PathKeyError;

/// Segments a key may hold.
pub const MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Num(u32),
}

/// An immutable tree address. Keys compare and hash by their path string, so
/// `Text("3")` and `Num(3)` address the same node.
#[derive(Debug, Clone)]
pub struct PathKey {
    segments: Vec<Segment>,
    path: String,
}

impl PathKey {
    /// Build a key from optional segments. Segments after the first `None`
    /// are dropped, so callers must fill them left to right without holes.
    pub fn new<I>(segments: I) -> Result<Self, PathKeyError>
    where
        I: IntoIterator<Item = Option<Segment>>,
    {
        let segments: Vec<Segment> = segments.into_iter().map_while(|s| s).collect();
        if segments.len() > MAX_DEPTH {
            return Err(PathKeyError::TooDeep {
                max: MAX_DEPTH,
                got: segments.len(),
            });
        }
        for seg in &segments {
            if let Segment::Text(t) = seg {
                if t.is_empty() {
                    return Err(PathKeyError::Empty);
                }
                if t.contains('/') {
                    return Err(PathKeyError::Slash(t.clone()));
                }
            }
        }
        Ok(Self::from_parts(segments))
    }

    fn from_parts(segments: Vec<Segment>) -> Self {
        let mut path = String::from("/");
        let joined: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
        path.push_str(&joined.join("/"));
        Self { segments, path }
    }

    pub fn root() -> Self {
        Self::from_parts(Vec::new())
    }

    pub fn font(font: u32) -> Self {
        Self::from_parts(vec![Segment::Num(font)])
    }

    pub fn bank(font: u32, bank: u32) -> Self {
        Self::from_parts(vec![Segment::Num(font), Segment::Num(bank)])
    }

    pub fn program(font: u32, bank: u32, program: u32) -> Self {
        Self::from_parts(vec![
            Segment::Num(font),
            Segment::Num(bank),
            Segment::Num(program),
        ])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn to_path(&self) -> &str {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The key one level up; the root has no parent.
    pub fn parent(&self) -> Option<PathKey> {
        if self.is_root() {
            return None;
        }
        let segments = self.segments[..self.segments.len() - 1].to_vec();
        Some(Self::from_parts(segments))
    }

    /// Walk from this key up to (and including) the root.
    pub fn ancestors(&self) -> impl Iterator<Item = PathKey> {
        std::iter::successors(Some(self.clone()), |k| k.parent())
    }

    pub fn is_ancestor_of(&self, other: &PathKey) -> bool {
        other.depth() > self.depth()
            && other
                .segments
                .iter()
                .zip(&self.segments)
                .all(|(a, b)| a.to_string() == b.to_string())
    }
}

impl PartialEq for PathKey {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for PathKey {}

impl Hash for PathKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Text(t) => f.write_str(t),
            Segment::Num(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Text(s.to_string())
    }
}

impl From<u32> for Segment {
    fn from(n: u32) -> Self {
        Segment::Num(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(segments: Vec<Option<Segment>>) -> PathKey {
        PathKey::new(segments).unwrap()
    }

    #[test]
    fn empty_key_is_root() {
        let k = key(vec![]);
        assert_eq!(k.to_path(), "/");
        assert_eq!(k.iter().count(), 0);
        assert_eq!(k, PathKey::root());
    }

    #[test]
    fn named_key() {
        let k = key(vec![Some("named".into())]);
        assert_eq!(k.to_path(), "/named");
        assert_eq!(k.iter().cloned().collect::<Vec<_>>(), vec![Segment::from("named")]);
    }

    #[test]
    fn full_depth_key() {
        let k = key(vec![
            Some("a".into()),
            Some(Segment::Num(0)),
            Some(Segment::Num(1)),
            Some(Segment::Num(32)),
        ]);
        assert_eq!(k.to_path(), "/a/0/1/32");
        assert_eq!(
            k.iter().cloned().collect::<Vec<_>>(),
            vec![Segment::from("a"), Segment::Num(0), Segment::Num(1), Segment::Num(32)]
        );
    }

    #[test]
    fn partial_keys() {
        assert_eq!(key(vec![Some("a".into()), Some(Segment::Num(0))]).to_path(), "/a/0");
        assert_eq!(
            key(vec![Some("a".into()), Some(Segment::Num(0)), Some(Segment::Num(1)), None]).to_path(),
            "/a/0/1"
        );
    }

    #[test]
    fn hole_truncates() {
        let k = key(vec![Some(Segment::Num(1)), None, Some(Segment::Num(5))]);
        assert_eq!(k.to_path(), "/1");
        assert_eq!(k.depth(), 1);
    }

    #[test]
    fn equality_follows_the_path_string() {
        assert_eq!(key(vec![Some("3".into())]), PathKey::font(3));
        assert_ne!(PathKey::font(3), PathKey::font(4));
    }

    #[test]
    fn rejects_slashes_and_depth() {
        assert_eq!(
            PathKey::new(vec![Some(Segment::from("a/b"))]),
            Err(PathKeyError::Slash("a/b".into()))
        );
        let five = (0..5).map(|n| Some(Segment::Num(n)));
        assert_eq!(
            PathKey::new(five),
            Err(PathKeyError::TooDeep { max: 4, got: 5 })
        );
    }

    #[test]
    fn rejects_empty_segments() {
        assert_eq!(
            PathKey::new(vec![Some(Segment::from(""))]),
            Err(PathKeyError::Empty)
        );
        assert_eq!(
            PathKey::new(vec![Some("a".into()), Some("".into()), Some("b".into())]),
            Err(PathKeyError::Empty)
        );
        // no other key may spell the root's path
        assert_ne!(key(vec![Some(Segment::Num(0))]), PathKey::root());
    }

    #[test]
    fn parents_and_ancestry() {
        let leaf = PathKey::program(1, 0, 32);
        assert_eq!(leaf.parent(), Some(PathKey::bank(1, 0)));
        assert_eq!(PathKey::root().parent(), None);
        assert_eq!(
            leaf.ancestors().map(|k| k.to_path().to_string()).collect::<Vec<_>>(),
            vec!["/1/0/32", "/1/0", "/1", "/"]
        );
        assert!(PathKey::font(1).is_ancestor_of(&leaf));
        assert!(PathKey::root().is_ancestor_of(&leaf));
        assert!(!PathKey::font(2).is_ancestor_of(&leaf));
        assert!(!leaf.is_ancestor_of(&leaf));
    }
}
