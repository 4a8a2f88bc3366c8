use std::collections::BTreeSet;
use std::fmt;

/// A set of small non-negative integers (MIDI channels, mostly) that displays
/// itself as compressed runs: `{1,2,3,6}` shows as `1-3,6`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    members: BTreeSet<u32>,
}

/// One maximal run of consecutive members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    Single(u32),
    Run(u32, u32),
}

impl Span {
    pub fn low(&self) -> u32 {
        match *self {
            Span::Single(v) | Span::Run(v, _) => v,
        }
    }

    pub fn high(&self) -> u32 {
        match *self {
            Span::Single(v) | Span::Run(_, v) => v,
        }
    }
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: u32) {
        self.members.insert(value);
    }

    pub fn contains(&self, value: u32) -> bool {
        self.members.contains(&value)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.members.iter().copied()
    }

    /// Merge another set into this one.
    pub fn union_with(&mut self, other: &RangeSet) {
        self.members.extend(other.members.iter().copied());
    }

    /// Sorted, disjoint, maximal runs covering exactly the members.
    pub fn ranges(&self) -> Vec<Span> {
        let mut out = Vec::new();
        let mut members = self.members.iter().copied();
        let Some(first) = members.next() else {
            return out;
        };

        let (mut low, mut high) = (first, first);
        for v in members {
            if high.checked_add(1) == Some(v) {
                high = v;
                continue;
            }
            out.push(close(low, high));
            low = v;
            high = v;
        }
        out.push(close(low, high));
        out
    }
}

fn close(low: u32, high: u32) -> Span {
    if low == high {
        Span::Single(low)
    } else {
        Span::Run(low, high)
    }
}

impl FromIterator<u32> for RangeSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

impl Extend<u32> for RangeSet {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        self.members.extend(iter);
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Span::Single(v) => write!(f, "{v}"),
            Span::Run(lo, hi) => write!(f, "{lo}-{hi}"),
        }
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, span) in self.ranges().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{span}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Span::{Run, Single};

    fn set(values: &[u32]) -> RangeSet {
        values.iter().copied().collect()
    }

    #[test]
    fn single_run() {
        assert_eq!(set(&[1, 2, 3]).ranges(), vec![Run(1, 3)]);
    }

    #[test]
    fn mixed_runs_and_singles() {
        assert_eq!(
            set(&[1, 2, 3, 6, 9, 10, 12]).ranges(),
            vec![Run(1, 3), Single(6), Run(9, 10), Single(12)]
        );
        assert_eq!(set(&[1, 2, 3, 9, 10]).ranges(), vec![Run(1, 3), Run(9, 10)]);
    }

    #[test]
    fn empty_set_has_no_ranges() {
        assert!(RangeSet::new().ranges().is_empty());
        assert_eq!(RangeSet::new().to_string(), "");
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut rs = RangeSet::new();
        for v in [12, 0, 10, 1, 9, 2] {
            rs.add(v);
        }
        rs.add(1);
        assert_eq!(rs.len(), 6);
        assert_eq!(rs.ranges(), vec![Run(0, 2), Run(9, 10), Single(12)]);
    }

    #[test]
    fn ranges_cover_members_exactly() {
        let values = [0, 3, 4, 5, 7, 8, 15, 14, 11];
        let rs = set(&values);
        let ranges = rs.ranges();

        let mut covered = Vec::new();
        for span in &ranges {
            assert!(span.low() <= span.high());
            covered.extend(span.low()..=span.high());
        }
        let mut expected = values.to_vec();
        expected.sort();
        assert_eq!(covered, expected);

        for pair in ranges.windows(2) {
            // disjoint and not adjacent, otherwise they would have merged
            assert!(pair[0].high() + 1 < pair[1].low());
        }
    }

    #[test]
    fn display_compresses_runs() {
        assert_eq!(set(&[1, 2, 3, 6, 9, 10, 12]).to_string(), "1-3,6,9-10,12");
    }

    #[test]
    fn union_merges_runs() {
        let mut a = set(&[1, 2]);
        a.union_with(&set(&[3, 7]));
        assert_eq!(a.ranges(), vec![Run(1, 3), Single(7)]);
    }
}
