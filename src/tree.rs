//! The font → bank → instrument tree shown in the browser.
//!
//! Nodes live in an arena owned by [`InstrumentTree`]; parent and child links
//! are arena indices. A reload builds a fresh tree; the view keeps its focus
//! by [`PathKey`], never by node id.

use std::collections::{HashMap, HashSet};

use crate::error::LookupError;
use crate::fluid::{ChannelAssignment, FontRecord, InstrumentRecord, Snapshot};
use crate::pathkey::PathKey;
use crate::rangeset::RangeSet;

const ROOT_NAME: &str = "FluidSynth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Font(FontRecord),
    Bank { font_id: u32, bank: u32 },
    Instrument(InstrumentRecord),
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub key: PathKey,
    pub name: String,
    pub kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Channels bound directly to this node. Only instruments have any.
    assigned: RangeSet,
}

impl TreeNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Instrument(_))
    }

    pub fn instrument(&self) -> Option<&InstrumentRecord> {
        match &self.kind {
            NodeKind::Instrument(inst) => Some(inst),
            _ => None,
        }
    }
}

pub struct InstrumentTree {
    nodes: Vec<TreeNode>,
    index: HashMap<PathKey, NodeId>,
    lookup_errors: Vec<LookupError>,
}

/// What changed between two builds of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: Vec<PathKey>,
    pub removed: Vec<PathKey>,
    /// Present in both trees, with a different channel set.
    pub rechanneled: Vec<PathKey>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.rechanneled.is_empty()
    }
}

impl InstrumentTree {
    /// Build the tree from the three server listings. The result depends on
    /// nothing but the inputs.
    pub fn rebuild(
        fonts: &[FontRecord],
        instruments: &[InstrumentRecord],
        assignments: &[ChannelAssignment],
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            lookup_errors: Vec::new(),
        };
        let root = tree.insert(PathKey::root(), ROOT_NAME.to_string(), NodeKind::Root, None);

        for font in fonts {
            tree.insert(
                PathKey::font(font.id),
                font.name.clone(),
                NodeKind::Font(font.clone()),
                Some(root),
            );
        }

        for inst in instruments {
            let Some(font_node) = tree.id_of(&PathKey::font(inst.font_id)) else {
                log::warn!(
                    "instrument {} ({}/{}/{}) belongs to unlisted font, skipped",
                    inst.name,
                    inst.font_id,
                    inst.bank,
                    inst.program
                );
                continue;
            };
            let bank_node = tree.insert(
                PathKey::bank(inst.font_id, inst.bank),
                format!("Bank {}", inst.bank),
                NodeKind::Bank {
                    font_id: inst.font_id,
                    bank: inst.bank,
                },
                Some(font_node),
            );
            tree.insert(
                PathKey::program(inst.font_id, inst.bank, inst.program),
                format!("{:03}-{:03} {}", inst.bank, inst.program, inst.name),
                NodeKind::Instrument(inst.clone()),
                Some(bank_node),
            );
        }

        for a in assignments {
            let key = PathKey::program(a.font_id, a.bank, a.program);
            match tree.index.get(&key) {
                Some(&id) if tree.nodes[id.0].is_leaf() => {
                    tree.nodes[id.0].assigned.add(u32::from(a.channel));
                }
                _ => {
                    let err = LookupError {
                        channel: a.channel,
                        font: a.font_id,
                        bank: a.bank,
                        program: a.program,
                        name: a.name.clone(),
                    };
                    log::warn!("{err}");
                    tree.lookup_errors.push(err);
                }
            }
        }

        tree
    }

    pub fn from_snapshot(snap: &Snapshot) -> Self {
        Self::rebuild(&snap.fonts, &snap.instruments, &snap.channels)
    }

    fn insert(
        &mut self,
        key: PathKey,
        name: String,
        kind: NodeKind,
        parent: Option<NodeId>,
    ) -> NodeId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode {
            key: key.clone(),
            name,
            kind,
            parent,
            children: Vec::new(),
            assigned: RangeSet::new(),
        });
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        self.index.insert(key, id);
        id
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    pub fn id_of(&self, key: &PathKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn get(&self, key: &PathKey) -> Option<&TreeNode> {
        self.id_of(key).map(|id| self.node(id))
    }

    pub fn contains(&self, key: &PathKey) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in build order (root first).
    pub fn keys(&self) -> impl Iterator<Item = &PathKey> {
        self.nodes.iter().map(|n| &n.key)
    }

    pub fn lookup_errors(&self) -> &[LookupError] {
        &self.lookup_errors
    }

    /// Channels bound to this node: its own for an instrument, the union of
    /// its instruments' for a branch. Computed on every call.
    pub fn channels(&self, id: NodeId) -> RangeSet {
        let node = self.node(id);
        let mut out = node.assigned.clone();
        for &child in &node.children {
            out.union_with(&self.channels(child));
        }
        out
    }

    /// Node ids from the root down to `id`.
    pub fn lineage(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain: Vec<NodeId> =
            std::iter::successors(Some(id), |&n| self.node(n).parent).collect();
        chain.reverse();
        chain
    }

    /// Where a previously focused key lives now: the key itself if it
    /// survived the reload, otherwise its nearest surviving ancestor.
    pub fn relocate(&self, key: &PathKey) -> PathKey {
        key.ancestors()
            .find(|k| self.contains(k))
            .unwrap_or_else(PathKey::root)
    }

    /// Depth-first rows below the root, descending only into expanded
    /// nodes. Depth 0 is a font.
    pub fn visible(&self, expanded: &HashSet<PathKey>) -> Vec<(NodeId, usize)> {
        let mut rows = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = self
            .node(self.root())
            .children
            .iter()
            .rev()
            .map(|&c| (c, 0))
            .collect();
        while let Some((id, depth)) = stack.pop() {
            rows.push((id, depth));
            let node = self.node(id);
            if expanded.contains(&node.key) {
                stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
            }
        }
        rows
    }

    /// Compare against the tree this one replaces.
    pub fn diff(&self, old: &InstrumentTree) -> TreeDiff {
        let mut d = TreeDiff::default();
        for (i, node) in self.nodes.iter().enumerate() {
            match old.id_of(&node.key) {
                None => d.added.push(node.key.clone()),
                Some(old_id) => {
                    if self.channels(NodeId(i)) != old.channels(old_id) {
                        d.rechanneled.push(node.key.clone());
                    }
                }
            }
        }
        d.removed = old
            .keys()
            .filter(|k| !self.contains(k))
            .cloned()
            .collect();
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rangeset::Span;

    fn font(id: u32, name: &str) -> FontRecord {
        FontRecord {
            id,
            name: name.into(),
            path: format!("/sf2/{name}.sf2"),
        }
    }

    fn inst(font_id: u32, bank: u32, program: u32, name: &str) -> InstrumentRecord {
        InstrumentRecord {
            name: name.into(),
            font_id,
            bank,
            program,
        }
    }

    fn chan(channel: u8, font_id: u32, bank: u32, program: u32) -> ChannelAssignment {
        ChannelAssignment {
            channel,
            name: "whatever".into(),
            font_id,
            bank,
            program,
        }
    }

    fn sample() -> (Vec<FontRecord>, Vec<InstrumentRecord>, Vec<ChannelAssignment>) {
        let fonts = vec![font(1, "FluidR3_GM"), font(2, "TimGM6mb")];
        let insts = vec![
            inst(1, 0, 0, "Yamaha Grand Piano"),
            inst(1, 0, 32, "Acoustic Bass"),
            inst(1, 128, 0, "Standard"),
            inst(2, 0, 1, "Bright Piano"),
        ];
        let chans = vec![chan(0, 1, 0, 0), chan(1, 1, 0, 32), chan(2, 1, 0, 32), chan(9, 1, 128, 0)];
        (fonts, insts, chans)
    }

    fn build() -> InstrumentTree {
        let (f, i, c) = sample();
        InstrumentTree::rebuild(&f, &i, &c)
    }

    #[test]
    fn three_levels_under_root() {
        let tree = build();
        // root + 2 fonts + 3 banks + 4 instruments
        assert_eq!(tree.len(), 10);
        assert_eq!(tree.node(tree.root()).key.to_path(), "/");

        let leaf = tree.get(&PathKey::program(1, 0, 32)).unwrap();
        assert_eq!(leaf.name, "000-032 Acoustic Bass");
        let bank = tree.node(leaf.parent().unwrap());
        assert_eq!(bank.key, PathKey::bank(1, 0));
        assert_eq!(bank.name, "Bank 0");
        let font = tree.node(bank.parent().unwrap());
        assert_eq!(font.name, "FluidR3_GM");
        assert_eq!(font.parent(), Some(tree.root()));
    }

    #[test]
    fn leaves_carry_their_channels() {
        let tree = build();
        let bass = tree.id_of(&PathKey::program(1, 0, 32)).unwrap();
        assert_eq!(tree.channels(bass).ranges(), vec![Span::Run(1, 2)]);
        let bright = tree.id_of(&PathKey::program(2, 0, 1)).unwrap();
        assert!(tree.channels(bright).is_empty());
    }

    #[test]
    fn branches_union_their_leaves() {
        let tree = build();
        let gm = tree.id_of(&PathKey::font(1)).unwrap();
        assert_eq!(tree.channels(gm).to_string(), "0-2,9");
        assert_eq!(tree.channels(tree.root()).to_string(), "0-2,9");
        let bank0 = tree.id_of(&PathKey::bank(1, 0)).unwrap();
        assert_eq!(tree.channels(bank0).to_string(), "0-2");
    }

    #[test]
    fn rebuild_is_deterministic() {
        let a = build();
        let b = build();
        assert_eq!(a.keys().collect::<Vec<_>>(), b.keys().collect::<Vec<_>>());
        for key in a.keys() {
            let (ia, ib) = (a.id_of(key).unwrap(), b.id_of(key).unwrap());
            assert_eq!(a.channels(ia), b.channels(ib));
        }
        assert!(b.diff(&a).is_empty());
    }

    #[test]
    fn unknown_instrument_assignment_is_reported_not_fatal() {
        let (f, i, mut c) = sample();
        c.push(chan(5, 1, 8, 4));
        let tree = InstrumentTree::rebuild(&f, &i, &c);
        assert_eq!(tree.lookup_errors().len(), 1);
        let err = &tree.lookup_errors()[0];
        assert_eq!((err.channel, err.font, err.bank, err.program), (5, 1, 8, 4));
        // everything else still landed
        assert_eq!(tree.channels(tree.root()).to_string(), "0-2,9");
    }

    #[test]
    fn instruments_of_unlisted_fonts_are_skipped() {
        let (f, mut i, c) = sample();
        i.push(inst(7, 0, 0, "Orphan"));
        let tree = InstrumentTree::rebuild(&f, &i, &c);
        assert!(!tree.contains(&PathKey::font(7)));
        assert!(!tree.contains(&PathKey::program(7, 0, 0)));
    }

    #[test]
    fn lineage_walks_parent_links() {
        let tree = build();
        let leaf = tree.id_of(&PathKey::program(1, 128, 0)).unwrap();
        let paths: Vec<_> = tree
            .lineage(leaf)
            .into_iter()
            .map(|id| tree.node(id).key.to_path().to_string())
            .collect();
        assert_eq!(paths, vec!["/", "/1", "/1/128", "/1/128/0"]);
    }

    #[test]
    fn relocate_falls_back_to_ancestor() {
        let tree = build();
        let kept = PathKey::program(1, 0, 32);
        assert_eq!(tree.relocate(&kept), kept);
        assert_eq!(tree.relocate(&PathKey::program(1, 0, 99)), PathKey::bank(1, 0));
        assert_eq!(tree.relocate(&PathKey::program(5, 0, 0)), PathKey::root());
    }

    #[test]
    fn visible_rows_follow_expansion() {
        let tree = build();
        let mut expanded = HashSet::new();
        let names = |rows: Vec<(NodeId, usize)>| {
            rows.into_iter()
                .map(|(id, depth)| (tree.node(id).key.to_path().to_string(), depth))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            names(tree.visible(&expanded)),
            vec![("/1".to_string(), 0), ("/2".to_string(), 0)]
        );

        expanded.insert(PathKey::font(1));
        expanded.insert(PathKey::bank(1, 0));
        assert_eq!(
            names(tree.visible(&expanded)),
            vec![
                ("/1".to_string(), 0),
                ("/1/0".to_string(), 1),
                ("/1/0/0".to_string(), 2),
                ("/1/0/32".to_string(), 2),
                ("/1/128".to_string(), 1),
                ("/2".to_string(), 0),
            ]
        );
    }

    #[test]
    fn diff_reports_changes() {
        let (f, i, c) = sample();
        let old = InstrumentTree::rebuild(&f, &i, &c);

        let mut i2 = i.clone();
        i2.retain(|x| x.font_id != 2);
        i2.push(inst(1, 0, 48, "Strings"));
        let mut c2 = c.clone();
        c2.retain(|a| a.channel != 2);
        c2.push(chan(2, 1, 0, 48));
        let new = InstrumentTree::rebuild(&f, &i2, &c2);

        let d = new.diff(&old);
        assert_eq!(d.added, vec![PathKey::program(1, 0, 48)]);
        assert_eq!(d.removed, vec![PathKey::bank(2, 0), PathKey::program(2, 0, 1)]);
        assert!(d.rechanneled.contains(&PathKey::program(1, 0, 32)));
        assert!(!d.rechanneled.contains(&PathKey::bank(1, 0)));
    }
}
