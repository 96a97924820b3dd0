use std::collections::{BTreeMap, BTreeSet};

use sysinfo::System;

/// Parent/child snapshot of the process table.
#[derive(Debug, Default, Clone)]
pub struct ProcessTree {
    parents: BTreeMap<u32, u32>,
    children: BTreeMap<u32, Vec<u32>>,
}

impl ProcessTree {
    pub fn snapshot() -> Self {
        let mut system = System::new();
        system.refresh_processes();
        Self::from_system(&system)
    }

    pub fn from_system(system: &System) -> Self {
        Self::from_pairs(
            system
                .processes()
                .iter()
                .map(|(pid, p)| (pid.as_u32(), p.parent().map(|pp| pp.as_u32()))),
        )
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, Option<u32>)>) -> Self {
        let mut tree = Self::default();
        for (pid, parent) in pairs {
            if let Some(parent) = parent.filter(|pp| *pp != pid) {
                tree.parents.insert(pid, parent);
                tree.children.entry(parent).or_default().push(pid);
            }
        }
        for kids in tree.children.values_mut() {
            kids.sort_unstable();
        }
        tree
    }

    /// All descendants of `root`, deepest first, `root` excluded.
    pub fn descendants(&self, root: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::from([root]);
        self.post_order(root, &mut seen, &mut out);
        out
    }

    fn post_order(&self, pid: u32, seen: &mut BTreeSet<u32>, out: &mut Vec<u32>) {
        for &child in self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[]) {
            // Guards against PID reuse producing a cycle in a racy snapshot.
            if seen.insert(child) {
                self.post_order(child, seen, out);
                out.push(child);
            }
        }
    }

    /// `root` plus every descendant.
    pub fn subtree(&self, root: u32) -> BTreeSet<u32> {
        let mut set: BTreeSet<u32> = self.descendants(root).into_iter().collect();
        set.insert(root);
        set
    }

    /// Parent chain of `pid`, nearest first.
    pub fn ancestors(&self, pid: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut current = pid;
        while let Some(&parent) = self.parents.get(&current) {
            if parent == pid || out.contains(&parent) {
                break;
            }
            out.push(parent);
            current = parent;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    //   1
    //   └─ 10
    //      ├─ 20
    //      │  └─ 30
    //      └─ 21
    fn sample() -> ProcessTree {
        ProcessTree::from_pairs([
            (1, None),
            (10, Some(1)),
            (20, Some(10)),
            (21, Some(10)),
            (30, Some(20)),
            (99, Some(1)),
        ])
    }

    #[test]
    fn descendants_are_deepest_first() {
        let d = sample().descendants(10);
        assert_eq!(d.len(), 3);
        let pos = |p| d.iter().position(|x| *x == p).unwrap();
        assert!(pos(30) < pos(20), "grandchild before child: {:?}", d);
        assert!(!d.contains(&10));
        assert!(!d.contains(&99));
    }

    #[test]
    fn leaf_has_no_descendants() {
        assert!(sample().descendants(30).is_empty());
        assert!(sample().descendants(12345).is_empty());
    }

    #[test]
    fn subtree_includes_root() {
        assert_eq!(sample().subtree(20), BTreeSet::from([20, 30]));
    }

    #[test]
    fn ancestors_walk_up() {
        assert_eq!(sample().ancestors(30), vec![20, 10, 1]);
        assert!(sample().ancestors(1).is_empty());
    }

    #[test]
    fn cycles_do_not_loop() {
        let tree = ProcessTree::from_pairs([(5, Some(6)), (6, Some(5))]);
        assert_eq!(tree.descendants(5), vec![6]);
        assert_eq!(tree.ancestors(5), vec![6]);
    }

    #[cfg(unix)]
    #[test]
    fn live_snapshot_sees_own_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let tree = ProcessTree::snapshot();
        let found = tree.descendants(std::process::id()).contains(&child.id());
        child.kill().unwrap();
        child.wait().unwrap();
        assert!(found);
    }
}
