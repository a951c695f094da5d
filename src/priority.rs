//! The stream priority dependency tree (RFC 7540 Section 5.3).
//!
//! Edges live on the streams themselves (`parent` id plus a `dependees` id
//! set); this module owns the re-parenting rules. The graph is a tree rooted
//! at stream 0: every operation here preserves acyclicity and the
//! one-parent-per-stream invariant.

use crate::error::H2Error;
use crate::stream::StreamMap;

impl StreamMap {
    /// True if `candidate` appears on the parent chain starting above `id`.
    fn is_ancestor(&self, candidate: u32, id: u32) -> bool {
        let mut current = id;
        while current != 0 {
            let parent = self.get(current).map_or(0, |s| s.parent);
            if parent == candidate {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Detach `id` from its current parent's dependee set.
    fn detach(&mut self, id: u32) {
        let parent = self.get(id).map_or(0, |s| s.parent);
        if let Some(p) = self.get_mut(parent) {
            p.dependees.remove(&id);
        }
    }

    /// Make `child` depend on `parent` (RFC 7540 Section 5.3.1, 5.3.3).
    ///
    /// If `parent` is currently a descendant of `child`, it is first moved up
    /// to depend on `child`'s own parent, non-exclusively, so the edge cannot
    /// close a cycle. With `exclusive`, every existing dependee of `parent`
    /// is re-parented onto `child`.
    pub(crate) fn reprioritize(
        &mut self,
        child: u32,
        parent: u32,
        exclusive: bool,
    ) -> Result<(), H2Error> {
        if child == 0 {
            return Err(H2Error::protocol("stream 0 cannot be a dependent"));
        }
        if child == parent {
            return Err(H2Error::protocol("stream cannot depend on itself"));
        }
        if !self.contains(child) || !self.contains(parent) {
            return Err(H2Error::internal("priority edge names an unknown stream"));
        }

        if self.is_ancestor(child, parent) {
            let grandparent = self.get(child).map_or(0, |s| s.parent);
            self.detach(parent);
            self.require_mut(parent)?.parent = grandparent;
            self.require_mut(grandparent)?.dependees.insert(parent);
        }

        self.detach(child);
        self.require_mut(child)?.parent = parent;

        if exclusive {
            let moved = std::mem::take(&mut self.require_mut(parent)?.dependees);
            for id in &moved {
                if let Some(dependee) = self.get_mut(*id) {
                    dependee.parent = child;
                }
            }
            self.require_mut(child)?.dependees.extend(moved);
        }
        self.require_mut(parent)?.dependees.insert(child);
        Ok(())
    }
}
