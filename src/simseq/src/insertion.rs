/// One recorded insertion event. Positions are expressed in the alignment
/// coordinates that were current when the event happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub position: usize,
    pub length: usize,
    /// True iff the insertion extended the tail of the sequence.
    pub appended: bool,
    /// Leaves that stopped evolving between this event and the next.
    pub phylo_nodes: Vec<usize>,
}

/// Append-only list of insertion events, headed by a zero-length sentinel.
///
/// Leaves attach to the current tail when they finalize; the reconciliation
/// pass later walks the list in order to pad each frozen leaf with the gap
/// columns opened by every later insertion.
#[derive(Debug, Clone)]
pub struct InsertionList {
    items: Vec<Insertion>,
}

impl Default for InsertionList {
    fn default() -> Self { Self::new() }
}

impl InsertionList {
    pub fn new() -> Self {
        let sentinel = Insertion { position: 0, length: 0, appended: false, phylo_nodes: Vec::new() };
        Self { items: vec![sentinel] }
    }

    /// Number of real insertion events (the sentinel does not count).
    pub fn num_events(&self) -> usize { self.items.len() - 1 }

    pub fn is_empty(&self) -> bool { self.num_events() == 0 }

    /// Index one past the last event; `build`/`advance` ranges are
    /// `[start, end())`.
    pub fn end(&self) -> usize { self.items.len() }

    pub fn tail(&self) -> usize { self.items.len() - 1 }

    pub fn get(&self, idx: usize) -> &Insertion { &self.items[idx] }

    /// Record a new event at the tail and return its index.
    pub fn push(&mut self, position: usize, length: usize, appended: bool) -> usize {
        self.items.push(Insertion { position, length, appended, phylo_nodes: Vec::new() });
        self.items.len() - 1
    }

    /// Attach a finalized leaf to the tail event.
    pub fn attach_leaf(&mut self, node: usize) -> usize {
        let tail = self.tail();
        self.items[tail].phylo_nodes.push(node);
        tail
    }

    /// Detach and return the leaves frozen at `idx`.
    pub fn take_leaves(&mut self, idx: usize) -> Vec<usize> {
        std::mem::take(&mut self.items[idx].phylo_nodes)
    }

    /// Total number of sites contributed by events in `[start, end)`.
    pub fn inserted_length(&self, start: usize, end: usize) -> usize {
        self.items[start..end].iter().map(|i| i.length).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_head() {
        let list = InsertionList::new();
        assert_eq!(list.num_events(), 0);
        assert!(list.is_empty());
        assert_eq!(list.get(0).length, 0);
        assert_eq!(list.tail(), 0);
    }

    #[test]
    fn push_is_append_only() {
        let mut list = InsertionList::new();
        let first = list.push(3, 2, false);
        let second = list.push(10, 1, true);
        assert_eq!((first, second), (1, 2));
        assert_eq!(list.num_events(), 2);
        assert_eq!(list.tail(), 2);
        assert_eq!(list.inserted_length(1, list.end()), 3);
    }

    #[test]
    fn leaves_attach_to_the_tail() {
        let mut list = InsertionList::new();
        list.attach_leaf(7);
        list.push(0, 4, false);
        list.attach_leaf(8);
        list.attach_leaf(9);

        assert_eq!(list.get(0).phylo_nodes, vec![7]);
        assert_eq!(list.get(1).phylo_nodes, vec![8, 9]);
        assert_eq!(list.take_leaves(1), vec![8, 9]);
        assert!(list.get(1).phylo_nodes.is_empty());
    }
}
