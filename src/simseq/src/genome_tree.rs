use alphabet::{State, STATE_UNKNOWN};

use crate::insertion::InsertionList;

/// Run classification within a [`GenomeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    /// Maps `[orig_lo, orig_lo + len)` of the frozen sequence onto the run.
    Mapped { orig_lo: usize },
    /// Columns opened by the insertion event with this list index.
    Gap { insertion: usize },
}

/// One run of the partition of `[0, new_length)`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GenomeSegment {
    new_lo: usize,
    len: usize,
    kind: SegmentKind,
}

/// Coordinate translator between a frozen sequence and the extended
/// alignment produced by insertions recorded after its freeze point.
///
/// The segments partition the extended coordinate range into runs that
/// either copy a span of the frozen sequence or emit gap columns. The
/// freeze point moves forward one event at a time with [`advance`], and the
/// structure is rebuilt from scratch periodically to compact the
/// accumulated splits.
///
/// [`advance`]: GenomeTree::advance
#[derive(Debug, Clone)]
pub struct GenomeTree {
    segments: Vec<GenomeSegment>,
    base_length: usize,
    new_length: usize,
}

impl GenomeTree {
    /// Identity mapping over `[0, base_length)`.
    pub fn identity(base_length: usize) -> Self {
        let segments = match base_length {
            0 => Vec::new(),
            _ => vec![GenomeSegment { new_lo: 0, len: base_length, kind: SegmentKind::Mapped { orig_lo: 0 } }],
        };
        Self { segments, base_length, new_length: base_length }
    }

    /// Replay events `[start, list.end())` on top of a frozen sequence of
    /// `base_length` sites.
    pub fn build(list: &InsertionList, start: usize, base_length: usize) -> Self {
        let mut tree = Self::identity(base_length);
        for idx in start..list.end() {
            let event = list.get(idx);
            tree.apply_insertion(idx, event.position, event.length);
        }
        tree
    }

    /// Length of the extended coordinate range.
    pub fn new_length(&self) -> usize { self.new_length }

    /// Length of the frozen sequence this tree currently translates.
    pub fn base_length(&self) -> usize { self.base_length }

    /// Splice the gap run of one insertion event into the partition.
    ///
    /// `position` is expressed in the coordinates current at event time;
    /// when events are replayed in list order these coincide with the
    /// extended coordinates built so far.
    fn apply_insertion(&mut self, idx: usize, position: usize, length: usize) {
        debug_assert!(position <= self.new_length);
        // Locate the first segment at or after `position`, splitting the
        // segment that spans it.
        let split_at = match self.segments.iter().position(|s| s.new_lo + s.len > position) {
            None => self.segments.len(), // tail append
            Some(i) => {
                let seg = &self.segments[i];
                match position > seg.new_lo {
                    false => i,
                    true => {
                        let head_len = position - seg.new_lo;
                        let tail = GenomeSegment {
                            new_lo: position,
                            len: seg.len - head_len,
                            kind: match seg.kind {
                                SegmentKind::Mapped { orig_lo } =>
                                    SegmentKind::Mapped { orig_lo: orig_lo + head_len },
                                gap => gap,
                            },
                        };
                        self.segments[i].len = head_len;
                        self.segments.insert(i + 1, tail);
                        i + 1
                    }
                }
            }
        };

        self.segments.insert(split_at, GenomeSegment {
            new_lo: position,
            len: length,
            kind: SegmentKind::Gap { insertion: idx },
        });
        for seg in &mut self.segments[split_at + 1..] {
            seg.new_lo += length;
        }
        self.new_length += length;
    }

    /// Move the freeze point past insertion `idx`: its gap runs become
    /// mapped runs of the (longer) frozen sequence, and the original
    /// coordinates of everything at or after its position shift.
    pub fn advance(&mut self, list: &InsertionList, idx: usize) {
        let event = list.get(idx);
        let (position, length) = (event.position, event.length);

        for seg in &mut self.segments {
            match seg.kind {
                SegmentKind::Mapped { ref mut orig_lo } if *orig_lo >= position => {
                    *orig_lo += length;
                },
                _ => {},
            }
        }
        // The gap runs of `idx` appear in extended-coordinate order; they
        // reassemble the inserted span `[position, position + length)`.
        let mut assigned = position;
        for seg in &mut self.segments {
            if seg.kind == (SegmentKind::Gap { insertion: idx }) {
                seg.kind = SegmentKind::Mapped { orig_lo: assigned };
                assigned += seg.len;
            }
        }
        debug_assert_eq!(assigned, position + length);
        self.base_length += length;
    }

    /// Translate a frozen sequence into the extended coordinates: mapped
    /// runs copy their span, gap runs emit `UNKNOWN`. The output length
    /// always equals [`new_length`](GenomeTree::new_length).
    pub fn export(&self, old_seq: &[State]) -> Vec<State> {
        debug_assert_eq!(old_seq.len(), self.base_length);
        let mut out = Vec::with_capacity(self.new_length);
        for seg in &self.segments {
            match seg.kind {
                SegmentKind::Mapped { orig_lo } =>
                    out.extend_from_slice(&old_seq[orig_lo..orig_lo + seg.len]),
                SegmentKind::Gap { .. } =>
                    out.resize(out.len() + seg.len, STATE_UNKNOWN),
            }
        }
        debug_assert_eq!(out.len(), self.new_length);
        out
    }

    /// Number of gap columns currently represented.
    pub fn num_gap_columns(&self) -> usize {
        self.new_length - self.base_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(states: &[u32]) -> Vec<State> { states.to_vec() }

    const U: State = STATE_UNKNOWN;

    #[test]
    fn identity_export_round_trips() {
        let list = InsertionList::new();
        let tree = GenomeTree::build(&list, 1, 5);
        let original = seq(&[0, 1, 2, 3, 0]);
        assert_eq!(tree.export(&original), original);
        assert_eq!(tree.new_length(), 5);
        assert_eq!(tree.num_gap_columns(), 0);
    }

    #[test]
    fn single_insertion_opens_gaps() {
        let mut list = InsertionList::new();
        list.push(2, 3, false);

        let tree = GenomeTree::build(&list, 1, 4);
        assert_eq!(tree.new_length(), 7);
        assert_eq!(tree.export(&seq(&[0, 1, 2, 3])), seq(&[0, 1, U, U, U, 2, 3]));
    }

    #[test]
    fn appended_insertion_pads_the_tail() {
        let mut list = InsertionList::new();
        list.push(4, 2, true);

        let tree = GenomeTree::build(&list, 1, 4);
        assert_eq!(tree.export(&seq(&[0, 1, 2, 3])), seq(&[0, 1, 2, 3, U, U]));
    }

    #[test]
    fn nested_insertions_compose() {
        let mut list = InsertionList::new();
        // First event: 2 sites before position 1 (coords of length 3).
        list.push(1, 2, false);
        // Second event: 1 site at position 2, which lands inside the span
        // opened by the first event (coords of length 5).
        list.push(2, 1, false);

        let tree = GenomeTree::build(&list, 1, 3);
        assert_eq!(tree.new_length(), 6);
        assert_eq!(tree.export(&seq(&[5, 6, 7])), seq(&[5, U, U, U, 6, 7]));
    }

    #[test]
    fn advance_flips_one_event_at_a_time() {
        let mut list = InsertionList::new();
        list.push(1, 2, false); // event 1, on a base of 3
        list.push(4, 1, true);  // event 2, appended at length 5

        // Frozen before event 1: both events are gaps.
        let mut tree = GenomeTree::build(&list, 1, 3);
        assert_eq!(tree.export(&seq(&[5, 6, 7])), seq(&[5, U, U, 6, 7, U]));

        // Frozen between events 1 and 2: only event 2 remains a gap.
        tree.advance(&list, 1);
        assert_eq!(tree.base_length(), 5);
        assert_eq!(tree.export(&seq(&[5, 8, 9, 6, 7])), seq(&[5, 8, 9, 6, 7, U]));

        // Frozen after both: identity.
        tree.advance(&list, 2);
        let full = seq(&[5, 8, 9, 6, 7, 3]);
        assert_eq!(tree.export(&full), full);
        assert_eq!(tree.num_gap_columns(), 0);
    }

    #[test]
    fn advance_matches_rebuild() {
        // Advancing the freeze point one event must agree with rebuilding
        // from the next event.
        let mut list = InsertionList::new();
        list.push(2, 2, false);  // base 4 -> 6
        list.push(1, 3, false);  // 6 -> 9
        list.push(9, 2, true);   // 9 -> 11

        let mut advanced = GenomeTree::build(&list, 1, 4);
        advanced.advance(&list, 1);
        let rebuilt = GenomeTree::build(&list, 2, 6);

        let frozen = seq(&[0, 1, 2, 3, 0, 1]);
        assert_eq!(advanced.export(&frozen), rebuilt.export(&frozen));
        assert_eq!(advanced.new_length(), rebuilt.new_length());
    }

    #[test]
    fn splitting_an_earlier_gap_run() {
        let mut list = InsertionList::new();
        list.push(1, 4, false); // base 2 -> 6: [s0, g g g g, s1]
        list.push(3, 1, false); // lands inside the first gap run

        let mut tree = GenomeTree::build(&list, 1, 2);
        assert_eq!(tree.export(&seq(&[8, 9])), seq(&[8, U, U, U, U, U, 9]));

        // After advancing past event 1, its two fragments map contiguous
        // original coordinates around the still-gapped event 2.
        tree.advance(&list, 1);
        assert_eq!(tree.export(&seq(&[8, 0, 1, 2, 3, 9])), seq(&[8, 0, 1, U, 2, 3, 9]));
    }
}
