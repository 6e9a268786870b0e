//! Lock-step iteration over two sorted lists of key ranges.

use std::collections::VecDeque;

use crate::keyops::Key;

/// One step of a [`RangePairIter`]. Indices refer to positions in the two
/// input lists; bounds are the aligned piece being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePairItem {
    /// A piece covered only by the first list.
    InS1 { low: Key, high: Key, s1: usize },
    /// A piece covered only by the second list.
    InS2 { low: Key, high: Key, s2: usize },
    /// A piece covered by both lists.
    Overlap {
        low: Key,
        high: Key,
        s1: usize,
        s2: usize,
    },
    /// Range `s1` is about to be reported in pieces; the lower one ends just
    /// before `at`.
    BreakS1 { s1: usize, at: Key },
    /// Range `s2` is about to be reported in pieces; the lower one ends just
    /// before `at`.
    BreakS2 { s2: usize, at: Key },
}

/// Walks two sorted, non-overlapping range lists simultaneously, splitting
/// ranges wherever the other list has a boundary so that every reported
/// piece is either wholly shared or wholly owned by one side.
pub struct RangePairIter<'a> {
    s1: &'a [(Key, Key)],
    s2: &'a [(Key, Key)],
    i: usize,
    j: usize,
    cur1: Option<(Key, Key)>,
    cur2: Option<(Key, Key)>,
    pending: VecDeque<RangePairItem>,
}

impl<'a> RangePairIter<'a> {
    pub fn new(s1: &'a [(Key, Key)], s2: &'a [(Key, Key)]) -> Self {
        Self {
            s1,
            s2,
            i: 0,
            j: 0,
            cur1: None,
            cur2: None,
            pending: VecDeque::new(),
        }
    }

    fn load(&mut self) {
        if self.cur1.is_none() && self.i < self.s1.len() {
            self.cur1 = Some(self.s1[self.i]);
        }
        if self.cur2.is_none() && self.j < self.s2.len() {
            self.cur2 = Some(self.s2[self.j]);
        }
    }

    fn finish1(&mut self) {
        self.cur1 = None;
        self.i += 1;
    }

    fn finish2(&mut self) {
        self.cur2 = None;
        self.j += 1;
    }

    fn step(&mut self) -> Option<()> {
        self.load();
        let (i, j) = (self.i, self.j);

        match (self.cur1, self.cur2) {
            (None, None) => return None,
            (Some((low, high)), None) => {
                self.pending.push_back(RangePairItem::InS1 { low, high, s1: i });
                self.finish1();
            }
            (None, Some((low, high))) => {
                self.pending.push_back(RangePairItem::InS2 { low, high, s2: j });
                self.finish2();
            }
            (Some((l1, h1)), Some((l2, h2))) => {
                if h1 < l2 {
                    self.pending.push_back(RangePairItem::InS1 {
                        low: l1,
                        high: h1,
                        s1: i,
                    });
                    self.finish1();
                } else if h2 < l1 {
                    self.pending.push_back(RangePairItem::InS2 {
                        low: l2,
                        high: h2,
                        s2: j,
                    });
                    self.finish2();
                } else if l1 < l2 {
                    self.pending.extend([
                        RangePairItem::BreakS1 { s1: i, at: l2 },
                        RangePairItem::InS1 {
                            low: l1,
                            high: l2 - 1,
                            s1: i,
                        },
                    ]);
                    self.cur1 = Some((l2, h1));
                } else if l2 < l1 {
                    self.pending.extend([
                        RangePairItem::BreakS2 { s2: j, at: l1 },
                        RangePairItem::InS2 {
                            low: l2,
                            high: l1 - 1,
                            s2: j,
                        },
                    ]);
                    self.cur2 = Some((l1, h2));
                } else if h1 < h2 {
                    self.pending.extend([
                        RangePairItem::BreakS2 { s2: j, at: h1 + 1 },
                        RangePairItem::Overlap {
                            low: l1,
                            high: h1,
                            s1: i,
                            s2: j,
                        },
                    ]);
                    self.finish1();
                    self.cur2 = Some((h1 + 1, h2));
                } else if h2 < h1 {
                    self.pending.extend([
                        RangePairItem::BreakS1 { s1: i, at: h2 + 1 },
                        RangePairItem::Overlap {
                            low: l1,
                            high: h2,
                            s1: i,
                            s2: j,
                        },
                    ]);
                    self.finish2();
                    self.cur1 = Some((h2 + 1, h1));
                } else {
                    self.pending.push_back(RangePairItem::Overlap {
                        low: l1,
                        high: h1,
                        s1: i,
                        s2: j,
                    });
                    self.finish1();
                    self.finish2();
                }
            }
        }

        Some(())
    }
}

impl<'a> Iterator for RangePairIter<'a> {
    type Item = RangePairItem;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() {
            self.step()?;
        }
        self.pending.pop_front()
    }
}
