use crate::storage::models::{MediaId, PotentialPair};
use crate::storage::Database;

/// Walks `potential_pairs` in key order, one fixed-size fragment at a time, so the whole
/// table can be processed without holding it in memory.
pub struct PairBlocks<'db> {
    db: &'db Database,
    after: (MediaId, MediaId),
    max_distance: u32,
    block_size: usize,
    exhausted: bool,
}

impl<'db> PairBlocks<'db> {
    pub fn new(db: &'db Database, max_distance: u32, block_size: usize) -> Self {
        PairBlocks {
            db,
            after: (MediaId(i64::MIN), MediaId(i64::MIN)),
            max_distance,
            block_size: block_size.max(1),
            exhausted: false,
        }
    }
}

impl<'db> Iterator for PairBlocks<'db> {
    type Item = rusqlite::Result<Vec<PotentialPair>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let block = match self
            .db
            .potential_pairs_after(self.after, self.max_distance, self.block_size)
        {
            Ok(block) => block,
            Err(e) => {
                self.exhausted = true;
                return Some(Err(e));
            }
        };
        if block.len() < self.block_size {
            self.exhausted = true;
        }
        match block.last() {
            Some(last) => {
                self.after = last.key();
                Some(Ok(block))
            }
            None => None,
        }
    }
}
