use crate::storage::models::*;
use crate::storage::Database;
use rusqlite::{params, Result};
use tracing::{debug, info};

impl Database {
    /// Fold `mergee` into `superior`. Every member file moves over, the alternates and
    /// false-positive bookkeeping is reconciled under `superior`, and the mergee row is
    /// deleted. The superior keeps its king.
    pub fn merge_media(&self, superior: MediaId, mergee: MediaId) -> Result<()> {
        if superior == mergee {
            return Ok(());
        }
        self.in_transaction(|| {
            self.delete_potential_pair(superior, mergee)?;

            let superior_group = self.alternates_group_for_media(superior)?;
            let mergee_group = self.alternates_group_for_media(mergee)?;
            let same_group = matches!(
                (superior_group, mergee_group),
                (Some(a), Some(b)) if a == b
            );
            if !same_group {
                if let (Some(a), Some(b)) = (superior_group, mergee_group) {
                    // the merge overrides the earlier verdict
                    if self.groups_are_false_positive(a, b)? {
                        self.delete_false_positive(a, b)?;
                    }
                }
                // alternates bookkeeping must see both media before the members move
                self.set_alternates(superior, mergee)?;
            }

            self.connection().execute(
                "UPDATE media_member SET media_id = ?1 WHERE media_id = ?2",
                params![superior, mergee],
            )?;
            self.delete_potential_pair(superior, mergee)?;

            let rehomed: Vec<(MediaId, u32)> = self
                .potential_pairs_for_media(mergee)?
                .into_iter()
                .filter_map(|pair| pair.partner_of(mergee).map(|other| (other, pair.distance)))
                .collect();
            self.delete_potential_pairs_for_media(mergee)?;
            self.add_potential_pairs(superior, &rehomed)?;

            self.delete_confirmed_alternates(superior, mergee)?;
            for partner in self.confirmed_alternate_partners(mergee)? {
                self.delete_confirmed_alternates(mergee, partner)?;
                if partner != superior {
                    self.insert_confirmed_alternates(superior, partner)?;
                }
            }
            for partner in self.confirmed_alternate_partners(superior)? {
                self.delete_potential_pair(superior, partner)?;
            }

            self.remove_alternate_member(mergee)?;
            self.connection()
                .execute("DELETE FROM media WHERE media_id = ?1", params![mergee])?;

            debug!("Merged media {} into {}", mergee, superior);
            Ok(())
        })
    }

    /// Break a media apart. Its files become ungrouped and are queued for a fresh similarity
    /// search; the next lookup of any of them creates a new media id.
    pub fn dissolve_media(&self, media_id: MediaId) -> Result<()> {
        self.in_transaction(|| {
            let members = self.media_members(media_id)?;
            self.remove_alternate_member(media_id)?;
            self.delete_potential_pairs_for_media(media_id)?;
            self.connection().execute(
                "DELETE FROM media_member WHERE media_id = ?1",
                params![media_id],
            )?;
            self.connection()
                .execute("DELETE FROM media WHERE media_id = ?1", params![media_id])?;
            self.reset_search_cache(&members)?;
            info!("Dissolved media {} ({} files)", media_id, members.len());
            Ok(())
        })
    }
}
