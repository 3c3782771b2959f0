use bytes::Bytes;
use parking_lot::RwLock;

use super::CampaignId;

/// The last campaign known to be active together with its artifact.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub campaign_id: CampaignId,
    pub artifact: Bytes,
}

/// Single-slot, process-local view of the active campaign.
///
/// The slot is a best-effort accelerator; the store stays authoritative and
/// readers re-validate what they find here. The id and artifact live behind
/// one lock so a reader never sees halves of two different writes. The lock
/// is never held across an await point.
#[derive(Debug, Default)]
pub struct ActiveArtifactCache {
    slot: RwLock<Option<CacheEntry>>,
}

impl ActiveArtifactCache {
    pub fn new() -> ActiveArtifactCache {
        ActiveArtifactCache::default()
    }

    pub fn get(&self) -> Option<CacheEntry> {
        self.slot.read().clone()
    }

    pub fn set(&self, campaign_id: CampaignId, artifact: Bytes) {
        *self.slot.write() = Some(CacheEntry {
            campaign_id,
            artifact,
        });
    }

    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    /// Empties the slot only if it still refers to `campaign_id`. Returns
    /// whether anything was removed.
    pub fn clear_if(&self, campaign_id: CampaignId) -> bool {
        let mut slot = self.slot.write();
        match &*slot {
            Some(entry) if entry.campaign_id == campaign_id => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}
