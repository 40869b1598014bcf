//! Best-checkpoint selection across meta-epochs.
//!
//! After every meta-epoch the current discriminator is evaluated on a
//! held-out set; the parameter snapshot with the best evaluation triple is
//! retained and only that final snapshot is persisted when training ends.

use log::info;

use crate::checkpoint::CheckpointRecord;
use crate::discriminator::{Discriminator, Projection};

/// Best-so-far evaluation triple.
///
/// Ordering is lexicographic and strict: a strictly higher image AUROC wins;
/// on a tie, a strictly higher pixel AUROC wins and the PRO score follows it
/// (PRO never gates selection on its own). `pro_score` is -1.0 when the
/// held-out set carries no ground-truth masks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestRecord {
    pub image_auroc: f32,
    pub pixel_auroc: f32,
    pub pro_score: f32,
}

/// Tracks the best evaluation triple and the matching parameter snapshot.
pub struct CheckpointSelector {
    best: Option<BestRecord>,
    snapshot: Option<CheckpointRecord>,
}

impl CheckpointSelector {
    pub fn new() -> Self {
        Self {
            best: None,
            snapshot: None,
        }
    }

    /// Offer one meta-epoch's evaluation triple.
    ///
    /// When the triple wins under the selection ordering, the discriminator
    /// (and projection, when enabled) parameters are snapshotted. Returns
    /// whether the snapshot was refreshed.
    pub fn observe(
        &mut self,
        eval: BestRecord,
        discriminator: &Discriminator,
        projection: Option<&Projection>,
    ) -> bool {
        let selected = match &mut self.best {
            None => {
                self.best = Some(eval);
                true
            }
            Some(best) => {
                if eval.image_auroc > best.image_auroc {
                    *best = eval;
                    true
                } else if eval.image_auroc == best.image_auroc
                    && eval.pixel_auroc > best.pixel_auroc
                {
                    // image AUROC tied: pixel AUROC decides, PRO follows
                    best.pixel_auroc = eval.pixel_auroc;
                    best.pro_score = eval.pro_score;
                    true
                } else {
                    false
                }
            }
        };

        if selected {
            self.snapshot = Some(CheckpointRecord {
                discriminator: discriminator.state_dict(),
                pre_projection: projection.map(|p| p.state_dict()),
            });
            info!(
                "new best record: image {:.4} pixel {:.4} pro {:.4}",
                self.best.unwrap().image_auroc,
                self.best.unwrap().pixel_auroc,
                self.best.unwrap().pro_score
            );
        }
        selected
    }

    /// Best triple seen so far.
    pub fn best(&self) -> Option<BestRecord> {
        self.best
    }

    /// Consume the selector, yielding the final record and snapshot.
    pub fn into_best(self) -> Option<(BestRecord, CheckpointRecord)> {
        match (self.best, self.snapshot) {
            (Some(best), Some(snapshot)) => Some((best, snapshot)),
            _ => None,
        }
    }
}

impl Default for CheckpointSelector {
    fn default() -> Self {
        Self::new()
    }
}
