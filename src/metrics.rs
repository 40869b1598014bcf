//! Evaluation metrics collaborator boundary.
//!
//! AUROC and PRO computation live outside this crate; the detector only
//! depends on this capability interface. Scores handed to a provider are
//! already min-max normalized per image.

/// External metrics computation contract.
///
/// `image_auroc` and `pixel_auroc` return values in [0, 1]; `pro` returns
/// -1.0 when no ground-truth masks exist.
pub trait MetricsProvider {
    /// Ranking quality of per-image scores against anomaly labels.
    fn image_auroc(&self, scores: &[f32], labels: &[bool]) -> f32;

    /// Ranking quality of pixel score maps against ground-truth masks.
    fn pixel_auroc(&self, score_maps: &[Vec<f32>], mask_maps: &[Vec<f32>]) -> f32;

    /// Per-region overlap score of score maps against ground-truth masks.
    fn pro(&self, mask_maps: &[Vec<f32>], score_maps: &[Vec<f32>]) -> f32;
}
