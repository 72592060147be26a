//! Target selection among detections.

use armos_types::Detection;

/// Highest-confidence detection whose label equals `target`, ignoring case.
pub fn select_target<'a>(detections: &'a [Detection], target: &str) -> Option<&'a Detection> {
    let target = target.trim().to_lowercase();
    detections
        .iter()
        .filter(|d| d.label.trim().to_lowercase() == target)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}
