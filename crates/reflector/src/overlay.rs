use compositor_protocol::geometry::size_is_empty;
use compositor_protocol::{Rect, ResourceFormat, ResourceId, Size};

/// A quad the compositor would like to scan out on its own hardware plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayCandidate {
    pub resource_id: ResourceId,
    pub format: ResourceFormat,
    pub display_rect: Rect,
    /// Planes above the primary plane have a positive order.
    pub plane_z_order: i32,
    pub overlay_handled: bool,
}

pub trait OverlayCandidateValidator {
    /// Sets `overlay_handled` on every candidate that can be promoted.
    fn check_overlay_support(&self, candidates: &mut [OverlayCandidate]);

    /// While mirrored, everything has to be composited into the primary
    /// plane, since a reflector only copies that plane.
    fn set_software_mirror_mode(&mut self, enabled: bool);

    fn software_mirror_mode(&self) -> bool;
}

/// Promotes at most one candidate: the first one that sits above the primary
/// plane and lies entirely inside the display.
#[derive(Debug, Clone)]
pub struct SingleOverlayValidator {
    display_size: Size,
    software_mirror_mode: bool,
}

impl SingleOverlayValidator {
    pub fn new(display_size: Size) -> Self {
        Self {
            display_size,
            software_mirror_mode: false,
        }
    }

    fn accepts(&self, candidate: &OverlayCandidate) -> bool {
        candidate.plane_z_order > 0
            && !size_is_empty(candidate.display_rect.size)
            && Rect::from_size(self.display_size).contains_rect(&candidate.display_rect)
    }
}

impl OverlayCandidateValidator for SingleOverlayValidator {
    fn check_overlay_support(&self, candidates: &mut [OverlayCandidate]) {
        let mut promoted = self.software_mirror_mode;
        for candidate in candidates {
            candidate.overlay_handled = !promoted && self.accepts(candidate);
            promoted |= candidate.overlay_handled;
        }
    }

    fn set_software_mirror_mode(&mut self, enabled: bool) {
        self.software_mirror_mode = enabled;
    }

    fn software_mirror_mode(&self) -> bool {
        self.software_mirror_mode
    }
}

#[cfg(test)]
mod tests {
    use compositor_protocol::geometry::{rect, size};
    use compositor_protocol::{Rect, ResourceFormat, ResourceId};

    use super::{OverlayCandidate, OverlayCandidateValidator, SingleOverlayValidator};

    fn candidate(id: u32, display_rect: Rect, plane_z_order: i32) -> OverlayCandidate {
        OverlayCandidate {
            resource_id: ResourceId(id),
            format: ResourceFormat::Bgra8888,
            display_rect,
            plane_z_order,
            overlay_handled: false,
        }
    }

    #[test]
    fn promotes_first_fitting_candidate_only() {
        let validator = SingleOverlayValidator::new(size(100, 100));
        let mut candidates = [
            candidate(1, rect(90, 90, 20, 20), 1),
            candidate(2, rect(10, 10, 20, 20), 1),
            candidate(3, rect(40, 40, 20, 20), 1),
        ];

        validator.check_overlay_support(&mut candidates);

        let handled = candidates.map(|candidate| candidate.overlay_handled);
        assert_eq!(handled, [false, true, false]);
    }

    #[test]
    fn software_mirror_mode_rejects_everything() {
        let mut validator = SingleOverlayValidator::new(size(100, 100));
        validator.set_software_mirror_mode(true);
        let mut candidates = [candidate(1, rect(0, 0, 10, 10), 1)];
        candidates[0].overlay_handled = true;

        validator.check_overlay_support(&mut candidates);

        assert!(!candidates[0].overlay_handled);
    }

    #[test]
    fn primary_plane_candidates_are_not_promoted() {
        let validator = SingleOverlayValidator::new(size(100, 100));
        let mut candidates = [candidate(1, rect(0, 0, 10, 10), 0)];
        validator.check_overlay_support(&mut candidates);
        assert!(!candidates[0].overlay_handled);
    }
}
