//! Spoken-hint deduplication.
//!
//! The host's speech engine should only hear a hint when it changes, and
//! never while the step is already satisfied or photographed.

/// Conditions gating a spoken hint, taken from the current guidance state.
#[derive(Debug, Clone, Copy)]
pub struct AnnounceContext<'a> {
    pub hint: &'a str,
    pub all_rules_met: bool,
    pub camera_ready: bool,
    pub step_has_photo: bool,
}

/// Deduplicates hints sent to speech.
#[derive(Debug, Default)]
pub struct HintAnnouncer {
    last: Option<String>,
}

impl HintAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hint to speak, if any.
    pub fn offer(&mut self, ctx: AnnounceContext<'_>) -> Option<String> {
        if !ctx.camera_ready || ctx.step_has_photo || ctx.all_rules_met || ctx.hint.is_empty() {
            return None;
        }
        if self.last.as_deref() == Some(ctx.hint) {
            return None;
        }
        tracing::debug!(hint = ctx.hint, "announcing hint");
        self.last = Some(ctx.hint.to_string());
        self.last.clone()
    }

    /// Forget the last hint so the next step's first hint is spoken.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(hint: &str) -> AnnounceContext<'_> {
        AnnounceContext {
            hint,
            all_rules_met: false,
            camera_ready: true,
            step_has_photo: false,
        }
    }

    #[test]
    fn test_repeated_hint_spoken_once() {
        let mut a = HintAnnouncer::new();
        assert_eq!(a.offer(ctx("Telefonu sabit tut")).as_deref(), Some("Telefonu sabit tut"));
        assert_eq!(a.offer(ctx("Telefonu sabit tut")), None);
        assert_eq!(a.offer(ctx("Yüz tespit ediliyor...")).as_deref(), Some("Yüz tespit ediliyor..."));
        assert_eq!(a.offer(ctx("Telefonu sabit tut")).as_deref(), Some("Telefonu sabit tut"));
    }

    #[test]
    fn test_silent_when_gated() {
        let mut a = HintAnnouncer::new();
        assert_eq!(a.offer(AnnounceContext { camera_ready: false, ..ctx("x") }), None);
        assert_eq!(a.offer(AnnounceContext { step_has_photo: true, ..ctx("x") }), None);
        assert_eq!(a.offer(AnnounceContext { all_rules_met: true, ..ctx("x") }), None);
        assert_eq!(a.offer(ctx("")), None);
        // Gated offers do not count as spoken.
        assert_eq!(a.offer(ctx("x")).as_deref(), Some("x"));
    }

    #[test]
    fn test_reset_respeaks() {
        let mut a = HintAnnouncer::new();
        a.offer(ctx("x"));
        a.reset();
        assert_eq!(a.offer(ctx("x")).as_deref(), Some("x"));
    }
}
