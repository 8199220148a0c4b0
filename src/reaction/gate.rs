use super::ReactionKind;

/// Which reaction kinds a guest may attempt.
///
/// Authenticated actors may attempt every kind. When the gate denies an
/// attempt, the caller prompts for sign-in and changes no local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionGate {
    guest_kinds: Vec<ReactionKind>,
}

impl Default for ReactionGate {
    /// Guests may like; favoriting requires an account.
    fn default() -> Self {
        Self {
            guest_kinds: vec![ReactionKind::Like],
        }
    }
}

impl ReactionGate {
    pub fn new(guest_kinds: impl IntoIterator<Item = ReactionKind>) -> Self {
        let mut kinds: Vec<ReactionKind> = Vec::new();
        for kind in guest_kinds {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Self { guest_kinds: kinds }
    }

    pub fn can_attempt(&self, kind: ReactionKind, is_authenticated: bool) -> bool {
        is_authenticated || self.guest_kinds.contains(&kind)
    }

    pub fn requires_auth(&self, kind: ReactionKind) -> bool {
        !self.guest_kinds.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let gate = ReactionGate::default();
        assert!(gate.can_attempt(ReactionKind::Like, false));
        assert!(!gate.can_attempt(ReactionKind::Favorite, false));
        assert!(gate.can_attempt(ReactionKind::Like, true));
        assert!(gate.can_attempt(ReactionKind::Favorite, true));
    }

    #[test]
    fn test_no_guest_kinds() {
        let gate = ReactionGate::new(Vec::<ReactionKind>::new());
        for kind in ReactionKind::ALL {
            assert!(!gate.can_attempt(kind, false));
            assert!(gate.can_attempt(kind, true));
            assert!(gate.requires_auth(kind));
        }
    }

    #[test]
    fn test_duplicate_kinds_collapse() {
        let gate = ReactionGate::new([ReactionKind::Like, ReactionKind::Like]);
        assert_eq!(gate, ReactionGate::default());
    }
}
