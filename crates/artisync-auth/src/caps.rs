//! Capability sets.
//!
//! Stored per user as a compact letter string and folded into the session
//! on each successful login. Logins are cumulative: a later login can only
//! widen the set.

/// What a session is allowed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub read: bool,
    pub write: bool,
    pub clone: bool,
    pub private: bool,
    pub admin: bool,
}

impl CapabilitySet {
    /// The empty set: an unauthenticated caller before any login.
    pub const NONE: Self = Self {
        read: false,
        write: false,
        clone: false,
        private: false,
        admin: false,
    };

    /// What `anonymous`/`nobody` logins are granted.
    pub fn anonymous() -> Self {
        Self { read: true, clone: true, ..Self::NONE }
    }

    /// Parse a capability letter string: `r`ead, `w`rite, `c`lone,
    /// `p`rivate, `a`dmin (admin implies everything). Unknown letters are
    /// ignored.
    pub fn from_cap_string(caps: &str) -> Self {
        let mut set = Self::NONE;
        for c in caps.chars() {
            match c {
                'r' => set.read = true,
                'w' => set.write = true,
                'c' => set.clone = true,
                'p' => set.private = true,
                'a' => set.admin = true,
                _ => {}
            }
        }
        if set.admin {
            set.read = true;
            set.write = true;
            set.clone = true;
            set.private = true;
        }
        set
    }

    /// Widen this set with another (cumulative logins).
    pub fn merge(&mut self, other: Self) {
        self.read |= other.read;
        self.write |= other.write;
        self.clone |= other.clone;
        self.private |= other.private;
        self.admin |= other.admin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_letters_and_ignores_noise() {
        let set = CapabilitySet::from_cap_string("rw z");
        assert!(set.read && set.write);
        assert!(!set.clone && !set.private && !set.admin);
    }

    #[test]
    fn admin_implies_everything() {
        let set = CapabilitySet::from_cap_string("a");
        assert!(set.read && set.write && set.clone && set.private);
    }

    #[test]
    fn merge_is_cumulative() {
        let mut set = CapabilitySet::from_cap_string("r");
        set.merge(CapabilitySet::from_cap_string("w"));
        assert!(set.read && set.write);
    }
}
