//! Command tags.

/// Hands out the tags a session puts in front of its commands.
///
/// Tags run `A0000`, `A0001`, ... and are only unique within one connection,
/// so each client owns its generator. The counter wraps rather than failing.
#[derive(Debug, Clone, Default)]
pub struct TagGenerator {
    issued: u32,
}

impl TagGenerator {
    /// A generator whose first tag is number `first`.
    #[must_use]
    pub const fn starting_at(first: u32) -> Self {
        Self { issued: first }
    }

    /// Issues the next tag.
    pub fn next_tag(&mut self) -> String {
        let tag = format!("A{:04}", self.issued);
        self.issued = self.issued.wrapping_add(1);
        tag
    }

    /// How many tags have been issued.
    #[must_use]
    pub const fn issued(&self) -> u32 {
        self.issued
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence() {
        let mut tags = TagGenerator::default();
        assert_eq!(tags.next_tag(), "A0000");
        assert_eq!(tags.next_tag(), "A0001");
        assert_eq!(tags.issued(), 2);
        assert_eq!(TagGenerator::starting_at(123).next_tag(), "A0123");
    }

    #[test]
    fn test_wraps() {
        let mut tags = TagGenerator::starting_at(u32::MAX);
        assert_eq!(tags.next_tag(), format!("A{}", u32::MAX));
        assert_eq!(tags.next_tag(), "A0000");
    }
}
