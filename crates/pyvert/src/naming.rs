//! Symbol generation for rewritten code.

use ahash::AHashSet;

/// Hands out names guaranteed not to collide with the entity's namespace,
/// with caller-supplied reserved names, or with anything it generated before.
///
/// One namer lives for the whole conversion, so symbols stay unique across
/// all passes.
#[derive(Debug, Default)]
pub struct Namer {
    reserved: AHashSet<String>,
    generated: AHashSet<String>,
}

impl Namer {
    /// `namespace` is the set of names permanently off-limits (typically the
    /// names visible in the entity's defining module).
    pub fn new(namespace: impl IntoIterator<Item = String>) -> Self {
        Self {
            reserved: namespace.into_iter().collect(),
            generated: AHashSet::new(),
        }
    }

    fn is_taken(&self, name: &str, reserved_locals: &AHashSet<String>) -> bool {
        self.reserved.contains(name)
            || self.generated.contains(name)
            || reserved_locals.contains(name)
    }

    /// True if this namer handed out `name`. Analyses use this to tell the
    /// entity's own variables apart from rewrite plumbing.
    pub fn generated(&self, name: &str) -> bool {
        self.generated.contains(name)
    }

    /// Returns `base` if it is available, otherwise `base_1`, `base_2`, …
    /// The returned name is recorded so later calls never reuse it.
    pub fn new_symbol(&mut self, base: &str, reserved_locals: &AHashSet<String>) -> String {
        let mut candidate = base.to_owned();
        let mut n = 0u32;
        while self.is_taken(&candidate, reserved_locals) {
            n += 1;
            candidate = format!("{base}_{n}");
        }
        self.generated.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_the_base_name() {
        let mut namer = Namer::new([]);
        assert_eq!(namer.new_symbol("tmp", &AHashSet::new()), "tmp");
    }

    #[test]
    fn avoids_namespace_reserved_and_generated_names() {
        let mut namer = Namer::new(["x".to_owned()]);
        let reserved: AHashSet<String> = ["x_1".to_owned()].into_iter().collect();
        assert_eq!(namer.new_symbol("x", &reserved), "x_2");
        // generated names stay taken for later calls
        assert_eq!(namer.new_symbol("x", &AHashSet::new()), "x_1");
        assert_eq!(namer.new_symbol("x", &AHashSet::new()), "x_3");
    }
}
