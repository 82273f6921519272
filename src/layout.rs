//! Typed index accessors over the segmented constraint vector.
//!
//! The unknown vector `gamma` (and the vectors sharing its shape: `b`, `r`,
//! `E`) is one flat buffer segmented by block kind:
//!
//! ```text
//! [ normal (n_c) | tangential (2·n_c) | spinning (3·n_c) | bilateral (n_b) ]
//! ```
//!
//! with the tangential/spinning segments present only in the modes that
//! allocate them. [`BlockLayout`] owns the offset arithmetic so no other
//! component hand-computes `3·n_c + 3·i + k` style indices, while the flat,
//! cache-friendly memory layout is preserved.

use crate::types::SolverMode;

/// Index map over the segmented constraint vector for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    mode: SolverMode,
    num_contacts: usize,
    num_bilaterals: usize,
}

impl BlockLayout {
    /// Build the layout for a step.
    #[must_use]
    pub const fn new(mode: SolverMode, num_contacts: usize, num_bilaterals: usize) -> Self {
        Self {
            mode,
            num_contacts,
            num_bilaterals,
        }
    }

    /// An empty layout (no constraints).
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(SolverMode::Normal, 0, 0)
    }

    /// The mode this layout was built for.
    #[must_use]
    pub const fn mode(&self) -> SolverMode {
        self.mode
    }

    /// Number of contacts.
    #[must_use]
    pub const fn num_contacts(&self) -> usize {
        self.num_contacts
    }

    /// Number of bilateral rows.
    #[must_use]
    pub const fn num_bilaterals(&self) -> usize {
        self.num_bilaterals
    }

    /// Total unilateral (contact) rows: `n_c · (1|3|6)`.
    #[must_use]
    pub const fn num_unilaterals(&self) -> usize {
        self.num_contacts * self.mode.unknowns_per_contact()
    }

    /// Total constraint rows.
    #[must_use]
    pub const fn num_constraints(&self) -> usize {
        self.num_unilaterals() + self.num_bilaterals
    }

    /// Row of contact `i`'s normal component.
    #[must_use]
    pub const fn normal(&self, i: usize) -> usize {
        i
    }

    /// Row of contact `i`'s tangential component `k` (0 or 1).
    ///
    /// Only valid when the mode allocates the tangential block.
    #[must_use]
    pub const fn tangential(&self, i: usize, k: usize) -> usize {
        self.num_contacts + i * 2 + k
    }

    /// Row of contact `i`'s spin-block component `k`
    /// (0 = torsion about the normal, 1–2 = rolling).
    ///
    /// Only valid when the mode allocates the spinning block.
    #[must_use]
    pub const fn spinning(&self, i: usize, k: usize) -> usize {
        self.num_contacts * 3 + i * 3 + k
    }

    /// Row of bilateral constraint `j`.
    #[must_use]
    pub const fn bilateral(&self, j: usize) -> usize {
        self.num_unilaterals() + j
    }

    /// Index range of the normal block.
    #[must_use]
    pub const fn normal_range(&self) -> core::ops::Range<usize> {
        0..self.num_contacts
    }

    /// Index range of the tangential block (empty in `Normal` mode).
    #[must_use]
    pub const fn tangential_range(&self) -> core::ops::Range<usize> {
        if self.mode.has_tangential() {
            self.num_contacts..self.num_contacts * 3
        } else {
            self.num_contacts..self.num_contacts
        }
    }

    /// Index range of the spinning block (empty below `Spinning` mode).
    #[must_use]
    pub const fn spinning_range(&self) -> core::ops::Range<usize> {
        if self.mode.has_spinning() {
            self.num_contacts * 3..self.num_contacts * 6
        } else {
            let end = self.num_unilaterals();
            end..end
        }
    }

    /// Index range of the bilateral block.
    #[must_use]
    pub const fn bilateral_range(&self) -> core::ops::Range<usize> {
        self.num_unilaterals()..self.num_constraints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sliding_layout_offsets() {
        let layout = BlockLayout::new(SolverMode::Sliding, 4, 2);
        assert_eq!(layout.num_unilaterals(), 12);
        assert_eq!(layout.num_constraints(), 14);
        assert_eq!(layout.normal(3), 3);
        assert_eq!(layout.tangential(0, 1), 5);
        assert_eq!(layout.tangential(3, 0), 10);
        assert_eq!(layout.bilateral(1), 13);
        assert_eq!(layout.tangential_range(), 4..12);
        assert_eq!(layout.spinning_range(), 12..12);
    }

    #[test]
    fn test_spinning_layout_offsets() {
        let layout = BlockLayout::new(SolverMode::Spinning, 2, 0);
        assert_eq!(layout.num_unilaterals(), 12);
        assert_eq!(layout.spinning(0, 0), 6);
        assert_eq!(layout.spinning(1, 2), 11);
        assert_eq!(layout.spinning_range(), 6..12);
        assert_eq!(layout.bilateral_range(), 12..12);
    }

    #[test]
    fn test_normal_layout_has_no_friction_blocks() {
        let layout = BlockLayout::new(SolverMode::Normal, 5, 1);
        assert_eq!(layout.num_unilaterals(), 5);
        assert!(layout.tangential_range().is_empty());
        assert!(layout.spinning_range().is_empty());
        assert_eq!(layout.bilateral(0), 5);
    }
}
