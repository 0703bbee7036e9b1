//! Mask catalog and selection
//!
//! The catalog is built once at startup from the masks directory and is
//! immutable for the process lifetime. Each entry carries an explicit
//! category tag so the compositor never has to re-derive it from the
//! path.

pub mod loader;

pub use loader::{LoadReply, MaskLoader};

use std::path::{Path, PathBuf};

use rand::Rng;

/// Mask category, decided when the catalog is built
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskCategory {
    /// Anchored to the bridge of the nose
    Glasses,
    /// Floats above the brow line
    Crown,
}

/// One catalog entry
#[derive(Clone, Debug)]
pub struct MaskEntry {
    pub path: PathBuf,
    pub category: MaskCategory,
}

/// A decoded mask image with its intrinsic size
#[derive(Clone)]
pub struct MaskImage {
    /// RGBA pixel data
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Ordered, immutable set of available masks
#[derive(Clone, Debug, Default)]
pub struct MaskCatalog {
    entries: Vec<MaskEntry>,
}

/// File stems shipped with the app, mirroring the original asset set
const GLASSES_STEMS: [&str; 5] = ["glasses1", "glasses2", "glasses3", "glasses4", "glasses5"];
const CROWN_STEMS: [&str; 5] = ["crown1", "crown2", "crown3", "crown4", "crown5"];

impl MaskCatalog {
    /// Build the default catalog rooted at `masks_dir`. Entries are
    /// listed whether or not the files exist; a missing file surfaces
    /// later as a load failure, which the session treats as "no mask."
    pub fn default_set(masks_dir: &Path) -> Self {
        let mut entries = Vec::new();
        for stem in GLASSES_STEMS {
            entries.push(MaskEntry {
                path: masks_dir.join(format!("{stem}.png")),
                category: MaskCategory::Glasses,
            });
        }
        for stem in CROWN_STEMS {
            entries.push(MaskEntry {
                path: masks_dir.join(format!("{stem}.png")),
                category: MaskCategory::Crown,
            });
        }
        Self { entries }
    }

    pub fn from_entries(entries: Vec<MaskEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MaskEntry> {
        self.entries.get(index)
    }

    /// Pick a new index uniformly at random, never repeating the current
    /// one when more than one mask is available. Returns None for an
    /// empty catalog.
    pub fn select_next<R: Rng + ?Sized>(
        &self,
        current: Option<usize>,
        rng: &mut R,
    ) -> Option<usize> {
        match self.entries.len() {
            0 => None,
            1 => Some(0),
            len => loop {
                let candidate = rng.random_range(0..len);
                if Some(candidate) != current {
                    break Some(candidate);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalog(len: usize) -> MaskCatalog {
        let entries = (0..len)
            .map(|i| MaskEntry {
                path: PathBuf::from(format!("m{i}.png")),
                category: if i % 2 == 0 {
                    MaskCategory::Glasses
                } else {
                    MaskCategory::Crown
                },
            })
            .collect();
        MaskCatalog::from_entries(entries)
    }

    #[test]
    fn selector_never_repeats_when_more_than_one_mask() {
        let catalog = catalog(10);
        let mut rng = StdRng::seed_from_u64(7);
        let mut current = None;
        for _ in 0..500 {
            let next = catalog.select_next(current, &mut rng).unwrap();
            assert_ne!(Some(next), current);
            assert!(next < catalog.len());
            current = Some(next);
        }
    }

    #[test]
    fn single_entry_catalog_always_selects_it() {
        let catalog = catalog(1);
        let mut rng = StdRng::seed_from_u64(7);
        for current in [None, Some(0)] {
            assert_eq!(catalog.select_next(current, &mut rng), Some(0));
        }
    }

    #[test]
    fn empty_catalog_selects_nothing() {
        let catalog = catalog(0);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(catalog.select_next(None, &mut rng), None);
    }

    #[test]
    fn default_set_tags_categories_disjointly() {
        let catalog = MaskCatalog::default_set(Path::new("masks"));
        assert_eq!(catalog.len(), 10);
        let glasses = catalog
            .entries
            .iter()
            .filter(|e| e.category == MaskCategory::Glasses)
            .count();
        assert_eq!(glasses, 5);
        // Paths are unique, so the category sets cannot overlap
        let mut paths: Vec<_> = catalog.entries.iter().map(|e| &e.path).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 10);
    }
}
