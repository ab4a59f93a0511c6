//! Two-level keyed storage for per-link tunables.
//!
//! Every per-link parameter (angles, grids, ray counts, time windows, custom
//! transducers, ...) lives in a [`CreatorContainer`] keyed by a
//! (transmitter region, receiver region) pair, where either side may be the
//! wildcard matching any location.

use std::{fmt, sync::Arc};

use crate::types::{coord::CoordZ, transducer::CustomTransducer};

// -------------------------------------------------------------------------------------------------

/// A geographic region used as container key. A region matches a concrete
/// coordinate iff [`Region::is_equivalent_to`] returns true for it.
pub trait Region: Send + Sync + fmt::Debug {
    fn is_equivalent_to(&self, coord: &CoordZ) -> bool;

    /// Orientation of nodes inside this region, used by the transducer
    /// container to rotate beam patterns.
    fn bearing(&self) -> f64 {
        0.0
    }

    fn vertical_orientation(&self) -> f64 {
        0.0
    }

    fn horizontal_orientation(&self) -> f64 {
        0.0
    }
}

// -------------------------------------------------------------------------------------------------

/// A spherical region around a center coordinate. With radius 0 it matches
/// only coordinates at zero Cartesian distance from the center.
#[derive(Debug, Clone)]
pub struct PointRegion {
    center: CoordZ,
    radius: f64,
    bearing: f64,
    vertical_orientation: f64,
    horizontal_orientation: f64,
}

impl PointRegion {
    pub fn new(center: CoordZ, radius: f64) -> Self {
        Self {
            center,
            radius,
            bearing: 0.0,
            vertical_orientation: 0.0,
            horizontal_orientation: 0.0,
        }
    }

    pub fn with_orientation(mut self, bearing: f64, vertical: f64, horizontal: f64) -> Self {
        self.bearing = bearing;
        self.vertical_orientation = vertical;
        self.horizontal_orientation = horizontal;
        self
    }

    pub fn center(&self) -> CoordZ {
        self.center
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl Region for PointRegion {
    fn is_equivalent_to(&self, coord: &CoordZ) -> bool {
        self.center.cartesian_distance(coord) <= self.radius
    }

    fn bearing(&self) -> f64 {
        self.bearing
    }

    fn vertical_orientation(&self) -> f64 {
        self.vertical_orientation
    }

    fn horizontal_orientation(&self) -> f64 {
        self.horizontal_orientation
    }
}

// -------------------------------------------------------------------------------------------------

/// One side of a container key: the wildcard, a concrete coordinate (the
/// container builds and owns a zero-radius [`PointRegion`] for it), or a
/// shared region object.
#[derive(Debug, Clone)]
pub enum LinkKey {
    /// Matches any location; lowest lookup precedence.
    Any,
    /// A concrete point, matched by zero-radius equivalence.
    Point(CoordZ),
    /// A caller-provided region, matched by identity on insert/erase and by
    /// equivalence on lookup.
    Region(Arc<dyn Region>),
}

impl LinkKey {
    fn to_stored(&self) -> StoredKey {
        match self {
            LinkKey::Any => StoredKey::Any,
            LinkKey::Point(coord) => StoredKey::Region(Arc::new(PointRegion::new(*coord, 0.0))),
            LinkKey::Region(region) => StoredKey::Region(region.clone()),
        }
    }
}

impl From<CoordZ> for LinkKey {
    fn from(coord: CoordZ) -> Self {
        LinkKey::Point(coord)
    }
}

impl From<Arc<dyn Region>> for LinkKey {
    fn from(region: Arc<dyn Region>) -> Self {
        LinkKey::Region(region)
    }
}

// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum StoredKey {
    Any,
    Region(Arc<dyn Region>),
}

impl StoredKey {
    fn is_any(&self) -> bool {
        matches!(self, StoredKey::Any)
    }

    fn matches_coord(&self, coord: &CoordZ) -> bool {
        match self {
            StoredKey::Any => false,
            StoredKey::Region(region) => region.is_equivalent_to(coord),
        }
    }

    /// Exact-key identity used by insert/replace/erase: wildcards match each
    /// other, caller regions match by pointer identity, coordinate keys by
    /// equivalence with the stored region.
    fn is_same_key(&self, key: &LinkKey) -> bool {
        match (self, key) {
            (StoredKey::Any, LinkKey::Any) => true,
            (StoredKey::Region(region), LinkKey::Point(coord)) => region.is_equivalent_to(coord),
            (StoredKey::Region(stored), LinkKey::Region(other)) => Arc::ptr_eq(stored, other),
            _ => false,
        }
    }

    fn region(&self) -> Option<&Arc<dyn Region>> {
        match self {
            StoredKey::Any => None,
            StoredKey::Region(region) => Some(region),
        }
    }
}

// -------------------------------------------------------------------------------------------------

struct TxEntry<T> {
    key: StoredKey,
    rx_entries: Vec<(StoredKey, T)>,
}

/// A two-level (tx region, rx region) → value store with wildcard fallback.
///
/// Lookup precedence: exact tx + exact rx, then exact tx + wildcard rx, then
/// wildcard tx + exact rx, then both wildcards. A complete miss logs a
/// warning and returns the default-constructed value; `get` never fails.
pub struct CreatorContainer<T> {
    tx_entries: Vec<TxEntry<T>>,
}

impl<T: Clone + Default> CreatorContainer<T> {
    pub fn new() -> Self {
        Self {
            tx_entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tx_entries.iter().all(|entry| entry.rx_entries.is_empty())
    }

    /// Inserts a value for the given key pair. Fails silently (returning
    /// false) when the exact key pair already holds a value.
    pub fn insert(&mut self, value: T, tx: impl Into<LinkKey>, rx: impl Into<LinkKey>) -> bool {
        let (tx, rx) = (tx.into(), rx.into());
        let entry = self.tx_entry_mut(&tx);
        if entry.rx_entries.iter().any(|(key, _)| key.is_same_key(&rx)) {
            return false;
        }
        entry.rx_entries.push((rx.to_stored(), value));
        true
    }

    /// Inserts or overwrites the value for the given key pair.
    pub fn replace(&mut self, value: T, tx: impl Into<LinkKey>, rx: impl Into<LinkKey>) {
        let (tx, rx) = (tx.into(), rx.into());
        let entry = self.tx_entry_mut(&tx);
        match entry
            .rx_entries
            .iter_mut()
            .find(|(key, _)| key.is_same_key(&rx))
        {
            Some((_, stored)) => *stored = value,
            None => entry.rx_entries.push((rx.to_stored(), value)),
        }
    }

    /// Removes the value stored under the exact key pair, if any.
    pub fn erase(&mut self, tx: &LinkKey, rx: &LinkKey) {
        if let Some(entry) = self
            .tx_entries
            .iter_mut()
            .find(|entry| entry.key.is_same_key(tx))
        {
            entry.rx_entries.retain(|(key, _)| !key.is_same_key(rx));
        }
        self.tx_entries.retain(|entry| !entry.rx_entries.is_empty());
    }

    pub fn clear(&mut self) {
        self.tx_entries.clear();
    }

    /// Resolves the value for a concrete link by the documented precedence.
    pub fn get(&self, tx: &CoordZ, rx: &CoordZ) -> T {
        match self.resolve(tx, rx) {
            Some((_, _, value)) => value.clone(),
            None => {
                log::warn!(
                    "creator container miss for tx = {tx}, rx = {rx}, returning default value"
                );
                T::default()
            }
        }
    }

    /// Accesses the (wildcard, wildcard) slot, creating it on demand. This
    /// is the container's default value for links not covered by any other
    /// entry.
    pub fn access_all(&mut self) -> &mut T {
        let entry = self.tx_entry_mut(&LinkKey::Any);
        let pos = entry.rx_entries.iter().position(|(key, _)| key.is_any());
        let pos = match pos {
            Some(pos) => pos,
            None => {
                entry.rx_entries.push((StoredKey::Any, T::default()));
                entry.rx_entries.len() - 1
            }
        };
        &mut entry.rx_entries[pos].1
    }

    /// Resolution core: returns the matched tx region (None when resolved
    /// through the tx wildcard), whether the rx side matched exactly, and
    /// the stored value.
    fn resolve(&self, tx: &CoordZ, rx: &CoordZ) -> Option<(Option<&Arc<dyn Region>>, bool, &T)> {
        let tx_exact = self
            .tx_entries
            .iter()
            .find(|entry| entry.key.matches_coord(tx));
        let tx_any = self.tx_entries.iter().find(|entry| entry.key.is_any());

        for (entry, is_exact_tx) in [(tx_exact, true), (tx_any, false)] {
            let Some(entry) = entry else { continue };

            let rx_hit = entry
                .rx_entries
                .iter()
                .find(|(key, _)| key.matches_coord(rx))
                .map(|(_, value)| (true, value))
                .or_else(|| {
                    entry
                        .rx_entries
                        .iter()
                        .find(|(key, _)| key.is_any())
                        .map(|(_, value)| (false, value))
                });

            if let Some((rx_exact, value)) = rx_hit {
                let tx_region = if is_exact_tx { entry.key.region() } else { None };
                return Some((tx_region, rx_exact, value));
            }
        }
        None
    }

    fn tx_entry_mut(&mut self, tx: &LinkKey) -> &mut TxEntry<T> {
        let pos = self
            .tx_entries
            .iter()
            .position(|entry| entry.key.is_same_key(tx));
        let pos = match pos {
            Some(pos) => pos,
            None => {
                self.tx_entries.push(TxEntry {
                    key: tx.to_stored(),
                    rx_entries: Vec::new(),
                });
                self.tx_entries.len() - 1
            }
        };
        &mut self.tx_entries[pos]
    }
}

impl<T: Clone + Default> Default for CreatorContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CreatorContainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CreatorContainer[{} tx entries]", self.tx_entries.len())
    }
}

// -------------------------------------------------------------------------------------------------

impl CreatorContainer<CustomTransducer> {
    /// Transducer lookup with the orientation special case: when the tx side
    /// resolved via a concrete region, the returned record takes over that
    /// region's bearing and offsets its rotations by the region's
    /// orientation.
    pub fn get_oriented(&self, tx: &CoordZ, rx: &CoordZ) -> CustomTransducer {
        match self.resolve(tx, rx) {
            Some((Some(tx_region), _, value)) => CustomTransducer::new(
                value.type_name.clone(),
                tx_region.bearing(),
                value.vertical_rotation + tx_region.vertical_orientation(),
                value.horizontal_rotation + tx_region.horizontal_orientation(),
                value.multiply_constant,
                value.add_constant,
            ),
            Some((None, _, value)) => value.clone(),
            None => {
                log::warn!(
                    "transducer container miss for tx = {tx}, rx = {rx}, returning default value"
                );
                CustomTransducer::default()
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn coord_a() -> CoordZ {
        CoordZ::new(45.0, 13.0, 50.0)
    }

    fn coord_b() -> CoordZ {
        CoordZ::new(42.0, 10.0, 100.0)
    }

    #[test]
    fn replace_then_get_returns_value() {
        let mut container = CreatorContainer::<i32>::new();
        container.replace(42, coord_a(), coord_b());
        assert_eq!(container.get(&coord_a(), &coord_b()), 42);
        container.replace(43, coord_a(), coord_b());
        assert_eq!(container.get(&coord_a(), &coord_b()), 43);
    }

    #[test]
    fn insert_does_not_overwrite() {
        let mut container = CreatorContainer::<i32>::new();
        assert!(container.insert(1, coord_a(), coord_b()));
        assert!(!container.insert(2, coord_a(), coord_b()));
        assert_eq!(container.get(&coord_a(), &coord_b()), 1);
    }

    #[test]
    fn wildcard_fallback_precedence() {
        let region_a: Arc<dyn Region> = Arc::new(PointRegion::new(coord_a(), 5_000.0));

        let mut container = CreatorContainer::<i32>::new();
        container.replace(2000, LinkKey::Any, LinkKey::Any);
        container.replace(5000, LinkKey::Region(region_a), LinkKey::Any);

        // inside region A: the specific entry wins for any receiver
        assert_eq!(container.get(&coord_a(), &coord_b()), 5000);
        // outside region A: wildcard-wildcard default applies
        assert_eq!(container.get(&coord_b(), &coord_a()), 2000);
    }

    #[test]
    fn exact_pair_beats_partial_wildcards() {
        let mut container = CreatorContainer::<i32>::new();
        container.replace(1, coord_a(), coord_b());
        container.replace(2, coord_a(), LinkKey::Any);
        container.replace(3, LinkKey::Any, coord_b());
        container.replace(4, LinkKey::Any, LinkKey::Any);

        assert_eq!(container.get(&coord_a(), &coord_b()), 1);
        assert_eq!(container.get(&coord_a(), &coord_a()), 2);
        assert_eq!(container.get(&coord_b(), &coord_b()), 3);
        assert_eq!(container.get(&coord_b(), &coord_a()), 4);
    }

    #[test]
    fn complete_miss_returns_default() {
        let container = CreatorContainer::<i32>::new();
        assert_eq!(container.get(&coord_a(), &coord_b()), 0);
    }

    #[test]
    fn erase_removes_exact_pair_only() {
        let mut container = CreatorContainer::<i32>::new();
        container.replace(1, coord_a(), coord_b());
        container.replace(4, LinkKey::Any, LinkKey::Any);

        container.erase(&LinkKey::Point(coord_a()), &LinkKey::Point(coord_b()));
        assert_eq!(container.get(&coord_a(), &coord_b()), 4);
    }

    #[test]
    fn access_all_is_the_wildcard_slot() {
        let mut container = CreatorContainer::<i32>::new();
        *container.access_all() = 7;
        assert_eq!(container.get(&coord_a(), &coord_b()), 7);
    }

    #[test]
    fn transducer_rotation_applies_for_concrete_tx_region() {
        let region: Arc<dyn Region> = Arc::new(
            PointRegion::new(coord_a(), 1_000.0).with_orientation(1.5, 10.0, 20.0),
        );

        let mut container = CreatorContainer::<CustomTransducer>::new();
        container.replace(
            CustomTransducer::new("piston", 0.0, 5.0, 5.0, 1.0, 0.0),
            LinkKey::Region(region),
            LinkKey::Any,
        );
        container.replace(
            CustomTransducer::new("omni", 0.0, 1.0, 1.0, 1.0, 0.0),
            LinkKey::Any,
            LinkKey::Any,
        );

        let rotated = container.get_oriented(&coord_a(), &coord_b());
        assert_eq!(rotated.type_name, "piston");
        assert_eq!(rotated.initial_bearing, 1.5);
        assert_eq!(rotated.vertical_rotation, 15.0);
        assert_eq!(rotated.horizontal_rotation, 25.0);

        // wildcard resolution keeps the stored record untouched
        let plain = container.get_oriented(&coord_b(), &coord_b());
        assert_eq!(plain.type_name, "omni");
        assert_eq!(plain.vertical_rotation, 1.0);
    }
}
