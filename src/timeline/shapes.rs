//! Fingering catalogue for the open/barre shapes a practice timeline uses.
//!
//! Strings are numbered 1 (high E) to 6 (low E). Shapes only list the fretted
//! strings the player needs to hold down; open strings are omitted.

use std::collections::{BTreeMap, BTreeSet};

/// One fretted string in a chord shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrettedString {
    pub string: u8,
    pub fret: u8,
}

const fn fs(string: u8, fret: u8) -> FrettedString {
    FrettedString { string, fret }
}

static SHAPES: &[(&str, &[FrettedString])] = &[
    ("C", &[fs(2, 3), fs(3, 2), fs(5, 1)]),
    ("Cm", &[fs(2, 3), fs(3, 1), fs(5, 3)]),
    ("D", &[fs(4, 2), fs(6, 3), fs(5, 2)]),
    ("Dm", &[fs(1, 1), fs(2, 3), fs(3, 2)]),
    ("E", &[fs(3, 1), fs(4, 2), fs(5, 2)]),
    ("Em", &[fs(4, 2), fs(5, 2)]),
    ("F", &[fs(1, 1), fs(2, 1), fs(3, 2), fs(4, 3)]),
    ("Fm", &[fs(1, 1), fs(2, 1), fs(3, 1), fs(4, 3)]),
    ("G", &[fs(2, 3), fs(1, 2), fs(6, 3)]),
    ("Gm", &[fs(1, 3), fs(2, 3), fs(5, 3)]),
    ("A", &[fs(3, 2), fs(4, 2), fs(5, 2)]),
    ("Am", &[fs(4, 1), fs(3, 2), fs(5, 2)]),
    ("B", &[fs(1, 2), fs(2, 4), fs(3, 4), fs(4, 4)]),
    ("Bm", &[fs(1, 2), fs(2, 3), fs(3, 4), fs(4, 4)]),
];

/// Look up the fingering for a chord label (case-sensitive: `Am` is not `AM`).
pub fn chord_shape(label: &str) -> Option<&'static [FrettedString]> {
    SHAPES
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, shape)| *shape)
}

/// Labels with a known fingering, in catalogue order.
pub fn known_shapes() -> impl Iterator<Item = &'static str> {
    SHAPES.iter().map(|(name, _)| *name)
}

/// Split a shape into the `required_strings` / `fret_positions` pair carried
/// by a `ChordEvent`.
pub fn shape_positions(shape: &[FrettedString]) -> (BTreeSet<u8>, BTreeMap<u8, u8>) {
    let strings = shape.iter().map(|s| s.string).collect();
    let frets = shape.iter().map(|s| (s.string, s.fret)).collect();
    (strings, frets)
}
