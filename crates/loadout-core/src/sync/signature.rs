//! Three-way classification of a single path

use std::fmt;

use crate::model::FileStateEntry;

flag_set! {
    /// Which of disk, previous and loadout know a path, which of them agree
    /// and which are archived.
    Signature {
        DISK_EXISTS = 1 << 0,
        PREV_EXISTS = 1 << 1,
        LOADOUT_EXISTS = 1 << 2,
        DISK_EQUALS_PREV = 1 << 3,
        PREV_EQUALS_LOADOUT = 1 << 4,
        DISK_EQUALS_LOADOUT = 1 << 5,
        DISK_ARCHIVED = 1 << 6,
        PREV_ARCHIVED = 1 << 7,
        LOADOUT_ARCHIVED = 1 << 8,
        PATH_IS_IGNORED = 1 << 9,
    }
}

/// The three views of one path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureInput {
    pub disk: Option<FileStateEntry>,
    pub prev: Option<FileStateEntry>,
    pub loadout: Option<FileStateEntry>,
    pub path_is_ignored: bool,
}

impl Signature {
    /// Classify a path. Total: every input yields a signature.
    pub fn build(input: &SignatureInput) -> Self {
        let mut sig = Self::empty();

        let sides = [
            (input.disk, Self::DISK_EXISTS, Self::DISK_ARCHIVED),
            (input.prev, Self::PREV_EXISTS, Self::PREV_ARCHIVED),
            (input.loadout, Self::LOADOUT_EXISTS, Self::LOADOUT_ARCHIVED),
        ];
        for (entry, exists, archived) in sides {
            if let Some(entry) = entry {
                sig |= exists;
                sig.set(archived, entry.is_archived);
            }
        }

        let same = |a: Option<FileStateEntry>, b: Option<FileStateEntry>| {
            matches!((a, b), (Some(a), Some(b)) if a.hash == b.hash)
        };
        sig.set(Self::DISK_EQUALS_PREV, same(input.disk, input.prev));
        sig.set(Self::PREV_EQUALS_LOADOUT, same(input.prev, input.loadout));
        sig.set(Self::DISK_EQUALS_LOADOUT, same(input.disk, input.loadout));
        sig.set(Self::PATH_IS_IGNORED, input.path_is_ignored);
        sig
    }

    /// Content letters for disk, previous and loadout: `x` when absent,
    /// otherwise `A`, `B`, `C` with equal content sharing a letter.
    pub fn shape(self) -> [u8; 3] {
        let disk_exists = self.contains(Self::DISK_EXISTS);
        let prev_exists = self.contains(Self::PREV_EXISTS);

        let mut next = b'A';
        let mut fresh = || {
            let letter = next;
            next += 1;
            letter
        };

        let disk = if disk_exists { fresh() } else { b'x' };
        let prev = if !prev_exists {
            b'x'
        } else if disk_exists && self.contains(Self::DISK_EQUALS_PREV) {
            disk
        } else {
            fresh()
        };
        let loadout = if !self.contains(Self::LOADOUT_EXISTS) {
            b'x'
        } else if disk_exists && self.contains(Self::DISK_EQUALS_LOADOUT) {
            disk
        } else if prev_exists && self.contains(Self::PREV_EQUALS_LOADOUT) {
            prev
        } else {
            fresh()
        };
        [disk, prev, loadout]
    }

    /// Share archived bits between sides with equal content.
    ///
    /// Equal hashes are the same bytes, so if one side is archived all of
    /// them are.
    pub fn canonicalize(self) -> Self {
        let shape = self.shape();
        let archived = [
            self.contains(Self::DISK_ARCHIVED),
            self.contains(Self::PREV_ARCHIVED),
            self.contains(Self::LOADOUT_ARCHIVED),
        ];
        let flags = [Self::DISK_ARCHIVED, Self::PREV_ARCHIVED, Self::LOADOUT_ARCHIVED];

        let mut out = self;
        for (i, letter) in shape.iter().enumerate() {
            if *letter == b'x' {
                continue;
            }
            let shared = shape
                .iter()
                .zip(archived)
                .any(|(other, is_archived)| other == letter && is_archived);
            out.set(flags[i], shared);
        }
        out
    }

    /// Compact label such as `xxA_xxX` or `AAB_ooX_i`.
    ///
    /// The second group marks each side as absent (`x`), archived (`X`) or
    /// present but not archived (`o`). `_i` marks an ignored path.
    pub fn shorthand(self) -> String {
        let shape = self.shape();
        let mut label: String = shape.iter().map(|b| char::from(*b)).collect();
        label.push('_');
        let sides = [
            (Self::DISK_EXISTS, Self::DISK_ARCHIVED),
            (Self::PREV_EXISTS, Self::PREV_ARCHIVED),
            (Self::LOADOUT_EXISTS, Self::LOADOUT_ARCHIVED),
        ];
        for (exists, archived) in sides {
            label.push(match (self.contains(exists), self.contains(archived)) {
                (false, _) => 'x',
                (true, true) => 'X',
                (true, false) => 'o',
            });
        }
        if self.contains(Self::PATH_IS_IGNORED) {
            label.push_str("_i");
        }
        label
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.shorthand())
    }
}
