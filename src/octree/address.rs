//! Bit-packed octant addresses.
//!
//! An address stores the zero-based depth of an octant and the orientation
//! taken at every level on the way down from the root in a single 64 bit word:
//!
//! ```text
//! | depth: 7 bit signed |  level 0  |  level 1  |  ...  |  level 18  |
//! | 63 ............. 57 | 56  55 54 | 53  52 51 |  ...  |  2   1  0  |
//! |                     | DU  FB LR | DU  FB LR |       | DU  FB LR  |
//! ```
//!
//! A negative depth marks an unset address.

use std::fmt;
use thiserror::Error;

/// Deepest level an address can describe.
pub const MAX_DEPTH: i32 = 18;

const LEVEL_COUNT: usize = 19;
const DEPTH_SHIFT: u32 = 57;
const ORIENTATION_BITS: i64 = !(0b111_1111_i64 << DEPTH_SHIFT);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid depth {0}, allowed range is [0..{MAX_DEPTH}]")]
    InvalidDepth(i32),

    #[error("Invalid octant orientation {bits:#05b} at level {level}")]
    InvalidOrientation { level: usize, bits: u8 },

    #[error("Level {level} is out of range for an address of depth {depth}")]
    InvalidLevel { level: usize, depth: i32 },

    #[error("Invalid path character {character:?} at position {position}")]
    InvalidPathCharacter { position: usize, character: char },
}

/// Which of the eight children was descended into.
///
/// Bit 0 selects left (0) or right (1) along X, bit 1 front (0) or back (1)
/// along Y and bit 2 down (0) or up (1) along Z.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Orientation(u8);

impl Orientation {
    pub const LEFT_FRONT_DOWN: Orientation = Orientation(0b000);
    pub const RIGHT_FRONT_DOWN: Orientation = Orientation(0b001);
    pub const LEFT_BACK_DOWN: Orientation = Orientation(0b010);
    pub const RIGHT_BACK_DOWN: Orientation = Orientation(0b011);
    pub const LEFT_FRONT_UP: Orientation = Orientation(0b100);
    pub const RIGHT_FRONT_UP: Orientation = Orientation(0b101);
    pub const LEFT_BACK_UP: Orientation = Orientation(0b110);
    pub const RIGHT_BACK_UP: Orientation = Orientation(0b111);

    pub const LEFT_RIGHT_MASK: u8 = 0b001;
    pub const FRONT_BACK_MASK: u8 = 0b010;
    pub const DOWN_UP_MASK: u8 = 0b100;
    pub const AXIS_MASK: u8 = Self::LEFT_RIGHT_MASK | Self::FRONT_BACK_MASK | Self::DOWN_UP_MASK;

    pub const ALL: [Orientation; 8] = [
        Self::LEFT_FRONT_DOWN,
        Self::RIGHT_FRONT_DOWN,
        Self::LEFT_BACK_DOWN,
        Self::RIGHT_BACK_DOWN,
        Self::LEFT_FRONT_UP,
        Self::RIGHT_FRONT_UP,
        Self::LEFT_BACK_UP,
        Self::RIGHT_BACK_UP,
    ];

    /// Wraps raw bits without checking them. Addresses reject flags with bits
    /// outside [`Orientation::AXIS_MASK`].
    pub const fn from_bits_retain(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 & !Self::AXIS_MASK == 0
    }

    /// Index of the child slot, in [0..8) for valid orientations.
    pub const fn index(self) -> usize {
        (self.0 & Self::AXIS_MASK) as usize
    }

    pub const fn is_left(self) -> bool {
        self.0 & Self::LEFT_RIGHT_MASK == 0
    }

    pub const fn is_right(self) -> bool {
        !self.is_left()
    }

    pub const fn is_front(self) -> bool {
        self.0 & Self::FRONT_BACK_MASK == 0
    }

    pub const fn is_back(self) -> bool {
        !self.is_front()
    }

    pub const fn is_down(self) -> bool {
        self.0 & Self::DOWN_UP_MASK == 0
    }

    pub const fn is_up(self) -> bool {
        !self.is_down()
    }

    /// Potree numbers children `0..=7` with X in the high bit and Z in the low
    /// bit, the reverse of the orientation bit order.
    pub const fn from_potree_index(index: u8) -> Option<Self> {
        if index > 7 {
            return None;
        }
        Some(Self(((index & 0b001) << 2) | (index & 0b010) | ((index & 0b100) >> 2)))
    }

    pub const fn potree_index(self) -> u8 {
        let bits = self.0 & Self::AXIS_MASK;
        ((bits & 0b001) << 2) | (bits & 0b010) | ((bits & 0b100) >> 2)
    }

    fn from_path_digit(character: char) -> Option<Self> {
        match character {
            // 'r' only ever names the root; inside a path it stands for child 0
            'r' => Some(Self::LEFT_FRONT_DOWN),
            '0'..='7' => Self::from_potree_index(character as u8 - b'0'),
            _ => None,
        }
    }

    fn to_path_digit(self) -> char {
        (b'0' + self.potree_index()) as char
    }
}

impl fmt::Debug for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "Orientation({:#010b})", self.0);
        }
        let x = if self.is_left() { "Left" } else { "Right" };
        let y = if self.is_front() { "Front" } else { "Back" };
        let z = if self.is_down() { "Down" } else { "Up" };
        write!(f, "{x}{y}{z}")
    }
}

/// Identifier of one octant: its depth plus the full root-to-node path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OctantAddress(i64);

impl Default for OctantAddress {
    fn default() -> Self {
        Self::UNSET
    }
}

impl OctantAddress {
    /// Address with a negative depth. Not valid for any query.
    pub const UNSET: OctantAddress = OctantAddress(-1);

    /// The root octant: depth zero, empty path.
    pub const ROOT: OctantAddress = OctantAddress(0);

    /// Rebuilds an address from its raw representation. No check is performed.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    pub fn from_orientation_path(path: &[Orientation]) -> Result<Self, AddressError> {
        let mut raw = 0_i64;
        for (level, orientation) in path.iter().enumerate() {
            if level >= LEVEL_COUNT - 1 || !orientation.is_valid() {
                return Err(AddressError::InvalidOrientation {
                    level,
                    bits: orientation.bits(),
                });
            }
            raw |= (orientation.bits() as i64) << shift_for(level);
        }
        raw |= (path.len() as i64) << DEPTH_SHIFT;
        Ok(Self(raw))
    }

    /// Parses a Potree node name such as `r0143`.
    ///
    /// A leading `r` names the root and contributes no level. Every further
    /// character adds one level.
    pub fn from_path_string(name: &str) -> Result<Self, AddressError> {
        let mut path = Vec::with_capacity(name.len());
        for (position, character) in name.chars().enumerate() {
            if position == 0 && character == 'r' {
                continue;
            }
            let orientation = Orientation::from_path_digit(character)
                .ok_or(AddressError::InvalidPathCharacter { position, character })?;
            path.push(orientation);
        }
        Self::from_orientation_path(&path)
    }

    /// `r` followed by one digit per level. Unset addresses have no path and
    /// yield an empty string.
    pub fn to_path_string(self) -> String {
        if !self.is_valid() {
            return String::new();
        }
        let mut name = String::with_capacity(self.depth() as usize + 1);
        name.push('r');
        for (_, orientation) in self.iter() {
            name.push(orientation.to_path_digit());
        }
        name
    }

    /// Zero-based depth; negative for unset addresses.
    pub const fn depth(self) -> i32 {
        (self.0 >> DEPTH_SHIFT) as i32
    }

    /// Rewrites the depth bits, leaving every orientation group untouched.
    pub fn set_depth(&mut self, depth: i32) -> Result<(), AddressError> {
        if !(0..=MAX_DEPTH).contains(&depth) {
            return Err(AddressError::InvalidDepth(depth));
        }
        let orientations = if self.is_valid() { self.0 & ORIENTATION_BITS } else { 0 };
        self.0 = ((depth as i64) << DEPTH_SHIFT) | orientations;
        Ok(())
    }

    pub fn orientation_at(self, level: usize) -> Result<Orientation, AddressError> {
        if !self.is_valid() || level as i64 > self.depth() as i64 {
            return Err(AddressError::InvalidLevel {
                level,
                depth: self.depth(),
            });
        }
        Ok(self.group(level))
    }

    /// Overwrites the orientation stored for `level`. Writing past the current
    /// depth raises the depth to `level`.
    pub fn set_orientation_at(
        &mut self,
        level: usize,
        orientation: Orientation,
    ) -> Result<(), AddressError> {
        if level > MAX_DEPTH as usize {
            return Err(AddressError::InvalidLevel {
                level,
                depth: self.depth(),
            });
        }
        if !orientation.is_valid() {
            return Err(AddressError::InvalidOrientation {
                level,
                bits: orientation.bits(),
            });
        }
        if !self.is_valid() {
            self.0 = 0;
        }
        if level as i32 > self.depth() {
            self.set_depth(level as i32)?;
        }
        let mask = (Orientation::AXIS_MASK as i64) << shift_for(level);
        self.0 = (self.0 & !mask) | ((orientation.bits() as i64) << shift_for(level));
        Ok(())
    }

    /// Address of the enclosing octant, `None` for the root and unset addresses.
    pub fn parent(self) -> Option<Self> {
        let depth = self.depth();
        if depth <= 0 {
            return None;
        }
        let last = (depth - 1) as usize;
        let mask = (Orientation::AXIS_MASK as i64) << shift_for(last);
        let orientations = self.0 & ORIENTATION_BITS & !mask;
        Some(Self((((depth - 1) as i64) << DEPTH_SHIFT) | orientations))
    }

    pub fn child(self, orientation: Orientation) -> Result<Self, AddressError> {
        let depth = self.depth();
        if !self.is_valid() {
            return Err(AddressError::InvalidDepth(depth));
        }
        if depth >= MAX_DEPTH || !orientation.is_valid() {
            return Err(AddressError::InvalidOrientation {
                level: depth as usize,
                bits: orientation.bits(),
            });
        }
        let orientations = (self.0 & ORIENTATION_BITS)
            | ((orientation.bits() as i64) << shift_for(depth as usize));
        Ok(Self((((depth + 1) as i64) << DEPTH_SHIFT) | orientations))
    }

    /// Orientation taken when entering this octant from its parent.
    pub fn last_orientation(self) -> Option<Orientation> {
        let depth = self.depth();
        (depth > 0).then(|| self.group((depth - 1) as usize))
    }

    pub fn iter(self) -> Orientations {
        Orientations {
            address: self,
            level: 0,
            depth: self.depth().max(0) as usize,
        }
    }

    fn group(self, level: usize) -> Orientation {
        Orientation(((self.0 >> shift_for(level)) as u8) & Orientation::AXIS_MASK)
    }
}

const fn shift_for(level: usize) -> u32 {
    ((LEVEL_COUNT - 1 - level) * 3) as u32
}

impl fmt::Display for OctantAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            f.write_str(&self.to_path_string())
        } else {
            f.write_str("<unset>")
        }
    }
}

impl fmt::Debug for OctantAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OctantAddress({:#066b})", self.0)
    }
}

impl TryFrom<&str> for OctantAddress {
    type Error = AddressError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::from_path_string(name)
    }
}

/// Root-to-leaf walk over the `(level, orientation)` pairs of an address.
#[derive(Clone, Debug)]
pub struct Orientations {
    address: OctantAddress,
    level: usize,
    depth: usize,
}

impl Iterator for Orientations {
    type Item = (usize, Orientation);

    fn next(&mut self) -> Option<Self::Item> {
        if self.level >= self.depth {
            return None;
        }
        let level = self.level;
        self.level += 1;
        Some((level, self.address.group(level)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.depth - self.level;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Orientations {}

impl IntoIterator for OctantAddress {
    type Item = (usize, Orientation);
    type IntoIter = Orientations;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
