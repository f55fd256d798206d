use crate::types::HashSet;
use core::fmt;

/// The three sets of global variables an instance type touches.
///
/// Computed once per type by semantic analysis and immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessSets {
    read: HashSet<String>,
    write: HashSet<String>,
    read_write: HashSet<String>,
}

impl AccessSets {
    /// Empty access sets: the type shares no state with anything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add globals that are only read.
    #[must_use]
    pub fn reads<S: Into<String>>(mut self, vars: impl IntoIterator<Item = S>) -> Self {
        self.read.extend(vars.into_iter().map(Into::into));
        self
    }

    /// Add globals that are only written.
    #[must_use]
    pub fn writes<S: Into<String>>(mut self, vars: impl IntoIterator<Item = S>) -> Self {
        self.write.extend(vars.into_iter().map(Into::into));
        self
    }

    /// Add globals that are read and written in the same operation.
    #[must_use]
    pub fn read_writes<S: Into<String>>(mut self, vars: impl IntoIterator<Item = S>) -> Self {
        self.read_write.extend(vars.into_iter().map(Into::into));
        self
    }

    /// Globals only read.
    #[must_use]
    pub fn read(&self) -> &HashSet<String> {
        &self.read
    }

    /// Globals only written.
    #[must_use]
    pub fn write(&self) -> &HashSet<String> {
        &self.write
    }

    /// Globals read and written in the same operation.
    #[must_use]
    pub fn read_write(&self) -> &HashSet<String> {
        &self.read_write
    }

    /// `true` when the type touches no global at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.read_write.is_empty()
    }
}

/// Strength of the ordering relation between two nodes.
///
/// The variant order is significant: `Strong > Weak > None`, and merging
/// two links keeps the stronger one.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Link {
    /// Unordered.
    #[default]
    None,
    /// Both sides read-write the same global. Advisory only; the base
    /// schedule does not order on it.
    Weak,
    /// A write is involved on at least one side. Must be ordered.
    Strong,
}

impl Link {
    /// Keep the stronger of two links.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }

    /// `true` for [`Link::Strong`].
    #[must_use]
    pub fn is_strong(self) -> bool {
        self == Self::Strong
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => ".",
            Self::Weak => "w",
            Self::Strong => "S",
        })
    }
}

fn intersects(lhs: &HashSet<String>, rhs: &HashSet<String>) -> bool {
    let (small, large) = if lhs.len() <= rhs.len() { (lhs, rhs) } else { (rhs, lhs) };
    small.iter().any(|var| large.contains(var))
}

/// Classify the link from `earlier` to `later` in build order.
#[must_use]
pub fn classify(earlier: &AccessSets, later: &AccessSets) -> Link {
    let (a, b) = (earlier, later);
    let strong = intersects(&a.write, &b.read)
        || intersects(&a.read, &b.write)
        || intersects(&a.write, &b.write)
        || intersects(&a.read_write, &b.write)
        || intersects(&a.read_write, &b.read)
        || intersects(&a.read, &b.read_write)
        || intersects(&a.write, &b.read_write);
    if strong {
        Link::Strong
    } else if intersects(&a.read_write, &b.read_write) {
        Link::Weak
    } else {
        Link::None
    }
}
