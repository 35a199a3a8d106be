use std::{cmp, fmt};

/// A byte range within a single source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub start: u32,
    pub end: u32,
    pub file: FileId,
}

impl Span {
    pub const ZERO: Span = Span {
        start: 0,
        end: 0,
        file: FileId(0),
    };

    pub fn new(start: u32, end: u32, file: FileId) -> Self {
        Span { start, end, file }
    }

    pub fn point(pos: u32, file: FileId) -> Self {
        Span {
            start: pos,
            end: pos,
            file,
        }
    }

    pub fn contains(&self, pos: u32) -> bool {
        self.start <= pos && pos < self.end
    }

    pub fn cmp_pos(&self, pos: u32) -> cmp::Ordering {
        if self.start > pos {
            cmp::Ordering::Greater
        } else if self.end <= pos {
            cmp::Ordering::Less
        } else {
            cmp::Ordering::Equal
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        assert_eq!(self.file, other.file);
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            file: self.file,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} in file {}", self.start, self.end, self.file.0)
    }
}

/// Index of a file in the source graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl FileId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub type Spanned<A> = (A, Span);
