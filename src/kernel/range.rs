//! Iteration domains and work-item indices

use std::fmt;

use crate::error::{OffloadError, OffloadResult};

/// A 1-D, 2-D or 3-D iteration extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    dims: [usize; 3],
    rank: usize,
}

impl Range {
    pub fn d1(x: usize) -> Self {
        Self { dims: [x, 1, 1], rank: 1 }
    }

    pub fn d2(x: usize, y: usize) -> Self {
        Self { dims: [x, y, 1], rank: 2 }
    }

    pub fn d3(x: usize, y: usize, z: usize) -> Self {
        Self { dims: [x, y, z], rank: 3 }
    }

    /// Build from a slice of 1 to 3 extents
    pub fn from_slice(extents: &[usize]) -> OffloadResult<Self> {
        let range = match *extents {
            [x] => Self::d1(x),
            [x, y] => Self::d2(x, y),
            [x, y, z] => Self::d3(x, y, z),
            _ => {
                return Err(OffloadError::InvalidRange(format!(
                    "iteration domain must have 1 to 3 dimensions, got {}",
                    extents.len()
                )))
            }
        };
        range.checked_size()?;
        Ok(range)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Extent along `dim`
    pub fn get(&self, dim: usize) -> usize {
        self.dims[dim]
    }

    /// Total number of work-items, saturating at `usize::MAX`
    pub fn size(&self) -> usize {
        self.checked_size().unwrap_or(usize::MAX)
    }

    /// Total number of work-items, or `InvalidRange` if it overflows
    pub fn checked_size(&self) -> OffloadResult<usize> {
        self.dims[..self.rank]
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                OffloadError::InvalidRange(format!(
                    "iteration domain {} has more than {} work-items",
                    self, usize::MAX
                ))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Row-major iteration over every work-item
    pub fn items(&self) -> impl Iterator<Item = Item> + '_ {
        let range = *self;
        (0..self.size()).map(move |linear| range.item(linear))
    }

    fn item(&self, linear: usize) -> Item {
        let [_, y, z] = self.dims;
        let id = match self.rank {
            1 => [linear, 0, 0],
            2 => [linear / y, linear % y, 0],
            _ => [linear / (y * z), (linear / z) % y, linear % z],
        };
        Item {
            id,
            linear,
            range: *self,
        }
    }
}

impl From<usize> for Range {
    fn from(x: usize) -> Self {
        Range::d1(x)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank {
            1 => write!(f, "[{}]", self.dims[0]),
            2 => write!(f, "[{}, {}]", self.dims[0], self.dims[1]),
            _ => write!(f, "[{}, {}, {}]", self.dims[0], self.dims[1], self.dims[2]),
        }
    }
}

/// One work-item of a `parallel_for`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    id: [usize; 3],
    linear: usize,
    range: Range,
}

impl Item {
    /// Index along `dim`
    pub fn get(&self, dim: usize) -> usize {
        self.id[dim]
    }

    pub fn id(&self) -> [usize; 3] {
        self.id
    }

    /// Row-major linear index; equals `get(0)` for 1-D domains
    pub fn linear_id(&self) -> usize {
        self.linear
    }

    pub fn range(&self) -> Range {
        self.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(Range::d1(1024).size(), 1024);
        assert_eq!(Range::d2(4, 8).size(), 32);
        assert_eq!(Range::d3(2, 3, 4).size(), 24);
        assert!(Range::d2(0, 8).is_empty());
    }

    #[test]
    fn test_row_major_items() {
        let range = Range::d2(2, 3);
        let ids: Vec<[usize; 3]> = range.items().map(|i| i.id()).collect();
        assert_eq!(
            ids,
            vec![[0, 0, 0], [0, 1, 0], [0, 2, 0], [1, 0, 0], [1, 1, 0], [1, 2, 0]]
        );

        let last = Range::d3(2, 3, 4).items().last().unwrap();
        assert_eq!(last.id(), [1, 2, 3]);
        assert_eq!(last.linear_id(), 23);
    }

    #[test]
    fn test_from_slice() {
        assert_eq!(Range::from_slice(&[5]).unwrap(), Range::d1(5));
        assert_eq!(Range::from_slice(&[5, 6, 7]).unwrap().rank(), 3);
        assert!(matches!(
            Range::from_slice(&[1, 2, 3, 4]),
            Err(OffloadError::InvalidRange(_))
        ));
        assert!(Range::from_slice(&[]).is_err());
    }

    #[test]
    fn test_overflowing_domain_is_rejected() {
        let huge = Range::d3(usize::MAX, 2, 1);
        assert!(matches!(huge.checked_size(), Err(OffloadError::InvalidRange(_))));
        assert_eq!(huge.size(), usize::MAX);
        assert!(!huge.is_empty());
        assert!(matches!(
            Range::from_slice(&[usize::MAX, 2]),
            Err(OffloadError::InvalidRange(_))
        ));
        // a zero extent never overflows
        assert_eq!(Range::d3(usize::MAX, 0, 2).checked_size().unwrap(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Range::d1(3).to_string(), "[3]");
        assert_eq!(Range::d3(1, 2, 3).to_string(), "[1, 2, 3]");
    }
}
