//! Specialized collection types

use std::ops::{Index, IndexMut};

/// Array sized once at creation, used for per-frame-context storage
///
/// Unlike a `Vec`, the length never changes after construction, so indices derived
/// from `frame_id % len` stay in bounds for the array's whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicArray<T> {
    items: Box<[T]>,
}

impl<T> DynamicArray<T> {
    /// Create an array of `len` elements, each built from its index
    pub fn with_size(len: usize, mut init: impl FnMut(usize) -> T) -> Self {
        Self {
            items: (0..len).map(&mut init).collect(),
        }
    }

    /// Create an array by fallibly building each element from its index
    ///
    /// Stops at the first error; elements already built are dropped.
    pub fn try_with_size<E>(
        len: usize,
        mut init: impl FnMut(usize) -> Result<T, E>,
    ) -> Result<Self, E> {
        let items = (0..len).map(&mut init).collect::<Result<Vec<_>, E>>()?;
        Ok(Self {
            items: items.into_boxed_slice(),
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the array holds no element
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the elements
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Iterate mutably over the elements
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    /// View as a slice
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Consume into the owned elements
    pub fn into_vec(self) -> Vec<T> {
        self.items.into_vec()
    }
}

impl<T: Clone> DynamicArray<T> {
    /// Create an array of `len` copies of `value`
    pub fn from_elem(len: usize, value: T) -> Self {
        Self {
            items: vec![value; len].into_boxed_slice(),
        }
    }
}

impl<T> From<Vec<T>> for DynamicArray<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items: items.into_boxed_slice(),
        }
    }
}

impl<T> Index<usize> for DynamicArray<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<T> IndexMut<usize> for DynamicArray<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.items[index]
    }
}

impl<'a, T> IntoIterator for &'a DynamicArray<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut DynamicArray<T> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_size_uses_index() {
        let array = DynamicArray::with_size(3, |i| i * 10);
        assert_eq!(array.as_slice(), &[0, 10, 20]);
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn test_try_with_size_stops_on_error() {
        let result: Result<DynamicArray<usize>, String> = DynamicArray::try_with_size(4, |i| {
            if i == 2 {
                Err(format!("slot {i}"))
            } else {
                Ok(i)
            }
        });
        assert_eq!(result, Err("slot 2".to_string()));
    }

    #[test]
    fn test_index_mut() {
        let mut array = DynamicArray::from_elem(2, 0u8);
        array[1] = 5;
        assert_eq!(array[1], 5);
        assert!(!array.is_empty());
    }
}
