// Copyright (c) 2021 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

/*!
Utilities to assist with comparing based on various characteristics. Useful for sorting by
properties different from the natural ordering provided by ordering traits e.g. [`PartialOrd`].
*/

use std::cmp::Ordering;

/// An interface for structs intended to be used as a comparator.
pub trait Comparator<T> {
    /**
    Return an ordering obtained by comparing `a` and `b`.

    Invariants:

    1. Returns [`Ordering::Greater`] if `a` > `b`
    1. Returns [`Ordering::Equal`] if `a` == `b`
    1. Returns [`Ordering::Less`] if `a` < `b`
    */
    fn compare(a: T, b: T) -> Ordering;
}

/**
Orders byte strings lexicographically by unsigned byte value.

When one key is a prefix of the other, the shorter key is ordered first.
*/
#[derive(Debug)]
pub struct BytewiseComparator;

impl Comparator<&[u8]> for BytewiseComparator {
    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        let common_prefix_length = a.len().min(b.len());
        for idx in 0..common_prefix_length {
            match a[idx].cmp(&b[idx]) {
                Ordering::Equal => continue,
                non_equal => return non_equal,
            }
        }

        a.len().cmp(&b.len())
    }
}

/**
Compare two user keys with the ordering used by every on-disk and in-memory structure of the
database.
*/
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    BytewiseComparator::compare(a, b)
}
