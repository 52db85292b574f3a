/// A strict total order over `T`, given by its "less than" relation.
///
/// Equality is derived from it: `a` and `b` are equal when neither is less than the other.
pub trait Comparator<T> {
    fn less(&self, a: &T, b: &T) -> bool;

    fn equal(&self, a: &T, b: &T) -> bool {
        !self.less(a, b) && !self.less(b, a)
    }
}

/// Ascending order according to `Ord`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl<T: Ord> Comparator<T> for NaturalOrder {
    fn less(&self, a: &T, b: &T) -> bool {
        a < b
    }
}

/// Descending order according to `Ord`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reverse;

impl<T: Ord> Comparator<T> for Reverse {
    fn less(&self, a: &T, b: &T) -> bool {
        a > b
    }
}

impl<T, F> Comparator<T> for F
where
    F: Fn(&T, &T) -> bool,
{
    fn less(&self, a: &T, b: &T) -> bool {
        self(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::{Comparator, NaturalOrder, Reverse};

    #[test]
    fn test_equality_is_derived() {
        assert!(NaturalOrder.equal(&3, &3));
        assert!(!NaturalOrder.equal(&3, &4));
        assert!(Reverse.less(&4, &3));

        let by_len = |a: &&str, b: &&str| a.len() < b.len();
        assert!(by_len.equal(&"abc", &"xyz"));
        assert!(by_len.less(&"ab", &"xyz"));
    }
}
