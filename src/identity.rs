use std::fmt;

pub trait IdGenerator {
    type Id: Copy + Eq + std::hash::Hash;
    fn fresh(&mut self) -> Self::Id;
}

macro_rules! arena_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(FuncId, "f");
arena_id!(BufferId, "b");
arena_id!(ParamId, "p");

pub mod generators {
    use crate::identity::IdGenerator;

    /// Monotonic suffix source for synthesized names.
    #[derive(Debug, Clone, Default)]
    pub struct Counter {
        counter: usize,
    }

    impl Counter {
        pub fn new() -> Counter {
            Self { counter: 0 }
        }
    }

    impl IdGenerator for Counter {
        type Id = usize;

        fn fresh(&mut self) -> Self::Id {
            self.counter += 1;
            self.counter
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_monotonic() {
        let mut g = generators::Counter::new();
        assert_eq!(g.fresh(), 1);
        assert_eq!(g.fresh(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(FuncId(3).to_string(), "f3");
        assert_eq!(BufferId(0).to_string(), "b0");
        assert_eq!(ParamId(7).index(), 7);
    }
}
