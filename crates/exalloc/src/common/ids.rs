use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// Defines a transparent integer id newtype with the usual conversions.
#[macro_export]
macro_rules! define_id_type {
    ($name: ident, $inner: ty) => {
        #[derive(
            ::std::marker::Copy,
            ::std::clone::Clone,
            ::std::fmt::Debug,
            ::std::hash::Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::std::cmp::Ord,
            ::std::cmp::PartialOrd,
            ::std::cmp::Eq,
            ::std::cmp::PartialEq,
            ::std::default::Default,
        )]
        #[repr(transparent)]
        pub struct $name($inner);

        impl $name {
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            pub fn as_num(&self) -> $inner {
                self.0
            }
        }

        impl ::std::convert::From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self::new(value)
            }
        }

        impl ::std::convert::From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

define_id_type!(ProfileId, u32);
define_id_type!(StageId, u32);
define_id_type!(AttemptId, u32);

/// Identifies a single attempt at executing a stage.
#[derive(
    Default, Copy, Clone, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct StageAttemptId {
    stage: StageId,
    attempt: AttemptId,
}

impl StageAttemptId {
    #[inline]
    pub fn new(stage: StageId, attempt: AttemptId) -> Self {
        Self { stage, attempt }
    }

    #[inline]
    pub fn stage(&self) -> StageId {
        self.stage
    }

    #[inline]
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }
}

impl Display for StageAttemptId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.stage, self.attempt)
    }
}

impl Debug for StageAttemptId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
impl From<(u32, u32)> for StageAttemptId {
    fn from((stage, attempt): (u32, u32)) -> Self {
        Self::new(stage.into(), attempt.into())
    }
}
