// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Processing stage contract.
//!
//! Each post-processing stage is a pure function from its input to its
//! output. Stages are composed explicitly with [`Processor::then`] instead of
//! being wired through a class hierarchy.

use crate::error::Result;

/// A pure processing stage.
pub trait Processor<I> {
    /// Stage output.
    type Output;

    /// Run the stage on `input`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input violates the stage's shape contract.
    fn process(&self, input: I) -> Result<Self::Output>;

    /// Chain `next` after this stage.
    #[must_use]
    fn then<P>(self, next: P) -> Sequential<Self, P>
    where
        Self: Sized,
        P: Processor<Self::Output>,
    {
        Sequential {
            first: self,
            second: next,
        }
    }
}

/// Two stages run one after the other.
#[derive(Debug, Clone)]
pub struct Sequential<A, B> {
    first: A,
    second: B,
}

impl<A, B> Sequential<A, B> {
    /// The first stage.
    pub const fn first(&self) -> &A {
        &self.first
    }
}

impl<I, A, B> Processor<I> for Sequential<A, B>
where
    A: Processor<I>,
    B: Processor<A::Output>,
{
    type Output = B::Output;

    fn process(&self, input: I) -> Result<Self::Output> {
        let intermediate = self.first.process(input)?;
        self.second.process(intermediate)
    }
}
