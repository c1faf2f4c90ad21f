//! Generic optimistic-update engine.
//!
//! A [`Mutation`] is a command object: it edits local state immediately
//! ([`Mutation::apply`]), and later either folds in the authoritative
//! result ([`Mutation::commit`]) or undoes itself ([`Mutation::rollback`]).
//! Each mutation records the prior value of the one entity it touches, so
//! undoing it never disturbs edits made to other entities in the meantime.
//!
//! [`Reconciler`] owns the state behind a lock. The lock is only held while
//! a mutation or event is being applied, never across a request, so server
//! events keep flowing in while a mutation is in flight.

use parking_lot::Mutex;

/// A reversible local edit to state `S`.
pub trait Mutation<S> {
    /// The authoritative result that settles this mutation.
    type Output;

    /// Applies the optimistic edit, remembering what it replaced.
    fn apply(&mut self, state: &mut S);

    /// Replaces the optimistic edit with the authoritative result.
    fn commit(self, state: &mut S, output: Self::Output);

    /// Restores the value this mutation replaced.
    fn rollback(self, state: &mut S);
}

/// An applied mutation awaiting its outcome.
#[must_use = "a pending mutation must be committed or rolled back"]
#[derive(Debug)]
pub struct Pending<M> {
    mutation: M,
}

/// Owns local state and runs mutations against it.
#[derive(Debug, Default)]
pub struct Reconciler<S> {
    state: Mutex<S>,
}

impl<S> Reconciler<S> {
    /// Wraps the initial state.
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Applies `mutation` optimistically and returns its pending handle.
    pub fn apply<M: Mutation<S>>(&self, mut mutation: M) -> Pending<M> {
        mutation.apply(&mut self.state.lock());
        Pending { mutation }
    }

    /// Settles a pending mutation with the authoritative result.
    pub fn commit<M: Mutation<S>>(&self, pending: Pending<M>, output: M::Output) {
        pending.mutation.commit(&mut self.state.lock(), output);
    }

    /// Undoes a pending mutation.
    pub fn rollback<M: Mutation<S>>(&self, pending: Pending<M>) {
        pending.mutation.rollback(&mut self.state.lock());
    }

    /// Commits on `Ok`, rolls back on `Err`, and passes the error through.
    ///
    /// # Errors
    ///
    /// Returns `result`'s error after rolling the mutation back.
    pub fn settle<M: Mutation<S>, E>(
        &self,
        pending: Pending<M>,
        result: Result<M::Output, E>,
    ) -> Result<(), E> {
        match result {
            Ok(output) => {
                self.commit(pending, output);
                Ok(())
            }
            Err(e) => {
                self.rollback(pending);
                Err(e)
            }
        }
    }

    /// Reads the current state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.lock())
    }

    /// Applies an authoritative change outside any mutation.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.state.lock())
    }
}
