//! The Tandem vertical learning actor.
//!
//! A [`Learner`] is created once per training task and drives itself to
//! completion: it first aligns the two parties' samples through a private
//! set intersection over blinded identifiers, then runs encrypted gradient
//! descent rounds until both parties agree that training has converged, and
//! finally reports the local model (or the first fatal error) exactly once
//! through the [`ResultHandler`] port.
//!
//! Every step is a message. Inbound wire messages arrive through
//! [`Learner::advance`]; local follow-up work is posted back into the same
//! dispatch on spawned tasks, so a wire handler never blocks on the rest of
//! a round. Outbound traffic goes through the [`RpcHandler`] port.

mod error;
mod learner;
mod parts;
mod process;
mod psi;
mod samples;
mod traits;

pub use self::{
    error::{Error, ErrorKind},
    learner::Learner,
    psi::TwoPartyPsi,
    traits::{ResultHandler, RpcHandler},
};
