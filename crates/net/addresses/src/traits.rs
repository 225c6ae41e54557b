//! Seams to the recommendation subsystem and the property manipulation hook.

use std::fmt::Debug;

use auto_impl::auto_impl;

use crate::address::{AddressProperties, SessionId, TransportAddress};

/// The subsystem deciding which addresses get suggested for active use.
///
/// A registration stays valid until it is passed to [`Recommender::destroy`]
/// or released by [`Recommender::remove_session`].
#[auto_impl(&mut, Box)]
pub trait Recommender {
    type Handle: Debug;

    /// Make the address eligible for recommendation.
    fn register(
        &mut self,
        address: &TransportAddress,
        session: Option<SessionId>,
        properties: &AddressProperties,
    ) -> Self::Handle;

    fn add_session(&mut self, handle: &Self::Handle, session: SessionId);

    fn update(&mut self, handle: &Self::Handle, properties: &AddressProperties);

    /// Detach `session` from a registration.
    ///
    /// Returns `true` if the registration was released as a consequence
    /// (inbound addresses are useless without a session), in which case
    /// `handle` must not be used again.
    fn remove_session(&mut self, handle: &Self::Handle, session: SessionId) -> bool;

    fn destroy(&mut self, handle: Self::Handle);
}

/// Hook allowed to adjust properties before they reach the recommender.
#[auto_impl(&, Box, Arc)]
pub trait PropertyManipulator {
    fn manipulate(
        &self,
        address: &TransportAddress,
        session: Option<SessionId>,
        properties: &mut AddressProperties,
    );
}

/// No manipulation (default).
impl PropertyManipulator for () {
    fn manipulate(
        &self,
        _address: &TransportAddress,
        _session: Option<SessionId>,
        _properties: &mut AddressProperties,
    ) {
    }
}
