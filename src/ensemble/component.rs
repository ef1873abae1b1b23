//! Component and component-registry seams consumed by the engine
//!
//! The engine never owns components. Ensembles refer to them by
//! [`ComponentId`] and read them through a [`World`] each step.

use crate::core::types::ComponentId;
use std::fmt::Debug;

/// An agent that can be selected into roles
pub trait Component {
    /// Runtime type tag role descriptors match against
    type Kind: Copy + Eq + Debug;

    fn id(&self) -> ComponentId;

    fn kind(&self) -> Self::Kind;
}

/// Ordered registry of all live components for the current step
pub trait World {
    type Component: Component;

    /// All live components in stable enumeration order
    fn components(&self) -> &[Self::Component];

    fn component(&self, id: ComponentId) -> Option<&Self::Component> {
        self.components().iter().find(|c| c.id() == id)
    }
}

/// Type tag of the components held by world `W`
pub type KindOf<W> = <<W as World>::Component as Component>::Kind;

/// Component type held by world `W`
pub type ComponentOf<W> = <W as World>::Component;
