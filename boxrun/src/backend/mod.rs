//! Production [`Factory`](crate::runtime::Factory) backed by youki's libcontainer.
//!
//! Layout under the state root:
//!
//! ```text
//! <state_root>/
//!   containers/<id>/   libcontainer state (state.json, notify socket)
//!   bundles/<id>/      generated config.json for the init process
//! ```
//!
//! The first launch in a container becomes its init process; later launches
//! while init is running join it as tenants.

mod container;
mod error;
mod factory;
mod kill;

pub use container::LibcontainerContainer;
pub use error::BackendError;
pub use factory::LibcontainerFactory;
