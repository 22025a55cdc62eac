//! Port ownership tracking.
//!
//! Every tree owns one [`PortRegistry`] at its root. Port settings claim
//! their number for a logical service when they are evaluated, so two
//! services defaulting to the same port surface as a [`Error::PortConflict`]
//! during validation.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{Error, Result};

/// One claimed port.
#[derive(Debug, Clone)]
struct Claim {
    service: String,
    /// Made through [`PortRegistry::reserve`] rather than by evaluating a setting.
    explicit: bool,
}

/// Which logical service owns which port.
#[derive(Debug, Default, Clone)]
pub struct PortRegistry {
    claims: BTreeMap<u16, Claim>,
}

impl PortRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `port` for `service`.
    ///
    /// Claiming a port again for the same service is a no-op.
    pub fn claim(&mut self, port: u16, service: &str) -> Result<()> {
        self.insert(port, service, false)
    }

    /// Claim `port` for `service` so that it survives [`PortRegistry::clear_derived`].
    pub fn reserve(&mut self, port: u16, service: &str) -> Result<()> {
        self.insert(port, service, true)
    }

    fn insert(&mut self, port: u16, service: &str, explicit: bool) -> Result<()> {
        match self.claims.get_mut(&port) {
            Some(claim) if claim.service == service => {
                claim.explicit |= explicit;
                Ok(())
            }
            Some(claim) => Err(Error::PortConflict {
                port,
                existing: claim.service.clone(),
                requested: service.to_string(),
            }),
            None => {
                debug!(port, service, explicit, "claimed port");
                self.claims.insert(
                    port,
                    Claim {
                        service: service.to_string(),
                        explicit,
                    },
                );
                Ok(())
            }
        }
    }

    /// The service that owns `port`, if any.
    pub fn owner(&self, port: u16) -> Option<&str> {
        self.claims.get(&port).map(|claim| claim.service.as_str())
    }

    /// Number of claimed ports.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether no port is claimed.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Claims ordered by port number.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.claims
            .iter()
            .map(|(port, claim)| (*port, claim.service.as_str()))
    }

    /// Drop the claims made by evaluating settings, keeping reservations.
    pub(crate) fn clear_derived(&mut self) {
        self.claims.retain(|_, claim| claim.explicit);
    }
}
