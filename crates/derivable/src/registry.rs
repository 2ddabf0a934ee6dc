//! Registry of differentiation backends.
//!
//! The set of built-in backends comes from an explicit [`Capabilities`]
//! value rather than from probing the environment. Numeric backends
//! supplied at runtime are added with [`BackendRegistry::register`].

use derivable_core::backend::{BackendTag, NumericBackend};
use derivable_core::error::{Error, Result};
use log::{debug, warn};
use parking_lot::RwLock;
use std::sync::Arc;

/// Built-in backends to enable besides the symbolic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Forward-mode automatic differentiation.
    pub forward_diff: bool,
    /// Central finite differences.
    pub finite_diff: bool,
}

impl Capabilities {
    /// Only the symbolic and passthrough backends.
    pub const fn symbolic_only() -> Self {
        Self {
            forward_diff: false,
            finite_diff: false,
        }
    }

    /// Everything this build of the crate was compiled with.
    pub const fn compiled() -> Self {
        Self {
            forward_diff: cfg!(feature = "autodiff"),
            finite_diff: cfg!(feature = "autodiff"),
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::compiled()
    }
}

/// Ordered set of usable backends.
#[derive(Debug)]
pub struct BackendRegistry {
    capabilities: Capabilities,
    custom: RwLock<Vec<Arc<dyn NumericBackend>>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new(Capabilities::compiled())
    }
}

impl BackendRegistry {
    /// Creates a registry for the given capabilities.
    ///
    /// Capabilities this build was not compiled with are dropped.
    pub fn new(requested: Capabilities) -> Self {
        let compiled = Capabilities::compiled();
        let capabilities = Capabilities {
            forward_diff: requested.forward_diff && compiled.forward_diff,
            finite_diff: requested.finite_diff && compiled.finite_diff,
        };
        if capabilities != requested {
            warn!(
                "requested backends {:?} reduced to {:?}: enable the `autodiff` feature",
                requested, capabilities
            );
        }
        Self {
            capabilities,
            custom: RwLock::new(Vec::new()),
        }
    }

    /// The enabled built-in capabilities.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Lists usable backends: symbolic, forward mode, finite differences,
    /// custom backends in registration order, passthrough.
    pub fn list_backends(&self) -> Vec<BackendTag> {
        let mut tags = vec![BackendTag::Symbolic];
        if self.capabilities.forward_diff {
            tags.push(BackendTag::ForwardDiff);
        }
        if self.capabilities.finite_diff {
            tags.push(BackendTag::FiniteDiff);
        }
        tags.extend(
            self.custom
                .read()
                .iter()
                .map(|b| BackendTag::Custom(b.name().to_string())),
        );
        tags.push(BackendTag::Passthrough);
        tags
    }

    /// Returns true if `tag` can be dispatched.
    pub fn is_registered(&self, tag: &BackendTag) -> bool {
        match tag {
            BackendTag::Symbolic | BackendTag::Passthrough => true,
            BackendTag::ForwardDiff => self.capabilities.forward_diff,
            BackendTag::FiniteDiff => self.capabilities.finite_diff,
            BackendTag::Custom(name) => self.custom(name).is_some(),
        }
    }

    /// Rejects tags that are not registered.
    pub fn validate(&self, tag: &BackendTag) -> Result<()> {
        if self.is_registered(tag) {
            Ok(())
        } else {
            Err(Error::unknown_backend(tag, &self.list_backends()))
        }
    }

    /// Looks up a custom backend by name.
    pub fn custom(&self, name: &str) -> Option<Arc<dyn NumericBackend>> {
        self.custom.read().iter().find(|b| b.name() == name).cloned()
    }

    /// Registers a numeric backend, returning the tag that selects it.
    ///
    /// Names already taken, names of built-in backends and unavailable
    /// backends are rejected.
    pub fn register(&self, backend: Arc<dyn NumericBackend>) -> Result<BackendTag> {
        let name = backend.name().to_string();
        let builtin = matches!(
            name.parse::<BackendTag>(),
            Ok(tag) if !matches!(tag, BackendTag::Custom(_))
        );
        if builtin {
            return Err(Error::invalid_configuration(
                "name is reserved for a built-in backend",
                "backend",
                name,
            ));
        }
        if !backend.is_available() {
            return Err(Error::invalid_configuration(
                "backend is not available on this system",
                "backend",
                name,
            ));
        }

        let mut custom = self.custom.write();
        if custom.iter().any(|b| b.name() == name) {
            return Err(Error::invalid_configuration(
                "a backend with this name is already registered",
                "backend",
                name,
            ));
        }
        custom.push(backend);
        debug!("registered backend `{}`", name);
        Ok(BackendTag::Custom(name))
    }
}
