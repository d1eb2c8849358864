//! Pipeline topology toggles.

use framecast_core::{FramecastError, Result};
use framecast_gpu::Capabilities;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named boolean toggles selecting the pipeline's thread and context
/// topology.
///
/// Flags are validated once against the probed runtime capability when a
/// dispatch is constructed; unsupported combinations are rejected with a
/// descriptive error, never silently downgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptimizationFlags {
    /// Pull + staging run on a dedicated thread feeding a bounded
    /// queue, decoupling source latency from conversion throughput.
    pub async_input: bool,
    /// Delivery runs on a dedicated thread fed by a bounded queue,
    /// decoupling sink latency from conversion throughput.
    pub async_output: bool,
    /// Secondary execution tokens share the primary's object namespace.
    /// Also scopes a GPU failure to the failing composition instead of
    /// poisoning the whole dispatch.
    pub multiple_contexts: bool,
    /// Persistently mapped buffers for upload/download, saving one copy
    /// per frame.
    pub persistent_mapping: bool,
}

impl OptimizationFlags {
    /// Fully synchronous topology.
    pub const NONE: Self = Self {
        async_input: false,
        async_output: false,
        multiple_contexts: false,
        persistent_mapping: false,
    };

    /// Validate this combination against a probed capability. Fails on
    /// the first unsupported flag.
    pub fn validate(&self, capabilities: &Capabilities) -> Result<()> {
        if self.persistent_mapping && !capabilities.persistent_mapping {
            return Err(FramecastError::Configuration(
                "PERSISTENT_MAPPING requested but the runtime lacks mappable buffers".to_string(),
            ));
        }
        if self.multiple_contexts && !capabilities.multiple_contexts {
            return Err(FramecastError::Configuration(
                "MULTIPLE_CONTEXTS requested but the runtime cannot split context tokens"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Number of worker threads this topology uses per running
    /// composition: one convert thread plus the async stages.
    pub fn worker_threads(&self) -> usize {
        1 + usize::from(self.async_input) + usize::from(self.async_output)
    }
}

impl fmt::Display for OptimizationFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.async_input {
            names.push("ASYNC_INPUT");
        }
        if self.async_output {
            names.push("ASYNC_OUTPUT");
        }
        if self.multiple_contexts {
            names.push("MULTIPLE_CONTEXTS");
        }
        if self.persistent_mapping {
            names.push("PERSISTENT_MAPPING");
        }
        if names.is_empty() {
            f.write_str("(none)")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}
