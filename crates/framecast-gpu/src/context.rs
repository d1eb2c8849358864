//! GPU context management and the movable context token.

use framecast_core::{FramecastError, Result};
use std::sync::Arc;
use tracing::info;

/// GPU context holding instance, adapter, device and queue.
///
/// Construction is the only place talking to the windowing/driver layer;
/// everything downstream works through [`ContextToken`]s handed out by
/// [`GpuContext::primary_token`].
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Create a new GPU context on the platform's preferred backend.
    pub async fn new() -> Result<Self> {
        #[cfg(target_os = "macos")]
        let backends = wgpu::Backends::METAL;
        #[cfg(not(target_os = "macos"))]
        let backends = wgpu::Backends::VULKAN | wgpu::Backends::DX12 | wgpu::Backends::GL;

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                FramecastError::Configuration("no suitable GPU adapter found".to_string())
            })?;

        info!("using GPU adapter: {:?}", adapter.get_info());

        // Request the mappable-buffer feature when the adapter has it;
        // the capability probe reports whether it stuck.
        let optional_features =
            adapter.features() & wgpu::Features::MAPPABLE_PRIMARY_BUFFERS;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Framecast Device"),
                    required_features: optional_features,
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| {
                FramecastError::Configuration(format!("failed to create device: {}", e))
            })?;

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Create a new GPU context (blocking version).
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }

    /// Get adapter info.
    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Probe the runtime capabilities relevant to pipeline topology.
    pub fn probe(&self) -> Capabilities {
        Capabilities {
            persistent_mapping: self
                .device
                .features()
                .contains(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS),
            multiple_contexts: true,
            max_buffer_size: self.device.limits().max_buffer_size,
        }
    }

    /// Hand out the primary execution token for this context.
    pub fn primary_token(&self, label: impl Into<String>) -> ContextToken {
        ContextToken {
            label: label.into(),
            capabilities: self.probe(),
            exec: TokenExec::Device {
                device: Arc::clone(&self.device),
                queue: Arc::clone(&self.queue),
            },
        }
    }
}

/// Probed runtime capabilities, validated against requested optimization
/// flags at dispatch construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Persistently mapped buffers are available for upload/download.
    pub persistent_mapping: bool,
    /// Additional execution tokens may be split off, sharing the
    /// primary's object namespace.
    pub multiple_contexts: bool,
    /// Largest single buffer the device accepts, in bytes.
    pub max_buffer_size: u64,
}

impl Capabilities {
    /// Capabilities of a host-only conversion session: no pinned
    /// buffers, token splitting is trivially available.
    pub fn host() -> Self {
        Self {
            persistent_mapping: false,
            multiple_contexts: true,
            max_buffer_size: u64::MAX,
        }
    }
}

enum TokenExec {
    Device {
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
    },
    Host,
}

/// Movable handle to a conversion execution context.
///
/// A token is deliberately not `Clone`: it may be driven by exactly one
/// thread at a time, and handing it to a worker means moving it there.
/// [`ContextToken::split`] is the only sharing mechanism — the split
/// token shares the primary's device and object namespace but is its own
/// independently movable handle.
pub struct ContextToken {
    label: String,
    capabilities: Capabilities,
    exec: TokenExec,
}

impl ContextToken {
    /// A token for a host-only (software conversion) session. Useful
    /// when no adapter is present and for deterministic test pipelines.
    pub fn host(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            capabilities: Capabilities::host(),
            exec: TokenExec::Host,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether this token is backed by a GPU device.
    pub fn is_gpu(&self) -> bool {
        matches!(self.exec, TokenExec::Device { .. })
    }

    /// Split off a secondary token sharing this token's device. Fails
    /// when the capability probe does not allow multiple contexts.
    pub fn split(&self, label: impl Into<String>) -> Result<Self> {
        if !self.capabilities.multiple_contexts {
            return Err(FramecastError::Configuration(format!(
                "context '{}' does not support splitting additional tokens",
                self.label
            )));
        }
        let exec = match &self.exec {
            TokenExec::Device { device, queue } => TokenExec::Device {
                device: Arc::clone(device),
                queue: Arc::clone(queue),
            },
            TokenExec::Host => TokenExec::Host,
        };
        Ok(Self {
            label: label.into(),
            capabilities: self.capabilities,
            exec,
        })
    }

    pub(crate) fn device_queue(&self) -> Option<(&Arc<wgpu::Device>, &Arc<wgpu::Queue>)> {
        match &self.exec {
            TokenExec::Device { device, queue } => Some((device, queue)),
            TokenExec::Host => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_token_capabilities() {
        let token = ContextToken::host("test");
        assert!(!token.is_gpu());
        assert!(!token.capabilities().persistent_mapping);
        assert!(token.capabilities().multiple_contexts);
    }

    #[test]
    fn test_host_token_split() {
        let token = ContextToken::host("primary");
        let second = token.split("upload").unwrap();
        assert_eq!(second.label(), "upload");
        assert_eq!(second.capabilities(), token.capabilities());
    }
}
