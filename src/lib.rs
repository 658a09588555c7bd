//! Payload Capture Wasm Filter for Envoy Proxy
//!
//! This filter captures request and response bodies as they pass through
//! Envoy and exports them as span attributes for tracing. Traffic is never
//! modified or delayed: bodies are observed chunk by chunk and every
//! callback continues immediately.
//!
//! Two attachment points:
//! - HTTP filter (`capture_mode: http`): Envoy hands over parsed headers and
//!   de-chunked bodies.
//! - Network filter (`capture_mode: tcp`): raw HTTP/1.x bytes; the filter
//!   finds the header/body boundary and undoes chunked framing itself.
//!
//! Targets: wasm32-wasi (Envoy proxy-wasm ABI)

pub mod capture;
pub mod config;
pub mod filter;
pub mod matcher;
pub mod scrub;
pub mod telemetry;

use config::{CaptureConfig, CaptureMode};
use filter::http::CaptureHttpContext;
use filter::tcp::CaptureStreamContext;
use filter::CaptureSettings;
use log::{info, warn};
use proxy_wasm::traits::{Context, HttpContext, RootContext, StreamContext};
use proxy_wasm::types::{ContextType, LogLevel};
use std::rc::Rc;

/// Root context for filter lifecycle management
struct CaptureRootContext {
    settings: Rc<CaptureSettings>,
}

impl CaptureRootContext {
    fn new() -> Self {
        Self {
            settings: Rc::new(CaptureSettings::new(CaptureConfig::default())),
        }
    }

    fn configure(&mut self, config_bytes: Option<&[u8]>) {
        let config = match config_bytes {
            Some(bytes) if !bytes.is_empty() => match CaptureConfig::from_bytes(bytes) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Invalid plugin configuration ({}), using defaults", e);
                    CaptureConfig::default()
                }
            },
            _ => CaptureConfig::default(),
        };

        info!(
            "Payload Capture Filter initialized: mode={:?}, request={}, response={}, max_body_size={}",
            config.capture_mode,
            config.capture_request_body,
            config.capture_response_body,
            config.max_body_size
        );
        if !config.captures_anything() {
            warn!("Both capture directions are disabled; nothing will be exported");
        }

        self.settings = Rc::new(CaptureSettings::new(config));
    }

    fn mode(&self) -> CaptureMode {
        self.settings.config().capture_mode
    }
}

impl Context for CaptureRootContext {}

impl RootContext for CaptureRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        let config_bytes = self.get_plugin_configuration();
        self.configure(config_bytes.as_deref());
        // Fail open: a bad configuration never takes the listener down
        true
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        match self.mode() {
            CaptureMode::Http => Some(Box::new(CaptureHttpContext::new(
                context_id,
                Rc::clone(&self.settings),
            ))),
            CaptureMode::Tcp => None,
        }
    }

    fn create_stream_context(&self, context_id: u32) -> Option<Box<dyn StreamContext>> {
        match self.mode() {
            CaptureMode::Tcp => Some(Box::new(CaptureStreamContext::new(
                context_id,
                Rc::clone(&self.settings),
            ))),
            CaptureMode::Http => None,
        }
    }

    fn get_type(&self) -> Option<ContextType> {
        match self.mode() {
            CaptureMode::Http => Some(ContextType::HttpContext),
            CaptureMode::Tcp => Some(ContextType::StreamContext),
        }
    }
}

// Register the filter with proxy-wasm runtime
proxy_wasm::main! {{
    proxy_wasm::set_log_level(LogLevel::Info);
    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(CaptureRootContext::new())
    });
}}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_defaults_to_http() {
        let mut root = CaptureRootContext::new();
        root.configure(None);
        assert_eq!(root.mode(), CaptureMode::Http);
        assert_eq!(root.get_type(), Some(ContextType::HttpContext));
    }

    #[test]
    fn test_root_tcp_mode() {
        let mut root = CaptureRootContext::new();
        root.configure(Some(br#"{"capture_mode": "tcp"}"#));
        assert_eq!(root.get_type(), Some(ContextType::StreamContext));
        assert!(root.create_http_context(2).is_none());
        assert!(root.create_stream_context(2).is_some());
    }

    #[test]
    fn test_root_invalid_config_falls_back() {
        let mut root = CaptureRootContext::new();
        root.configure(Some(b"not json"));
        assert_eq!(root.mode(), CaptureMode::Http);
        assert_eq!(root.settings.config().max_body_size, 1024 * 1024);
    }
}
