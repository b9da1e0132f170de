use serde_json::{json, Map};

use crate::capabilities::Capabilities;
use crate::host::{ElementHost, ScriptHost, WindowHost};

/// Static facts about the hosting application, used to seed the default
/// capability document.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub app_name: String,
    pub app_version: String,
    pub platform_name: String,
    pub platform_version: String,
    pub app_id: String,
    pub build_id: String,
    pub device: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        ServerInfo {
            app_name: "Firefox".to_string(),
            app_version: String::new(),
            platform_name: std::env::consts::OS.to_uppercase(),
            platform_version: String::new(),
            app_id: String::new(),
            build_id: String::new(),
            device: "desktop".to_string(),
        }
    }
}

/// Process-wide driver context with an explicit lifecycle.
///
/// Owns the host collaborators and the host-readiness flag. Created once
/// the host application announces readiness (or earlier, with
/// [`DriverRuntime::mark_ready`] called at that point), passed explicitly
/// to the driver, and torn down with the session.
pub struct DriverRuntime {
    pub(crate) windows: Box<dyn WindowHost>,
    pub(crate) elements: Box<dyn ElementHost>,
    pub(crate) scripts: Box<dyn ScriptHost>,
    pub(crate) info: ServerInfo,
    ready: bool,
}

impl DriverRuntime {
    pub fn new(
        windows: Box<dyn WindowHost>,
        elements: Box<dyn ElementHost>,
        scripts: Box<dyn ScriptHost>,
        info: ServerInfo,
    ) -> Self {
        Self {
            windows,
            elements,
            scripts,
            info,
            ready: false,
        }
    }

    /// The host application finished its delayed startup; new sessions may
    /// now be created without waiting.
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Default capability document advertised for new sessions.
    pub fn default_capabilities(&self) -> Capabilities {
        let mut caps = Map::new();
        caps.insert("browserName".into(), json!(self.info.app_name));
        caps.insert("browserVersion".into(), json!(self.info.app_version));
        caps.insert("platformName".into(), json!(self.info.platform_name));
        caps.insert("platformVersion".into(), json!(self.info.platform_version));

        caps.insert("handlesAlerts".into(), json!(false));
        caps.insert("nativeEvents".into(), json!(false));
        caps.insert("raisesAccessibilityExceptions".into(), json!(false));
        caps.insert("rotatable".into(), json!(false));
        caps.insert("secureSsl".into(), json!(false));
        caps.insert("takesElementScreenshot".into(), json!(true));
        caps.insert("takesScreenshot".into(), json!(true));

        // Selenium 2 compat
        caps.insert("platform".into(), json!(self.info.platform_name));

        caps.insert("appId".into(), json!(self.info.app_id));
        caps.insert("appBuildId".into(), json!(self.info.build_id));
        caps.insert("device".into(), json!(self.info.device));
        caps.insert("version".into(), json!(self.info.app_version));
        caps
    }
}

impl std::fmt::Debug for DriverRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRuntime")
            .field("info", &self.info)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}
