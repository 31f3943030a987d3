//! Names and paths the bridge is wired with.

use std::path::PathBuf;

/// Static configuration of one bridge session.
///
/// The defaults match the names the external process and the bundled
/// `ServiceManager.js` expect. Override with the `with_*` methods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Name of inbound response messages. Anything else is rejected.
    pub response_name: String,
    /// Query name used by the global query function.
    pub query_name: String,
    /// Query name used by the namespaced `sendQuery`.
    pub namespace_query_name: String,
    /// Global property the generic query function is installed as.
    pub global_function: String,
    /// Global object the namespaced entry point hangs off.
    pub namespace: String,
    /// Method installed on the namespace object.
    pub namespace_method: String,
    /// Script evaluated before the namespace entry point is installed.
    pub namespace_script: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            response_name: "onJavaScriptBridgeResponse".into(),
            query_name: "onJavaScriptBridgeRequest".into(),
            namespace_query_name: "onJavaScriptServiceManagerRequest".into(),
            global_function: "wpeQuery".into(),
            namespace: "ServiceManager".into(),
            namespace_method: "sendQuery".into(),
            namespace_script: PathBuf::from("/usr/share/injectedbundle/ServiceManager.js"),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response_name(mut self, name: impl Into<String>) -> Self {
        self.response_name = name.into();
        self
    }

    pub fn with_query_name(mut self, name: impl Into<String>) -> Self {
        self.query_name = name.into();
        self
    }

    pub fn with_namespace_query_name(mut self, name: impl Into<String>) -> Self {
        self.namespace_query_name = name.into();
        self
    }

    pub fn with_global_function(mut self, name: impl Into<String>) -> Self {
        self.global_function = name.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>, method: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.namespace_method = method.into();
        self
    }

    pub fn with_namespace_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.namespace_script = path.into();
        self
    }
}
