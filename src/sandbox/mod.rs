//! In-process host and foreign runtimes
//!
//! Both sides of the boundary implemented in plain Rust, for tests and
//! benchmarks. `SandboxHost` lays values out as Rust types (`String` for
//! strings, `ScriptContainer` for collections); `SandboxForeign` runs
//! methods as closures over a small handle-rooted heap.

mod foreign;
mod host;

pub use foreign::{Invocation, MethodBody, MethodResult, SandboxForeign};
pub use host::{HostName, SandboxHost, ScriptContainer};

use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::error::BridgeResult;
use crate::runtime::{HostClass, HostObject};
use std::rc::Rc;

/// Assembly sandbox game classes are registered in
pub const GAME_ASSEMBLY: &str = "Game";

/// A bridge wired to fresh sandbox runtimes
pub struct Sandbox {
    pub host: Rc<SandboxHost>,
    pub foreign: Rc<SandboxForeign>,
    pub cx: Rc<BridgeContext>,
}

impl Sandbox {
    pub fn new() -> BridgeResult<Self> {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> BridgeResult<Self> {
        let host = Rc::new(SandboxHost::new());
        let foreign = Rc::new(SandboxForeign::new());
        foreign.install_engine_library(&config.engine);

        let cx = BridgeContext::new(host.clone(), foreign.clone(), config)?;
        Ok(Self {
            host,
            foreign,
            cx: Rc::new(cx),
        })
    }

    /// Native host class bound to a same-named proxy class in `GAME_ASSEMBLY`
    pub fn define_bound_class(&self, full_name: &str, super_class: Option<HostClass>) -> HostClass {
        self.foreign.define_proxy_class(GAME_ASSEMBLY, full_name);
        let name = full_name.rsplit('.').next().unwrap_or(full_name);
        self.host.define_native_class(name, full_name, GAME_ASSEMBLY, super_class)
    }

    pub fn spawn(&self, class: HostClass, name: &str) -> HostObject {
        self.host.spawn(class, None, name)
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("host", &self.host)
            .field("foreign", &self.foreign)
            .finish_non_exhaustive()
    }
}
