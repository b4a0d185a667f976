use log::info;
use viz_marshal::{Backend, CreateParams, EngineEnv, Session, SessionError};

use crate::session::LuaSession;

/// Backend whose windows are headless Lua states.
#[derive(Debug, Default, Clone, Copy)]
pub struct LuaBackend;

impl LuaBackend {
    pub fn new() -> Self {
        LuaBackend
    }
}

impl Backend for LuaBackend {
    fn initialize(&self, env: &EngineEnv) -> Result<(), SessionError> {
        if !env.module_path.is_dir() {
            return Err(SessionError::new(format!(
                "module path {} is not a directory",
                env.module_path.display()
            )));
        }
        info!(
            "Lua backend ready (env root {}, modules {})",
            env.env_root.display(),
            env.module_path.display()
        );
        Ok(())
    }

    fn finalize(&self) -> Result<(), SessionError> {
        info!("Lua backend finalized");
        Ok(())
    }

    fn create_session(
        &self,
        env: &EngineEnv,
        params: &CreateParams,
    ) -> Result<Box<dyn Session>, SessionError> {
        let session = LuaSession::new(env, params)?;
        Ok(Box::new(session))
    }
}
