/*
 * Process-scoped lifecycle of the native embedding helper. The host
 * application's entry point creates one `EmbeddingSubsystem`, initializes it
 * before the first Window-method embed and shuts it down once at exit. Both
 * transitions are idempotent; container calls outside the initialized window
 * fail fast with `NotInitialized` instead of reaching the helper.
 */
use crate::error::{EmbedError, Result};
use crate::platform::EmbeddingHelper;
use crate::types::WindowHandle;

use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    Uninitialized,
    Initialized,
    ShutDown,
}

pub struct EmbeddingSubsystem {
    helper: Option<Arc<dyn EmbeddingHelper>>,
    state: Mutex<SubsystemState>,
}

impl EmbeddingSubsystem {
    pub fn new(helper: Arc<dyn EmbeddingHelper>) -> Self {
        Self {
            helper: Some(helper),
            state: Mutex::new(SubsystemState::Uninitialized),
        }
    }

    /// A subsystem without a helper; every container request fails with `NotInitialized`.
    pub fn unavailable() -> Self {
        Self {
            helper: None,
            state: Mutex::new(SubsystemState::Uninitialized),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SubsystemState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SubsystemState {
        *self.lock_state()
    }

    pub fn initialize(&self) -> Result<()> {
        let mut state = self.lock_state();
        match *state {
            SubsystemState::Initialized => Ok(()),
            SubsystemState::ShutDown => Err(EmbeddingSubsystem::not_ready("already shut down")),
            SubsystemState::Uninitialized => {
                let helper = self
                    .helper
                    .as_ref()
                    .ok_or_else(|| EmbeddingSubsystem::not_ready("no embedding helper loaded"))?;
                helper.initialize()?;
                *state = SubsystemState::Initialized;
                log::debug!("Subsystem: embedding helper initialized.");
                Ok(())
            }
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        if *state == SubsystemState::Initialized
            && let Some(helper) = &self.helper
        {
            helper.shutdown();
            log::debug!("Subsystem: embedding helper shut down.");
        }
        *state = SubsystemState::ShutDown;
    }

    fn ready_helper(&self) -> Result<Arc<dyn EmbeddingHelper>> {
        let state = self.lock_state();
        match (*state, &self.helper) {
            (SubsystemState::Initialized, Some(helper)) => Ok(Arc::clone(helper)),
            (SubsystemState::ShutDown, _) => Err(EmbeddingSubsystem::not_ready("already shut down")),
            _ => Err(EmbeddingSubsystem::not_ready(
                "initialize must be called before the first container is created",
            )),
        }
    }

    fn not_ready(reason: &str) -> EmbedError {
        EmbedError::NotInitialized(format!("embedding helper: {reason}"))
    }

    pub fn create_container(
        &self,
        parent: WindowHandle,
        child: WindowHandle,
        width: i32,
        height: i32,
    ) -> Result<WindowHandle> {
        let helper = self.ready_helper()?;
        let container = helper.create_container(parent, child, width, height)?;
        if container.is_null() {
            return Err(EmbedError::OperationFailed(format!(
                "embedding helper returned no container for window {child}"
            )));
        }
        Ok(container)
    }

    pub fn destroy_container(
        &self,
        container: WindowHandle,
        child: WindowHandle,
    ) -> Result<WindowHandle> {
        self.ready_helper()?.destroy_container(container, child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeHelper, FakeWindows};

    fn subsystem() -> (Arc<FakeHelper>, EmbeddingSubsystem) {
        let helper = Arc::new(FakeHelper::new(Arc::new(FakeWindows::new())));
        let subsystem = EmbeddingSubsystem::new(helper.clone());
        (helper, subsystem)
    }

    #[test]
    fn container_calls_fail_fast_before_initialize() {
        let (helper, subsystem) = subsystem();
        let result = subsystem.create_container(WindowHandle(1), WindowHandle(2), 10, 10);
        assert!(matches!(result, Err(EmbedError::NotInitialized(_))));
        assert_eq!(helper.created_count(), 0);
    }

    #[test]
    fn initialize_and_shutdown_are_idempotent() {
        let (helper, subsystem) = subsystem();
        subsystem.initialize().unwrap();
        subsystem.initialize().unwrap();
        assert_eq!(helper.init_calls(), 1);

        subsystem.shutdown();
        subsystem.shutdown();
        assert_eq!(helper.shutdown_calls(), 1);
        assert_eq!(subsystem.state(), SubsystemState::ShutDown);
    }

    #[test]
    fn calls_after_shutdown_are_rejected() {
        let (_helper, subsystem) = subsystem();
        subsystem.initialize().unwrap();
        subsystem.shutdown();
        assert!(subsystem.initialize().is_err());
        assert!(matches!(
            subsystem.destroy_container(WindowHandle(5), WindowHandle(2)),
            Err(EmbedError::NotInitialized(_))
        ));
    }

    #[test]
    fn unavailable_subsystem_cannot_initialize() {
        let subsystem = EmbeddingSubsystem::unavailable();
        assert!(matches!(
            subsystem.initialize(),
            Err(EmbedError::NotInitialized(_))
        ));
        subsystem.shutdown();
    }
}
