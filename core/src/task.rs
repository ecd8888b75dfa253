use crate::error::{LinkError, Result};
use std::thread::{self, JoinHandle};

/// Work running on its own thread, joined back before cleanup.
///
/// Dropping a `Task` without joining detaches the thread; callers that own
/// device resources should always `join`.
pub struct Task<T> {
    name: String,
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> Task<T> {
    pub fn spawn<F>(name: &str, work: F) -> Result<Self>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(work)
            .map_err(|e| LinkError::TaskPanicked(format!("{}: spawn failed: {}", name, e)))?;
        log::debug!("Spawned task {}", name);
        Ok(Self {
            name: name.to_string(),
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task; a panic becomes `TaskPanicked`.
    pub fn join(self) -> Result<T> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(LinkError::TaskPanicked(format!("{}: {}", self.name, reason)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_join_returns_result() {
        let task = Task::spawn("adder", || Ok(2 + 2)).unwrap();
        assert_eq!(task.name(), "adder");
        assert_eq!(task.join().unwrap(), 4);
    }

    #[test]
    fn test_task_error_propagates() {
        let task: Task<()> = Task::spawn("failing", || Err(LinkError::Timeout)).unwrap();
        assert!(matches!(task.join(), Err(LinkError::Timeout)));
    }

    #[test]
    fn test_task_panic_is_reported() {
        let task: Task<()> = Task::spawn("panicking", || panic!("boom")).unwrap();
        match task.join() {
            Err(LinkError::TaskPanicked(msg)) => assert!(msg.contains("boom"), "{}", msg),
            other => panic!("Expected TaskPanicked, got {:?}", other.err()),
        }
    }
}
