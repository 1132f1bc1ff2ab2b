//! The `Harness` trait -- the adapter interface for agent runtimes.
//!
//! The trait is object-safe so it can be stored as `Box<dyn Harness>` in
//! the [`super::HarnessRegistry`].

use async_trait::async_trait;

use super::types::{InvocationError, InvocationRequest, InvocationSummary};

/// Adapter interface for running a coding agent to completion.
///
/// Implementors wrap a specific agent runtime and translate however it
/// signals success or failure into `Ok(InvocationSummary)` or a typed
/// [`InvocationError`]. An adapter must never panic on agent misbehaviour;
/// every failure is a value.
#[async_trait]
pub trait Harness: Send + Sync {
    /// Name the agent is registered under (e.g. "claude").
    fn name(&self) -> &str;

    /// Run the agent on `request.prompt` inside `request.working_dir` and
    /// wait for it to finish.
    ///
    /// Implementations must stop the agent and return
    /// [`InvocationError::Cancelled`] once `request.cancel` fires.
    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationSummary, InvocationError>;
}

// Compile-time assertion: Harness must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Harness) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHarness;

    #[async_trait]
    impl Harness for NoopHarness {
        fn name(&self) -> &str {
            "noop"
        }

        async fn invoke(
            &self,
            request: &InvocationRequest,
        ) -> Result<InvocationSummary, InvocationError> {
            Ok(InvocationSummary {
                result_text: Some(request.prompt.clone()),
                ..InvocationSummary::default()
            })
        }
    }

    #[tokio::test]
    async fn harness_is_usable_as_trait_object() {
        let harness: Box<dyn Harness> = Box::new(NoopHarness);
        assert_eq!(harness.name(), "noop");

        let request = InvocationRequest::new("noop-1", "hello", "/tmp", 3000);
        let summary = harness.invoke(&request).await.unwrap();
        assert_eq!(summary.result_text.as_deref(), Some("hello"));
    }
}
