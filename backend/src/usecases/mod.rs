pub mod subscription_state;
pub mod subscriptions;
pub mod webhook_reconciler;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
