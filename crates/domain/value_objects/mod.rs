pub mod enums;
pub mod gateway_events;
pub mod plan_change;
pub mod subscription_state;
pub mod subscriptions;
