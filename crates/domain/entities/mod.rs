pub mod plans;
pub mod subscription_events;
pub mod user_subscriptions;
