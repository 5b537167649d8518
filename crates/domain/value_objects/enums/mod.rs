pub mod payment_statuses;
pub mod service_categories;
pub mod subscription_statuses;
