pub mod razorpay_webhook;
pub mod subscriptions;
