pub mod account_existence;
pub mod account_lock;
pub mod audit;
pub mod captcha;
pub mod email;
pub mod maintenance;
pub mod rate_limiter;
pub mod session;
pub mod sign_in;
pub mod unlock;
