pub mod account_lock;
pub mod audit;
pub mod captcha;
pub mod directory;
pub mod health;
pub mod rate_limit;
pub mod sign_in;
pub mod unlock;
