pub mod account_lock;
pub mod credentials;
pub mod directory;
pub mod postgres_repository;
pub mod redis_rate_limit;
pub mod two_factor;
