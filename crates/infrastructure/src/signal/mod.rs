mod redis_signal_store;

pub use redis_signal_store::RedisSignalStore;
