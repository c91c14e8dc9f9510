pub mod slot_pool;
pub mod validation;
