pub mod ab_testing;
pub mod audit_log;
pub mod invoice;
