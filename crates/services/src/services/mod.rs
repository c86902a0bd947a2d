pub mod ab_testing;
pub mod invoice;
pub mod invoice_hash;
